//! Static capability matrix: per (dialect, feature) support level and caveat.
//!
//! The matrix is the single source of truth for what an exporter may render
//! silently. Every `partial` or `none` entry carries the caveat text that ends
//! up in the warning diagnostic.
use std::fmt;

use serde::Serialize;

use crate::{config::models::LoadBalanceAlgorithm, core::provider::ProviderId};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    None,
    Partial,
    Full,
}

impl fmt::Display for SupportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportLevel::None => write!(f, "none"),
            SupportLevel::Partial => write!(f, "partial"),
            SupportLevel::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub level: SupportLevel,
    pub caveat: &'static str,
}

impl Capability {
    const fn full() -> Self {
        Self {
            level: SupportLevel::Full,
            caveat: "",
        }
    }

    const fn partial(caveat: &'static str) -> Self {
        Self {
            level: SupportLevel::Partial,
            caveat,
        }
    }

    const fn none(caveat: &'static str) -> Self {
        Self {
            level: SupportLevel::None,
            caveat,
        }
    }
}

/// Features the matrix is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    WeightedTargets,
    LoadBalancing(LoadBalanceAlgorithm),
    ActiveHealthCheck,
    PassiveHealthCheck,
    CircuitBreaker,
    MethodMatch,
    BasicAuth,
    ApiKeyAuth,
    JwtAuth,
    RateLimit,
    RateLimitBurst,
    PerClientRateLimit,
    Cors,
    RequestHeaders,
    ResponseHeaders,
    HeaderTemplates,
    Mirroring,
    TrafficSplit,
    Timeout,
    Retry,
    GrpcTransformation,
}

impl Feature {
    pub const ALL: [Feature; 24] = [
        Feature::WeightedTargets,
        Feature::LoadBalancing(LoadBalanceAlgorithm::RoundRobin),
        Feature::LoadBalancing(LoadBalanceAlgorithm::LeastConn),
        Feature::LoadBalancing(LoadBalanceAlgorithm::IpHash),
        Feature::LoadBalancing(LoadBalanceAlgorithm::Weighted),
        Feature::ActiveHealthCheck,
        Feature::PassiveHealthCheck,
        Feature::CircuitBreaker,
        Feature::MethodMatch,
        Feature::BasicAuth,
        Feature::ApiKeyAuth,
        Feature::JwtAuth,
        Feature::RateLimit,
        Feature::RateLimitBurst,
        Feature::PerClientRateLimit,
        Feature::Cors,
        Feature::RequestHeaders,
        Feature::ResponseHeaders,
        Feature::HeaderTemplates,
        Feature::Mirroring,
        Feature::TrafficSplit,
        Feature::Timeout,
        Feature::Retry,
        Feature::GrpcTransformation,
    ];

    /// Dotted model path used in diagnostics.
    pub fn path(&self) -> String {
        match self {
            Feature::WeightedTargets => "upstream.targets.weight".to_string(),
            Feature::LoadBalancing(algorithm) => {
                format!("upstream.loadBalancer.{}", algorithm.as_str())
            }
            Feature::ActiveHealthCheck => "upstream.healthCheck.active".to_string(),
            Feature::PassiveHealthCheck => "upstream.healthCheck.passive".to_string(),
            Feature::CircuitBreaker => "upstream.circuitBreaker".to_string(),
            Feature::MethodMatch => "route.methods".to_string(),
            Feature::BasicAuth => "route.authentication.basic".to_string(),
            Feature::ApiKeyAuth => "route.authentication.apiKey".to_string(),
            Feature::JwtAuth => "route.authentication.jwt".to_string(),
            Feature::RateLimit => "route.rateLimit".to_string(),
            Feature::RateLimitBurst => "route.rateLimit.burst".to_string(),
            Feature::PerClientRateLimit => "route.rateLimit.keyType".to_string(),
            Feature::Cors => "route.cors".to_string(),
            Feature::RequestHeaders => "route.headers.request".to_string(),
            Feature::ResponseHeaders => "route.headers.response".to_string(),
            Feature::HeaderTemplates => "route.headers.templates".to_string(),
            Feature::Mirroring => "route.mirroring".to_string(),
            Feature::TrafficSplit => "route.trafficSplit".to_string(),
            Feature::Timeout => "route.timeout".to_string(),
            Feature::Retry => "route.retry".to_string(),
            Feature::GrpcTransformation => "route.grpcTransformation".to_string(),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

const HTPASSWD_HASHED: &str =
    "passwords are rendered as {SHA} htpasswd hashes and cannot be recovered on import";
const SINGLE_INTEGRATION: &str =
    "HTTP API integrations address a single endpoint; only the first target is used";

/// Read-only lookup over the static matrix.
pub struct CapabilityMatrix;

impl CapabilityMatrix {
    pub fn support_level(provider: ProviderId, feature: Feature) -> Capability {
        match provider {
            ProviderId::Nginx => Self::nginx(feature),
            ProviderId::Envoy => Self::envoy(feature),
            ProviderId::Kong => Self::kong(feature),
            ProviderId::Traefik => Self::traefik(feature),
            ProviderId::Apisix => Self::apisix(feature),
            ProviderId::Istio => Self::istio(feature),
            ProviderId::AwsApiGateway => Self::aws(feature),
        }
    }

    /// Every feature with its capability for one dialect, in display order.
    pub fn rows(provider: ProviderId) -> Vec<(Feature, Capability)> {
        Feature::ALL
            .into_iter()
            .map(|feature| (feature, Self::support_level(provider, feature)))
            .collect()
    }

    fn nginx(feature: Feature) -> Capability {
        use LoadBalanceAlgorithm as Lb;
        match feature {
            Feature::WeightedTargets => Capability::full(),
            Feature::LoadBalancing(Lb::RoundRobin | Lb::LeastConn | Lb::IpHash | Lb::Weighted) => {
                Capability::full()
            }
            Feature::ActiveHealthCheck => {
                Capability::none("active health checks require NGINX Plus")
            }
            Feature::PassiveHealthCheck => Capability::partial(
                "only 403, 404, 429, 500, 502, 503 and 504 can be counted as failures",
            ),
            Feature::CircuitBreaker => {
                Capability::partial("approximated with max_fails/fail_timeout on every server")
            }
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::partial(
                "credentials must be provisioned in the referenced htpasswd file",
            ),
            Feature::ApiKeyAuth => {
                Capability::partial("only the presence of the key is enforced, not its value")
            }
            Feature::JwtAuth => Capability::none("auth_jwt requires NGINX Plus"),
            Feature::RateLimit | Feature::RateLimitBurst | Feature::PerClientRateLimit => {
                Capability::full()
            }
            Feature::Cors => Capability::partial(
                "rendered as static add_header directives; preflight requests are answered inline",
            ),
            Feature::RequestHeaders | Feature::ResponseHeaders | Feature::HeaderTemplates => {
                Capability::full()
            }
            Feature::Mirroring => {
                Capability::partial("mirror copies every request; percentages are ignored")
            }
            Feature::TrafficSplit | Feature::Timeout => Capability::full(),
            Feature::Retry => Capability::partial("retry backoff is not configurable"),
            Feature::GrpcTransformation => {
                Capability::partial("requires OpenResty with the lua-protobuf module")
            }
        }
    }

    fn envoy(feature: Feature) -> Capability {
        match feature {
            Feature::WeightedTargets | Feature::LoadBalancing(_) => Capability::full(),
            Feature::ActiveHealthCheck => Capability::full(),
            Feature::PassiveHealthCheck => Capability::partial(
                "outlier detection counts consecutive 5xx responses; individual status codes are not selectable",
            ),
            Feature::CircuitBreaker => {
                Capability::partial("mapped to outlier detection ejection over the window")
            }
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::partial(HTPASSWD_HASHED),
            Feature::ApiKeyAuth => {
                Capability::none("no stable built-in filter validates API keys")
            }
            Feature::JwtAuth => Capability::full(),
            Feature::RateLimit | Feature::RateLimitBurst => Capability::full(),
            Feature::PerClientRateLimit => Capability::none(
                "local rate limiting shares one token bucket across all clients of a route",
            ),
            Feature::Cors
            | Feature::RequestHeaders
            | Feature::ResponseHeaders
            | Feature::HeaderTemplates
            | Feature::Mirroring
            | Feature::TrafficSplit
            | Feature::Timeout
            | Feature::Retry => Capability::full(),
            Feature::GrpcTransformation => Capability::partial(
                "requires the lua-protobuf module on Envoy's Lua package path",
            ),
        }
    }

    fn kong(feature: Feature) -> Capability {
        match feature {
            Feature::WeightedTargets | Feature::LoadBalancing(_) => Capability::full(),
            Feature::ActiveHealthCheck | Feature::PassiveHealthCheck => Capability::full(),
            Feature::CircuitBreaker => Capability::partial(
                "approximated with passive health checks; the window is not modeled",
            ),
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::partial(
                "credentials become global consumers shared by every basic-auth route",
            ),
            Feature::ApiKeyAuth => Capability::full(),
            Feature::JwtAuth => Capability::partial(
                "the jwt plugin verifies consumer secrets; the JWKS URI is not fetched",
            ),
            Feature::RateLimit => Capability::full(),
            Feature::RateLimitBurst => {
                Capability::none("rate-limiting enforces fixed windows without burst")
            }
            Feature::PerClientRateLimit => Capability::full(),
            Feature::Cors | Feature::RequestHeaders | Feature::ResponseHeaders => {
                Capability::full()
            }
            Feature::HeaderTemplates => Capability::partial(
                "{{uuid}} is produced by the correlation-id plugin; {{timestamp}} has no equivalent",
            ),
            Feature::Mirroring => Capability::none("request mirroring is not available in Kong OSS"),
            Feature::TrafficSplit => {
                Capability::none("canary traffic splitting requires Kong Enterprise")
            }
            Feature::Timeout => Capability::partial(
                "the idle timeout has no equivalent; write_timeout reuses the read timeout",
            ),
            Feature::Retry => Capability::partial("only the attempt count is honored"),
            Feature::GrpcTransformation => Capability::full(),
        }
    }

    fn traefik(feature: Feature) -> Capability {
        use LoadBalanceAlgorithm as Lb;
        match feature {
            Feature::WeightedTargets => Capability::full(),
            Feature::LoadBalancing(Lb::RoundRobin | Lb::Weighted) => Capability::full(),
            Feature::LoadBalancing(Lb::LeastConn) => {
                Capability::partial("approximated with the p2c strategy")
            }
            Feature::LoadBalancing(Lb::IpHash) => {
                Capability::partial("approximated with sticky cookies")
            }
            Feature::ActiveHealthCheck => {
                Capability::partial("healthy/unhealthy thresholds are not configurable")
            }
            Feature::PassiveHealthCheck => {
                Capability::none("passive health checks are not available")
            }
            Feature::CircuitBreaker => Capability::partial(
                "rendered as a response-code ratio expression over the window",
            ),
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::partial(HTPASSWD_HASHED),
            Feature::ApiKeyAuth | Feature::JwtAuth => {
                Capability::none("requires a forwardAuth service or a third-party plugin")
            }
            Feature::RateLimit
            | Feature::RateLimitBurst
            | Feature::PerClientRateLimit
            | Feature::Cors
            | Feature::RequestHeaders
            | Feature::ResponseHeaders => Capability::full(),
            Feature::HeaderTemplates => {
                Capability::none("the headers middleware only sets static values")
            }
            Feature::Mirroring | Feature::TrafficSplit | Feature::Timeout => Capability::full(),
            Feature::Retry => Capability::partial("retryOn conditions are not configurable"),
            Feature::GrpcTransformation => {
                Capability::none("Traefik has no scripting facility for message rewriting")
            }
        }
    }

    fn apisix(feature: Feature) -> Capability {
        match feature {
            Feature::WeightedTargets | Feature::LoadBalancing(_) => Capability::full(),
            Feature::ActiveHealthCheck | Feature::PassiveHealthCheck => Capability::full(),
            Feature::CircuitBreaker => Capability::partial(
                "api-breaker counts consecutive failures; the window becomes max_breaker_sec",
            ),
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::partial(
                "credentials become global consumers shared by every basic-auth route",
            ),
            Feature::ApiKeyAuth => Capability::full(),
            Feature::JwtAuth => Capability::partial(
                "verified with openid-connect discovery derived from the issuer",
            ),
            Feature::RateLimit
            | Feature::RateLimitBurst
            | Feature::PerClientRateLimit
            | Feature::Cors
            | Feature::RequestHeaders
            | Feature::ResponseHeaders
            | Feature::HeaderTemplates => Capability::full(),
            Feature::Mirroring => Capability::partial("only the first mirror target is used"),
            Feature::TrafficSplit => Capability::full(),
            Feature::Timeout => Capability::partial("the idle timeout has no equivalent"),
            Feature::Retry => Capability::partial("retryOn conditions are not configurable"),
            Feature::GrpcTransformation => Capability::full(),
        }
    }

    fn istio(feature: Feature) -> Capability {
        use LoadBalanceAlgorithm as Lb;
        match feature {
            Feature::WeightedTargets | Feature::LoadBalancing(Lb::Weighted) => {
                Capability::partial("destination weights are normalized to percentages")
            }
            Feature::LoadBalancing(Lb::RoundRobin | Lb::LeastConn | Lb::IpHash) => {
                Capability::full()
            }
            Feature::ActiveHealthCheck => {
                Capability::none("the mesh relies on Kubernetes probes for active checks")
            }
            Feature::PassiveHealthCheck => Capability::partial(
                "outlier detection counts consecutive 5xx errors; individual status codes are not selectable",
            ),
            Feature::CircuitBreaker => {
                Capability::partial("mapped to outlier detection over the window")
            }
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth | Feature::ApiKeyAuth => {
                Capability::none("the mesh only authenticates requests with JWTs")
            }
            Feature::JwtAuth => Capability::full(),
            Feature::RateLimit | Feature::RateLimitBurst | Feature::PerClientRateLimit => {
                Capability::none("rate limiting requires an EnvoyFilter outside the networking API")
            }
            Feature::Cors | Feature::RequestHeaders | Feature::ResponseHeaders => {
                Capability::full()
            }
            Feature::HeaderTemplates => {
                Capability::none("header operations only accept static values")
            }
            Feature::Mirroring | Feature::TrafficSplit => Capability::full(),
            Feature::Timeout => Capability::partial(
                "connect and idle timeouts live in the DestinationRule shared by all routes",
            ),
            Feature::Retry => Capability::partial("retry backoff is not configurable"),
            Feature::GrpcTransformation => {
                Capability::none("message rewriting requires an EnvoyFilter")
            }
        }
    }

    fn aws(feature: Feature) -> Capability {
        match feature {
            Feature::WeightedTargets | Feature::LoadBalancing(_) => {
                Capability::none(SINGLE_INTEGRATION)
            }
            Feature::ActiveHealthCheck | Feature::PassiveHealthCheck | Feature::CircuitBreaker => {
                Capability::none("integration health is managed by the cloud provider")
            }
            Feature::MethodMatch => Capability::full(),
            Feature::BasicAuth => Capability::none("requires a Lambda authorizer"),
            Feature::ApiKeyAuth => Capability::none("HTTP APIs do not support API keys"),
            Feature::JwtAuth => Capability::full(),
            Feature::RateLimit | Feature::RateLimitBurst => Capability::full(),
            Feature::PerClientRateLimit => {
                Capability::none("stage throttling applies to all clients of a route")
            }
            Feature::Cors => Capability::partial(
                "CORS is configured once per API; the first route's policy is applied",
            ),
            Feature::RequestHeaders | Feature::HeaderTemplates => Capability::full(),
            Feature::ResponseHeaders => Capability::partial(
                "response parameter mappings are applied to 200 responses only",
            ),
            Feature::Mirroring => Capability::none("request mirroring is not available"),
            Feature::TrafficSplit => {
                Capability::none("canary deployments split traffic per stage, not per route")
            }
            Feature::Timeout => Capability::partial(
                "only the integration timeout (at most 30s) is configurable",
            ),
            Feature::Retry => Capability::none("integrations are not retried"),
            Feature::GrpcTransformation => {
                Capability::none("HTTP APIs do not proxy gRPC payloads")
            }
        }
    }
}
