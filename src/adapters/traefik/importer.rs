use std::time::Duration;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::model::{Router, ServersLoadBalancer, TraefikConfig, TraefikService};
use crate::{
    adapters::common::{
        DOCUMENT_SCOPE, from_yaml, parse_duration, parse_htpasswd, round_robin_for, split_url,
        strings_at, value_duration,
    },
    config::models::{
        ActiveHealthCheck, Authentication, BasicUser, CircuitBreaker, Cors, Endpoint,
        GatewayConfig, HealthCheck, Headers, HttpMethod, LoadBalanceAlgorithm, LoadBalancer,
        Mirroring, RateLimit, RateLimitKey, Retry, Route, Service, Target, TemplateValue,
        Timeout, TrafficSplit, TransportProtocol, Upstream, WeightedDestination,
    },
    core::{
        diagnostics::{Diagnostics, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateResult, Translation},
    utils::names::parse_route_name,
};

static MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w+)\(([^)]*)\)").expect("invalid matcher regex"));
static CHILD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.+?-\d+-(.+)$").expect("invalid child name regex"));

/// Parses Traefik dynamic configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraefikImporter;

/// Matchers of a router rule as `(name, arguments)` pairs.
pub fn parse_rule(rule: &str) -> Vec<(String, Vec<String>)> {
    MATCHER
        .captures_iter(rule)
        .map(|caps| {
            let args = caps[2]
                .split(',')
                .map(|a| a.trim().trim_matches(|c| c == '`' || c == '"').to_string())
                .filter(|a| !a.is_empty())
                .collect();
            (caps[1].to_string(), args)
        })
        .collect()
}

/// Strip a `@provider` suffix from a reference.
fn local_name(reference: &str) -> &str {
    reference.split('@').next().unwrap_or(reference)
}

struct ImportState<'a> {
    http: &'a super::model::HttpSection,
    diagnostics: Diagnostics,
}

/// What a router's service resolves to.
#[derive(Default)]
struct Resolved {
    base: Option<String>,
    split: Vec<WeightedDestination>,
    mirrors: Vec<WeightedDestination>,
}

impl ImportState<'_> {
    fn endpoint_of(&self, name: &str) -> Option<Endpoint> {
        let service = self.http.services.get(local_name(name))?;
        let server = service.load_balancer.as_ref()?.servers.first()?;
        let (_, host, port) = split_url(&server.url)?;
        Some(Endpoint { host, port })
    }

    fn resolve(&mut self, name: &str, scope: &str, resolved: &mut Resolved) {
        let http = self.http;
        let Some(service) = http.services.get(local_name(name)) else {
            self.diagnostics.warning(
                scope,
                "router.service",
                format!("router references unknown service '{name}'"),
            );
            return;
        };
        if let Some(mirroring) = &service.mirroring {
            for mirror in &mirroring.mirrors {
                match self.endpoint_of(&mirror.name) {
                    Some(upstream) => resolved.mirrors.push(WeightedDestination {
                        name: short_name(&mirror.name),
                        weight: mirror.percent,
                        upstream,
                        extra_headers: IndexMap::new(),
                    }),
                    None => self.diagnostics.warning(
                        scope,
                        "route.mirroring",
                        format!("mirror '{}' is not a single-server service and was dropped", mirror.name),
                    ),
                }
            }
            self.resolve(&mirroring.service, scope, resolved);
        } else if let Some(weighted) = &service.weighted {
            for child in &weighted.services {
                match self.endpoint_of(&child.name) {
                    Some(upstream) => resolved.split.push(WeightedDestination {
                        name: short_name(&child.name),
                        weight: child.weight,
                        upstream,
                        extra_headers: IndexMap::new(),
                    }),
                    None => self.diagnostics.warning(
                        scope,
                        "route.trafficSplit",
                        format!("split service '{}' is not a single-server service and was dropped", child.name),
                    ),
                }
            }
            // traffic goes to the split; the first child names the base
            if resolved.base.is_none() {
                resolved.base = weighted.services.first().map(|c| local_name(&c.name).to_string());
            }
        } else {
            resolved.base = Some(local_name(name).to_string());
        }
    }

    fn upstream(&mut self, name: &str, lb: &ServersLoadBalancer, scope: &str) -> (Upstream, TransportProtocol) {
        let mut transport = TransportProtocol::Http;
        let mut targets = Vec::new();
        for server in &lb.servers {
            match split_url(&server.url) {
                Some((scheme, host, port)) => {
                    transport = match scheme.as_str() {
                        "https" => TransportProtocol::Https,
                        "h2c" => TransportProtocol::Http2,
                        _ => TransportProtocol::Http,
                    };
                    targets.push(Target::new(host, port, server.weight.unwrap_or(1)));
                }
                None => self.diagnostics.warning(
                    scope,
                    "upstream.targets",
                    format!("server url '{}' of '{name}' is invalid and was dropped", server.url),
                ),
            }
        }
        let mut upstream = Upstream::with_targets(targets);
        upstream.load_balancer = if lb.sticky.is_some() {
            Some(LoadBalancer {
                algorithm: LoadBalanceAlgorithm::IpHash,
            })
        } else {
            match lb.strategy.as_deref() {
                None => None,
                Some("wrr") => Some(round_robin_for(&upstream.targets)),
                Some("p2c") => Some(LoadBalancer {
                    algorithm: LoadBalanceAlgorithm::LeastConn,
                }),
                Some(other) => {
                    self.diagnostics.warning(
                        scope,
                        "upstream.loadBalancer",
                        format!("strategy '{other}' is unknown; the default is used"),
                    );
                    None
                }
            }
        };
        if let Some(check) = &lb.health_check {
            let defaults = ActiveHealthCheck::default();
            upstream.health_check = Some(HealthCheck {
                active: Some(ActiveHealthCheck {
                    path: check.path.clone(),
                    interval: check
                        .interval
                        .as_deref()
                        .and_then(parse_duration)
                        .unwrap_or(defaults.interval),
                    timeout: check
                        .timeout
                        .as_deref()
                        .and_then(parse_duration)
                        .unwrap_or(defaults.timeout),
                    ..defaults
                }),
                passive: None,
            });
        }
        (upstream, transport)
    }

    fn route(&mut self, router_name: &str, router: &Router, service: &mut Service, resolved: Resolved) -> Route {
        let index = service.routes.len();
        let matchers = parse_rule(&router.rule);
        let prefix = matchers
            .iter()
            .find(|(name, _)| name == "PathPrefix" || name == "Path")
            .and_then(|(_, args)| args.first().cloned())
            .unwrap_or_else(|| "/".to_string());
        let scope = route_scope(&service.name, index, &prefix);

        let mut route = Route::new(prefix);
        let mut methods = std::collections::BTreeSet::new();
        for (name, args) in &matchers {
            match name.as_str() {
                "PathPrefix" => {}
                "Method" => {
                    for arg in args {
                        match arg.parse::<HttpMethod>() {
                            Ok(method) => {
                                methods.insert(method);
                            }
                            Err(message) => {
                                self.diagnostics.warning(&scope, "route.methods", message)
                            }
                        }
                    }
                }
                "Path" => self.diagnostics.warning(
                    &scope,
                    "route.pathPrefix",
                    "exact Path matcher is widened to a prefix",
                ),
                other => self.diagnostics.warning(
                    &scope,
                    format!("router.rule.{other}"),
                    format!("{router_name}: matcher {other} has no canonical equivalent and was dropped"),
                ),
            }
        }
        if !methods.is_empty() {
            route.methods = Some(methods);
        }
        if router.rule.contains("||") && route.methods.is_none() {
            self.diagnostics.warning(
                &scope,
                "router.rule",
                format!("{router_name}: alternative path matchers are reduced to the first one"),
            );
        }

        if !resolved.split.is_empty() {
            route.traffic_split = Some(TrafficSplit {
                targets: resolved.split,
            });
        }
        if !resolved.mirrors.is_empty() {
            route.mirroring = Some(Mirroring {
                targets: resolved.mirrors,
            });
        }

        for reference in &router.middlewares {
            let name = local_name(reference);
            let http = self.http;
            match http.middlewares.get(name) {
                Some(definition) => self.middleware(name, definition, &scope, &mut route, service),
                None => self.diagnostics.warning(
                    &scope,
                    "router.middlewares",
                    format!("middleware '{reference}' is not defined in this document"),
                ),
            }
        }
        if route.headers.as_ref().is_some_and(Headers::is_empty) {
            route.headers = None;
        }
        route
    }

    fn middleware(&mut self, name: &str, definition: &Value, scope: &str, route: &mut Route, service: &mut Service) {
        let Some((kind, config)) = definition.as_object().and_then(|o| o.iter().next()) else {
            return;
        };
        match kind.as_str() {
            "basicAuth" => {
                let users = strings_at(config, "users")
                    .iter()
                    .filter_map(|line| parse_htpasswd(line))
                    .map(|(username, password)| BasicUser { username, password })
                    .collect();
                self.diagnostics.warning(
                    scope,
                    "route.authentication.basic",
                    "passwords are imported as their htpasswd hashes",
                );
                route.authentication = Some(Authentication::Basic { users });
            }
            "rateLimit" => {
                let average = config.get("average").and_then(Value::as_u64).unwrap_or(1);
                let period = config
                    .get("period")
                    .and_then(|p| value_duration(p))
                    .unwrap_or(Duration::from_secs(1));
                let secs = period.as_secs().max(1);
                if period != Duration::from_secs(1) {
                    self.diagnostics.warning(
                        scope,
                        "route.rateLimit",
                        format!("{name}: rate over {secs}s converted to requests per second"),
                    );
                }
                let rps = average.div_ceil(secs) as u32;
                let burst = config.get("burst").and_then(Value::as_u64).map_or(rps, |b| b as u32);
                let mut limit = RateLimit::per_ip(rps, burst.max(rps));
                if let Some(header) = config
                    .get("sourceCriterion")
                    .and_then(|c| c.get("requestHeaderName"))
                    .and_then(Value::as_str)
                {
                    limit.key_type = RateLimitKey::Header;
                    limit.key_header = Some(header.to_string());
                }
                route.rate_limit = Some(limit);
            }
            "headers" => {
                let object = config.as_object();
                let is_cors = object.is_some_and(|o| o.keys().any(|k| k.starts_with("accessControl")));
                if is_cors {
                    route.cors = Some(Cors {
                        allowed_origins: strings_at(config, "accessControlAllowOriginList"),
                        allowed_methods: strings_at(config, "accessControlAllowMethods"),
                        allowed_headers: strings_at(config, "accessControlAllowHeaders"),
                        expose_headers: strings_at(config, "accessControlExposeHeaders"),
                        allow_credentials: config
                            .get("accessControlAllowCredentials")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        max_age_seconds: config.get("accessControlMaxAge").and_then(Value::as_u64),
                    });
                }
                let headers = route.headers.get_or_insert_with(Headers::default);
                for (section, response) in [("customRequestHeaders", false), ("customResponseHeaders", true)] {
                    let Some(entries) = config.get(section).and_then(Value::as_object) else {
                        continue;
                    };
                    for (header, value) in entries {
                        let value = value.as_str().unwrap_or_default();
                        match (value.is_empty(), response) {
                            (true, false) => headers.request_remove.push(header.clone()),
                            (true, true) => headers.response_remove.push(header.clone()),
                            (false, false) => {
                                headers.request_add.insert(header.clone(), TemplateValue::literal(value));
                            }
                            (false, true) => {
                                headers.response_add.insert(header.clone(), TemplateValue::literal(value));
                            }
                        }
                    }
                }
                for key in object.into_iter().flat_map(|o| o.keys()).filter(|k| {
                    !k.starts_with("accessControl")
                        && *k != "customRequestHeaders"
                        && *k != "customResponseHeaders"
                }) {
                    self.diagnostics.warning(
                        scope,
                        format!("middlewares.headers.{key}"),
                        format!("{name}: header option '{key}' has no canonical equivalent and was dropped"),
                    );
                }
            }
            "retry" => {
                route.retry = Some(Retry {
                    attempts: config.get("attempts").and_then(Value::as_u64).unwrap_or(1) as u32,
                    backoff: config
                        .get("initialInterval")
                        .and_then(value_duration),
                    retry_on: Vec::new(),
                });
            }
            "circuitBreaker" => {
                if service.upstream.circuit_breaker.is_none() {
                    let window = config
                        .get("fallbackDuration")
                        .and_then(value_duration)
                        .unwrap_or(Duration::from_secs(10));
                    if config.get("expression").and_then(Value::as_str)
                        != Some(super::exporter::BREAKER_EXPRESSION)
                    {
                        self.diagnostics.warning(
                            scope,
                            "upstream.circuitBreaker",
                            format!("{name}: breaker expression is approximated by 5 consecutive failures"),
                        );
                    }
                    service.upstream.circuit_breaker = Some(CircuitBreaker {
                        max_failures: 5,
                        window,
                        unhealthy_status_codes: Vec::new(),
                    });
                }
            }
            other => self.diagnostics.warning(
                scope,
                format!("middlewares.{other}"),
                format!("{name}: middleware type '{other}' has no canonical equivalent and was dropped"),
            ),
        }
    }
}

/// Destination name without the `<service>-<index>-` prefix the exporter adds.
fn short_name(reference: &str) -> String {
    let local = local_name(reference);
    CHILD_NAME
        .captures(local)
        .map_or_else(|| local.to_string(), |caps| caps[1].to_string())
}

impl Importer for TraefikImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Traefik
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "traefik"))]
    fn import(&self, native: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let document: TraefikConfig = from_yaml(ProviderId::Traefik, native)?;
        let mut state = ImportState {
            http: &document.http,
            diagnostics: Diagnostics::new(),
        };
        let mut config = GatewayConfig::new();
        config.provider_hint = Some(ProviderId::Traefik.to_string());

        let mut passthrough: serde_json::Map<String, Value> = document
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !document.http.extra.is_empty() {
            passthrough.insert(
                "http".to_string(),
                Value::Object(document.http.extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            );
        }
        if !passthrough.is_empty() {
            config
                .global_config
                .insert(ProviderId::Traefik.to_string(), Value::Object(passthrough));
        }

        let mut services: IndexMap<String, Service> = IndexMap::new();
        for (router_name, router) in &document.http.routers {
            let mut resolved = Resolved::default();
            state.resolve(&router.service, DOCUMENT_SCOPE, &mut resolved);
            // generated routers are named after their service
            let generated = parse_route_name(router_name)
                .map(|(service, _)| service.to_string())
                .filter(|service| {
                    document
                        .http
                        .services
                        .get(service)
                        .is_some_and(|s| s.load_balancer.is_some())
                });
            let Some(base) = generated.or_else(|| resolved.base.clone()) else {
                continue;
            };
            let Some(lb) = document
                .http
                .services
                .get(&base)
                .and_then(|s: &TraefikService| s.load_balancer.as_ref())
            else {
                continue;
            };
            if !services.contains_key(&base) {
                let scope = service_scope(&base);
                let (upstream, transport) = state.upstream(&base, lb, &scope);
                let mut service = Service::new(&base, upstream);
                service.transport_protocol = transport;
                services.insert(base.clone(), service);
            }
            let Some(service) = services.get_mut(&base) else { continue };
            let mut route = state.route(router_name, router, service, resolved);
            if let Some(timeouts) = lb
                .servers_transport
                .as_deref()
                .and_then(|t| document.http.servers_transports.get(local_name(t)))
                .and_then(|t| t.forwarding_timeouts.as_ref())
            {
                let timeout = Timeout {
                    connect: timeouts.dial_timeout.as_deref().and_then(parse_duration),
                    read: timeouts.response_header_timeout.as_deref().and_then(parse_duration),
                    idle: timeouts.idle_conn_timeout.as_deref().and_then(parse_duration),
                };
                if timeout != Timeout::default() {
                    route.timeout = Some(timeout);
                }
            }
            service.routes.push(route);
        }

        config.services = services.into_values().collect();
        tracing::debug!(services = config.services.len(), "imported traefik document");
        Ok(Translation::new(config, state.diagnostics))
    }
}
