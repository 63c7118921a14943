//! Per-export bookkeeping shared by every exporter.
//!
//! An [`ExportContext`] checks cross references, runs the validator, gates
//! every feature used by a surviving service or route through the capability
//! matrix (so unsupported features are always reported), and carries the
//! diagnostics until the exporter finishes.
use crate::{
    config::{
        models::{
            Authentication, GatewayConfig, LoadBalanceAlgorithm, Route, Service, TemplateValue,
            Upstream,
        },
        validation::{ConfigValidator, ValidationReport},
    },
    core::{
        capability::{CapabilityMatrix, Feature, SupportLevel},
        diagnostics::{Diagnostics, Severity, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{TranslateError, TranslateResult, Translation},
};

/// Features an upstream makes use of.
pub fn upstream_features(upstream: &Upstream) -> Vec<Feature> {
    let mut features = Vec::new();
    let weights_differ = upstream.targets.windows(2).any(|w| w[0].weight != w[1].weight);
    let algorithm = upstream.algorithm();
    if weights_differ || algorithm == Some(LoadBalanceAlgorithm::Weighted) {
        features.push(Feature::WeightedTargets);
    }
    if let Some(algorithm) = algorithm {
        features.push(Feature::LoadBalancing(algorithm));
    }
    if let Some(health_check) = &upstream.health_check {
        if health_check.active.is_some() {
            features.push(Feature::ActiveHealthCheck);
        }
        if health_check.passive.is_some() {
            features.push(Feature::PassiveHealthCheck);
        }
    }
    if upstream.circuit_breaker.is_some() {
        features.push(Feature::CircuitBreaker);
    }
    features
}

/// Features a route makes use of.
pub fn route_features(route: &Route) -> Vec<Feature> {
    let mut features = Vec::new();
    if route.methods.is_some() {
        features.push(Feature::MethodMatch);
    }
    match &route.authentication {
        Some(Authentication::Basic { .. }) => features.push(Feature::BasicAuth),
        Some(Authentication::ApiKey { .. }) => features.push(Feature::ApiKeyAuth),
        Some(Authentication::Jwt { .. }) => features.push(Feature::JwtAuth),
        Some(Authentication::None) | None => {}
    }
    if let Some(rate_limit) = &route.rate_limit {
        features.push(Feature::RateLimit);
        if rate_limit.burst > rate_limit.requests_per_second {
            features.push(Feature::RateLimitBurst);
        }
        features.push(Feature::PerClientRateLimit);
    }
    if route.cors.is_some() {
        features.push(Feature::Cors);
    }
    if let Some(headers) = &route.headers {
        if !headers.request_add.is_empty() || !headers.request_remove.is_empty() {
            features.push(Feature::RequestHeaders);
        }
        if !headers.response_add.is_empty() || !headers.response_remove.is_empty() {
            features.push(Feature::ResponseHeaders);
        }
        if headers.uses_templates() {
            features.push(Feature::HeaderTemplates);
        }
    }
    if route.mirroring.as_ref().is_some_and(|m| !m.targets.is_empty()) {
        features.push(Feature::Mirroring);
    }
    if route.traffic_split.is_some() {
        features.push(Feature::TrafficSplit);
    }
    if route.timeout.is_some() {
        features.push(Feature::Timeout);
    }
    if route.retry.is_some() {
        features.push(Feature::Retry);
    }
    if route.grpc_transformation.is_some() {
        features.push(Feature::GrpcTransformation);
    }
    features
}

pub struct ExportContext<'a> {
    provider: ProviderId,
    config: &'a GatewayConfig,
    report: ValidationReport,
    diagnostics: Diagnostics,
}

impl<'a> ExportContext<'a> {
    /// Prepare an export of `config` to `provider`.
    ///
    /// Fails only when a gRPC route names a proto descriptor that does not
    /// exist; every other problem becomes a diagnostic.
    pub fn new(provider: ProviderId, config: &'a GatewayConfig) -> TranslateResult<Self> {
        for service in &config.services {
            for (index, route) in service.routes.iter().enumerate() {
                if let Some(grpc) = &route.grpc_transformation {
                    if config.find_descriptor(&grpc.proto_descriptor_ref).is_none() {
                        return Err(TranslateError::MissingReference {
                            referrer: route_scope(&service.name, index, &route.path_prefix),
                            name: grpc.proto_descriptor_ref.clone(),
                        });
                    }
                }
            }
        }

        let mut report = ConfigValidator::report(config);
        let diagnostics = std::mem::take(&mut report.diagnostics);
        let mut context = Self {
            provider,
            config,
            report,
            diagnostics,
        };
        context.gate_all();
        Ok(context)
    }

    fn gate_all(&mut self) {
        let config = self.config;
        for service in &config.services {
            if self.report.is_service_rejected(&service.name) {
                self.diagnostics.info(
                    service_scope(&service.name),
                    "service",
                    "service skipped because of validation errors",
                );
                continue;
            }
            let scope = service_scope(&service.name);
            for feature in upstream_features(&service.upstream) {
                self.gate(&scope, feature);
            }
            for (index, route) in service.routes.iter().enumerate() {
                let scope = route_scope(&service.name, index, &route.path_prefix);
                if self.report.is_route_rejected(&service.name, index) {
                    self.diagnostics
                        .info(scope, "route", "route skipped because of validation errors");
                    continue;
                }
                for feature in route_features(route) {
                    self.gate(&scope, feature);
                }
            }
        }
    }

    /// Record a `partial`/`none` capability as a warning naming the feature.
    fn gate(&mut self, scope: &str, feature: Feature) -> SupportLevel {
        let capability = CapabilityMatrix::support_level(self.provider, feature);
        match capability.level {
            SupportLevel::Full => {
                tracing::trace!(provider = %self.provider, %feature, "rendered natively");
            }
            SupportLevel::Partial => self.diagnostics.warning(
                scope,
                feature.path(),
                format!("approximated for {}: {}", self.provider, capability.caveat),
            ),
            SupportLevel::None => self.diagnostics.warning(
                scope,
                feature.path(),
                format!("omitted for {}: {}", self.provider, capability.caveat),
            ),
        }
        capability.level
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn config(&self) -> &'a GatewayConfig {
        self.config
    }

    /// Support level of `feature` for this dialect. Never emits diagnostics;
    /// the gating pass already reported the gap.
    pub fn level(&self, feature: Feature) -> SupportLevel {
        CapabilityMatrix::support_level(self.provider, feature).level
    }

    /// True unless the dialect has no support at all for `feature`.
    pub fn allows(&self, feature: Feature) -> bool {
        self.level(feature) != SupportLevel::None
    }

    /// Services that passed validation, in document order.
    pub fn services(&self) -> Vec<&'a Service> {
        self.config
            .services
            .iter()
            .filter(|s| !self.report.is_service_rejected(&s.name))
            .collect()
    }

    /// Routes of `service` that passed validation, with their index.
    pub fn routes(&self, service: &'a Service) -> Vec<(usize, &'a Route)> {
        service
            .routes
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.report.is_route_rejected(&service.name, *i))
            .collect()
    }

    /// Provider-specific passthrough from `globalConfig`, if any.
    pub fn global_config(&self) -> Option<&'a serde_json::Value> {
        self.config.global_config.get(self.provider.as_str())
    }

    /// Resolve a template value with the dialect's runtime expression, or
    /// warn and return `None` when the dialect has none.
    pub fn template(
        &mut self,
        scope: &str,
        name: &str,
        value: &TemplateValue,
        runtime: impl Fn(&TemplateValue) -> Option<String>,
    ) -> Option<String> {
        match value {
            TemplateValue::Literal(text) => Some(text.clone()),
            dynamic => match runtime(dynamic) {
                Some(expression) => Some(expression),
                None => {
                    self.diagnostics.warning(
                        scope,
                        Feature::HeaderTemplates.path(),
                        format!(
                            "{name}: {dynamic} has no runtime equivalent in {}; header omitted",
                            self.provider
                        ),
                    );
                    None
                }
            },
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn info(&mut self, scope: &str, feature_path: &str, message: impl Into<String>) {
        self.diagnostics.info(scope, feature_path, message);
    }

    pub fn warn(&mut self, scope: &str, feature_path: &str, message: impl Into<String>) {
        self.diagnostics.warning(scope, feature_path, message);
    }

    pub fn error(&mut self, scope: &str, feature_path: &str, message: impl Into<String>) {
        self.diagnostics.push(Severity::Error, scope, feature_path, message);
    }

    /// Pair the rendered artifact with the accumulated diagnostics.
    pub fn finish(self, output: String) -> Translation<String> {
        tracing::info!(
            provider = %self.provider,
            warnings = self.diagnostics.count(Severity::Warning),
            errors = self.diagnostics.count(Severity::Error),
            "export finished"
        );
        Translation::new(output, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{
        GrpcTransformation, HttpMethod, Mirroring, RateLimit, Target, TrafficSplit,
    };

    fn weighted_config() -> GatewayConfig {
        let mut upstream =
            Upstream::with_targets(vec![Target::new("a", 8080, 2), Target::new("b", 8080, 1)]);
        upstream.load_balancer = Some(crate::config::models::LoadBalancer {
            algorithm: LoadBalanceAlgorithm::Weighted,
        });
        let mut service = Service::new("users", upstream);
        let mut route = Route::new("/api").with_methods([HttpMethod::Get]);
        route.rate_limit = Some(RateLimit::per_ip(100, 200));
        service.routes.push(route);
        let mut config = GatewayConfig::new();
        config.services.push(service);
        config
    }

    #[test]
    fn fully_supported_features_produce_no_warnings() {
        let config = weighted_config();
        let context = ExportContext::new(ProviderId::Apisix, &config).unwrap();
        assert!(context.diagnostics().is_empty());
        assert_eq!(context.services().len(), 1);
    }

    #[test]
    fn unsupported_features_are_reported_by_path() {
        let config = weighted_config();
        let context = ExportContext::new(ProviderId::Istio, &config).unwrap();
        let diags = context.diagnostics();
        assert!(diags.mentions("upstream.targets.weight", Severity::Warning));
        assert!(diags.mentions("route.rateLimit", Severity::Warning));
    }

    #[test]
    fn missing_descriptor_reference_is_fatal() {
        let mut config = weighted_config();
        config.services[0].routes[0].grpc_transformation = Some(GrpcTransformation {
            proto_descriptor_ref: "missing".to_string(),
            package: "auth.v1".to_string(),
            service: "AuthService".to_string(),
            request_type: "LoginRequest".to_string(),
            response_type: "LoginResponse".to_string(),
            request_transform: Default::default(),
            response_transform: Default::default(),
        });
        assert!(matches!(
            ExportContext::new(ProviderId::Kong, &config),
            Err(TranslateError::MissingReference { .. })
        ));
    }

    #[test]
    fn invalid_routes_are_skipped_but_siblings_survive() {
        let mut config = weighted_config();
        config.services[0].routes.push(Route::new("no-slash"));
        let context = ExportContext::new(ProviderId::Traefik, &config).unwrap();
        let service = context.services()[0];
        let routes = context.routes(service);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].0, 0);
        assert!(context.diagnostics().has_errors());
    }

    #[test]
    fn route_features_cover_mirroring_and_split() {
        let mut route = Route::new("/");
        route.mirroring = Some(Mirroring::default());
        route.traffic_split = Some(TrafficSplit::default());
        let features = route_features(&route);
        assert!(!features.contains(&Feature::Mirroring));
        assert!(features.contains(&Feature::TrafficSplit));
    }

    #[test]
    fn templates_without_runtime_equivalent_warn() {
        let config = weighted_config();
        let mut context = ExportContext::new(ProviderId::Traefik, &config).unwrap();
        let resolved = context.template("scope", "X-Id", &TemplateValue::Uuid, |_| None);
        assert!(resolved.is_none());
        assert!(
            context
                .diagnostics()
                .mentions("route.headers.templates", Severity::Warning)
        );
    }
}
