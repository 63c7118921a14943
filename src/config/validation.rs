#![allow(clippy::collapsible_if)]

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::models::{
        Authentication, Cors, GatewayConfig, GrpcTransformation, HealthCheck, Headers,
        KeyLocation, LoadBalanceAlgorithm, ProtoSource, RateLimit, RateLimitKey, Route, Service,
        ServiceKind, TransportProtocol, Upstream, WeightedDestination,
    },
    core::diagnostics::{Diagnostics, Severity, route_scope, service_scope},
    utils::names::is_valid_name,
};

static HEADER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[!#$%&'*+.^_`|~0-9A-Za-z-]+$").expect("invalid header regex"));

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-_]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-_]{0,61}[a-zA-Z0-9])?)*$")
        .expect("invalid hostname regex")
});

static PROTO_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.?[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("invalid proto identifier regex"));

/// Validation findings before they are lowered into diagnostics
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Suspicious configuration of '{field}': {message}")]
    Suspicious { field: String, message: String },
}

impl ValidationError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    fn suspicious(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::Suspicious {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a validation pass: the diagnostics plus the elements carrying
/// `error` findings, which exporters skip.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub diagnostics: Diagnostics,
    pub rejected_services: BTreeSet<String>,
    pub rejected_routes: BTreeSet<(String, usize)>,
}

impl ValidationReport {
    pub fn is_service_rejected(&self, service: &str) -> bool {
        self.rejected_services.contains(service)
    }

    pub fn is_route_rejected(&self, service: &str, index: usize) -> bool {
        self.rejected_services.contains(service)
            || self.rejected_routes.contains(&(service.to_string(), index))
    }
}

/// Collects findings under the scope currently being checked.
struct Findings<'a> {
    report: &'a mut ValidationReport,
    service: Option<String>,
    route: Option<usize>,
    scope: String,
}

impl Findings<'_> {
    fn reject(&mut self, feature_path: &str, error: ValidationError) {
        self.report
            .diagnostics
            .push(Severity::Error, &self.scope, feature_path, error.to_string());
        match (&self.service, self.route) {
            (Some(service), Some(index)) => {
                self.report.rejected_routes.insert((service.clone(), index));
            }
            (Some(service), None) => {
                self.report.rejected_services.insert(service.clone());
            }
            _ => {}
        }
    }

    fn caution(&mut self, feature_path: &str, error: ValidationError) {
        self.report
            .diagnostics
            .push(Severity::Warning, &self.scope, feature_path, error.to_string());
    }
}

/// Canonical model validator. Never mutates the model.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole document, returning every finding as a diagnostic.
    pub fn validate(config: &GatewayConfig) -> Diagnostics {
        Self::report(config).diagnostics
    }

    /// Validate the whole document and record which services and routes are
    /// unusable.
    pub fn report(config: &GatewayConfig) -> ValidationReport {
        let mut report = ValidationReport::default();

        {
            let mut findings = Findings {
                report: &mut report,
                service: None,
                route: None,
                scope: "config".to_string(),
            };
            Self::validate_document(config, &mut findings);
        }

        let mut seen = HashSet::new();
        for service in &config.services {
            let mut findings = Findings {
                report: &mut report,
                service: Some(service.name.clone()),
                route: None,
                scope: service_scope(&service.name),
            };
            if !seen.insert(service.name.as_str()) {
                findings.reject(
                    "service.name",
                    ValidationError::DuplicateName {
                        kind: "service",
                        name: service.name.clone(),
                    },
                );
            }
            Self::validate_service(config, service, &mut findings);
        }

        tracing::debug!(
            diagnostics = report.diagnostics.len(),
            rejected_services = report.rejected_services.len(),
            rejected_routes = report.rejected_routes.len(),
            "validation finished"
        );
        report
    }

    fn validate_document(config: &GatewayConfig, findings: &mut Findings<'_>) {
        if config.services.is_empty() {
            findings.caution(
                "services",
                ValidationError::suspicious("services", "the document declares no services"),
            );
        }

        let mut names = HashSet::new();
        for descriptor in &config.proto_descriptors {
            let field = format!("protoDescriptors[{}]", descriptor.name);
            if !names.insert(descriptor.name.as_str()) {
                findings.reject(
                    "protoDescriptors.name",
                    ValidationError::DuplicateName {
                        kind: "proto descriptor",
                        name: descriptor.name.clone(),
                    },
                );
            }
            match &descriptor.source {
                ProtoSource::File { path } if path.trim().is_empty() => {
                    findings.reject(
                        "protoDescriptors.source",
                        ValidationError::MissingField {
                            field: format!("{field}.source.path"),
                        },
                    );
                }
                ProtoSource::Inline { content } if content.trim().is_empty() => {
                    findings.reject(
                        "protoDescriptors.source",
                        ValidationError::MissingField {
                            field: format!("{field}.source.content"),
                        },
                    );
                }
                ProtoSource::Url { address } => {
                    if let Err(e) = Self::validate_url(address, &format!("{field}.source.address"))
                    {
                        findings.reject("protoDescriptors.source", e);
                    }
                }
                _ => {}
            }
        }
    }

    fn validate_service(config: &GatewayConfig, service: &Service, findings: &mut Findings<'_>) {
        if !is_valid_name(&service.name) {
            findings.reject(
                "service.name",
                ValidationError::invalid(
                    "name",
                    format!(
                        "'{}' must start with an alphanumeric character and contain only alphanumerics, '_' or '-'",
                        service.name
                    ),
                ),
            );
        }

        if service.kind == ServiceKind::Grpc && service.transport_protocol == TransportProtocol::Http
        {
            findings.caution(
                "service.transportProtocol",
                ValidationError::suspicious(
                    "transportProtocol",
                    "gRPC services are normally proxied over http2",
                ),
            );
        }

        Self::validate_upstream(&service.upstream, findings);

        for (index, route) in service.routes.iter().enumerate() {
            findings.route = Some(index);
            findings.scope = route_scope(&service.name, index, &route.path_prefix);
            Self::validate_route(config, route, findings);
        }

        findings.route = None;
        findings.scope = service_scope(&service.name);
        Self::check_route_conflicts(service, findings);
    }

    fn validate_upstream(upstream: &Upstream, findings: &mut Findings<'_>) {
        if upstream.targets.is_empty() {
            findings.reject(
                "upstream.targets",
                ValidationError::invalid("upstream.targets", "at least one target is required"),
            );
            return;
        }

        for (i, target) in upstream.targets.iter().enumerate() {
            let field = format!("upstream.targets[{i}]");
            if let Err(e) = Self::validate_host(&target.host, &field) {
                findings.reject("upstream.targets.host", e);
            }
            if target.port == 0 {
                findings.reject(
                    "upstream.targets.port",
                    ValidationError::invalid(format!("{field}.port"), "port must be greater than 0"),
                );
            }
        }

        let weights: Vec<u32> = upstream.targets.iter().map(|t| t.weight).collect();
        if weights.iter().all(|w| *w == 0) {
            findings.reject(
                "upstream.targets.weight",
                ValidationError::invalid(
                    "upstream.targets.weight",
                    "every target has weight 0, so no traffic can be routed",
                ),
            );
        } else if weights.contains(&0) {
            findings.caution(
                "upstream.targets.weight",
                ValidationError::suspicious(
                    "upstream.targets.weight",
                    "targets with weight 0 receive no traffic",
                ),
            );
        }

        if upstream.algorithm() == Some(LoadBalanceAlgorithm::Weighted)
            && weights.windows(2).all(|w| w[0] == w[1])
            && upstream.targets.len() > 1
        {
            findings.caution(
                "upstream.loadBalancer.weighted",
                ValidationError::suspicious(
                    "upstream.loadBalancer.algorithm",
                    "weighted balancing with equal weights behaves like round robin",
                ),
            );
        }

        if let Some(health_check) = &upstream.health_check {
            Self::validate_health_check(health_check, findings);
        }

        if let Some(breaker) = &upstream.circuit_breaker {
            if breaker.max_failures == 0 {
                findings.reject(
                    "upstream.circuitBreaker",
                    ValidationError::invalid(
                        "upstream.circuitBreaker.maxFailures",
                        "must be greater than 0",
                    ),
                );
            }
            if breaker.window.is_zero() {
                findings.reject(
                    "upstream.circuitBreaker",
                    ValidationError::invalid("upstream.circuitBreaker.window", "must be greater than 0"),
                );
            }
            Self::validate_status_codes(
                &breaker.unhealthy_status_codes,
                "upstream.circuitBreaker.unhealthyStatusCodes",
                "upstream.circuitBreaker",
                findings,
            );
        }
    }

    fn validate_health_check(health_check: &HealthCheck, findings: &mut Findings<'_>) {
        if let Some(active) = &health_check.active {
            let path = "upstream.healthCheck.active";
            if !active.path.starts_with('/') {
                findings.reject(
                    path,
                    ValidationError::invalid(format!("{path}.path"), "must start with '/'"),
                );
            }
            if active.interval.is_zero() {
                findings.reject(
                    path,
                    ValidationError::invalid(format!("{path}.interval"), "must be greater than 0"),
                );
            }
            if active.timeout.is_zero() {
                findings.reject(
                    path,
                    ValidationError::invalid(format!("{path}.timeout"), "must be greater than 0"),
                );
            } else if active.timeout >= active.interval {
                findings.caution(
                    path,
                    ValidationError::suspicious(
                        format!("{path}.timeout"),
                        "probe timeout is not shorter than the probe interval",
                    ),
                );
            }
            if active.healthy_threshold == 0 || active.unhealthy_threshold == 0 {
                findings.reject(
                    path,
                    ValidationError::invalid(
                        format!("{path}.healthyThreshold"),
                        "thresholds must be greater than 0",
                    ),
                );
            }
        }

        if let Some(passive) = &health_check.passive {
            let path = "upstream.healthCheck.passive";
            if passive.max_failures == 0 {
                findings.reject(
                    path,
                    ValidationError::invalid(format!("{path}.maxFailures"), "must be greater than 0"),
                );
            }
            Self::validate_status_codes(
                &passive.unhealthy_status_codes,
                &format!("{path}.unhealthyStatusCodes"),
                path,
                findings,
            );
        }
    }

    fn validate_route(config: &GatewayConfig, route: &Route, findings: &mut Findings<'_>) {
        if !route.path_prefix.starts_with('/') {
            findings.reject(
                "route.pathPrefix",
                ValidationError::invalid(
                    format!("pathPrefix: {}", route.path_prefix),
                    "route paths must start with '/'",
                ),
            );
        }

        if let Some(methods) = &route.methods {
            if methods.is_empty() {
                findings.reject(
                    "route.methods",
                    ValidationError::invalid(
                        "methods",
                        "an empty method list matches nothing; omit it to match every method",
                    ),
                );
            }
        }

        if let Some(auth) = &route.authentication {
            Self::validate_authentication(auth, findings);
        }
        if let Some(rate_limit) = &route.rate_limit {
            Self::validate_rate_limit(rate_limit, findings);
        }
        if let Some(cors) = &route.cors {
            Self::validate_cors(cors, findings);
        }
        if let Some(headers) = &route.headers {
            Self::validate_headers(headers, findings);
        }
        if let Some(mirroring) = &route.mirroring {
            Self::validate_destinations(&mirroring.targets, "route.mirroring", findings);
            for target in &mirroring.targets {
                if target.weight > 100 {
                    findings.reject(
                        "route.mirroring",
                        ValidationError::invalid(
                            format!("mirroring.targets[{}].weight", target.name),
                            "mirror weight is a percentage and must not exceed 100",
                        ),
                    );
                }
            }
        }
        if let Some(split) = &route.traffic_split {
            Self::validate_destinations(&split.targets, "route.trafficSplit", findings);
            if split.targets.is_empty() || split.targets.iter().all(|t| t.weight == 0) {
                findings.reject(
                    "route.trafficSplit",
                    ValidationError::invalid(
                        "trafficSplit.targets",
                        "a traffic split needs at least one target with a positive weight",
                    ),
                );
            }
        }
        if let Some(grpc) = &route.grpc_transformation {
            Self::validate_grpc(config, grpc, findings);
        }
        if let Some(timeout) = &route.timeout {
            for (name, value) in [
                ("connect", timeout.connect),
                ("read", timeout.read),
                ("idle", timeout.idle),
            ] {
                if value.is_some_and(|d| d.is_zero()) {
                    findings.reject(
                        "route.timeout",
                        ValidationError::invalid(format!("timeout.{name}"), "must be greater than 0"),
                    );
                }
            }
        }
        if let Some(retry) = &route.retry {
            if retry.attempts == 0 {
                findings.caution(
                    "route.retry",
                    ValidationError::suspicious("retry.attempts", "0 attempts disables retries"),
                );
            }
        }
    }

    fn validate_authentication(auth: &Authentication, findings: &mut Findings<'_>) {
        match auth {
            Authentication::None => {}
            Authentication::Basic { users } => {
                if users.is_empty() {
                    findings.reject(
                        "route.authentication.basic",
                        ValidationError::MissingField {
                            field: "authentication.users".to_string(),
                        },
                    );
                }
                for user in users {
                    if user.username.is_empty() || user.username.contains(':') {
                        findings.reject(
                            "route.authentication.basic",
                            ValidationError::invalid(
                                "authentication.users.username",
                                "usernames must be non-empty and must not contain ':'",
                            ),
                        );
                    }
                }
            }
            Authentication::ApiKey { key_name, location } => {
                if key_name.trim().is_empty() {
                    findings.reject(
                        "route.authentication.apiKey",
                        ValidationError::MissingField {
                            field: "authentication.keyName".to_string(),
                        },
                    );
                } else if *location == KeyLocation::Header && !HEADER_NAME.is_match(key_name) {
                    findings.reject(
                        "route.authentication.apiKey",
                        ValidationError::invalid(
                            "authentication.keyName",
                            format!("'{key_name}' is not a valid header name"),
                        ),
                    );
                }
            }
            Authentication::Jwt {
                issuer, jwks_uri, ..
            } => {
                if issuer.trim().is_empty() {
                    findings.reject(
                        "route.authentication.jwt",
                        ValidationError::MissingField {
                            field: "authentication.issuer".to_string(),
                        },
                    );
                }
                if let Err(e) = Self::validate_url(jwks_uri, "authentication.jwksUri") {
                    findings.reject("route.authentication.jwt", e);
                }
            }
        }
    }

    fn validate_rate_limit(rate_limit: &RateLimit, findings: &mut Findings<'_>) {
        if rate_limit.requests_per_second == 0 {
            findings.reject(
                "route.rateLimit",
                ValidationError::invalid(
                    "rateLimit.requestsPerSecond",
                    "rate limit must be greater than 0",
                ),
            );
        }
        if rate_limit.burst < rate_limit.requests_per_second {
            findings.reject(
                "route.rateLimit.burst",
                ValidationError::invalid(
                    "rateLimit.burst",
                    format!(
                        "burst {} must be at least requestsPerSecond {}",
                        rate_limit.burst, rate_limit.requests_per_second
                    ),
                ),
            );
        } else if rate_limit.burst == rate_limit.requests_per_second {
            findings.caution(
                "route.rateLimit.burst",
                ValidationError::suspicious(
                    "rateLimit.burst",
                    "burst equal to requestsPerSecond disables bursting",
                ),
            );
        }
        match (rate_limit.key_type, &rate_limit.key_header) {
            (RateLimitKey::Header, None) => findings.reject(
                "route.rateLimit.keyType",
                ValidationError::MissingField {
                    field: "rateLimit.keyHeader".to_string(),
                },
            ),
            (RateLimitKey::Header, Some(header)) if !HEADER_NAME.is_match(header) => findings
                .reject(
                    "route.rateLimit.keyType",
                    ValidationError::invalid(
                        "rateLimit.keyHeader",
                        format!("'{header}' is not a valid header name"),
                    ),
                ),
            (RateLimitKey::IpAddress, Some(_)) => findings.caution(
                "route.rateLimit.keyType",
                ValidationError::suspicious(
                    "rateLimit.keyHeader",
                    "keyHeader is ignored when keyType is ipAddress",
                ),
            ),
            _ => {}
        }
        if !(400..=599).contains(&rate_limit.response_status) {
            findings.reject(
                "route.rateLimit",
                ValidationError::invalid(
                    "rateLimit.responseStatus",
                    format!("{} is not a 4xx or 5xx status", rate_limit.response_status),
                ),
            );
        }
    }

    fn validate_cors(cors: &Cors, findings: &mut Findings<'_>) {
        if cors.allowed_origins.is_empty() {
            findings.reject(
                "route.cors",
                ValidationError::MissingField {
                    field: "cors.allowedOrigins".to_string(),
                },
            );
        }
        if cors.allow_credentials && cors.allowed_origins.iter().any(|o| o == "*") {
            findings.caution(
                "route.cors",
                ValidationError::suspicious(
                    "cors.allowedOrigins",
                    "browsers reject credentialed requests when the allowed origin is '*'",
                ),
            );
        }
        for method in &cors.allowed_methods {
            if method != "*" && method.parse::<crate::config::models::HttpMethod>().is_err() {
                findings.reject(
                    "route.cors",
                    ValidationError::invalid(
                        "cors.allowedMethods",
                        format!("unknown HTTP method '{method}'"),
                    ),
                );
            }
        }
    }

    fn validate_headers(headers: &Headers, findings: &mut Findings<'_>) {
        let names = headers
            .request_add
            .keys()
            .chain(headers.request_remove.iter())
            .chain(headers.response_add.keys())
            .chain(headers.response_remove.iter());
        for name in names {
            if !HEADER_NAME.is_match(name) {
                findings.reject(
                    "route.headers",
                    ValidationError::invalid("headers", format!("'{name}' is not a valid header name")),
                );
            }
        }
        for (name, value) in headers.request_add.iter().chain(headers.response_add.iter()) {
            if let crate::config::models::TemplateValue::Literal(text) = value {
                if text.contains("{{") {
                    findings.caution(
                        "route.headers.templates",
                        ValidationError::suspicious(
                            format!("headers.{name}"),
                            "only whole-value {{uuid}} and {{timestamp}} placeholders are expanded; this value is sent literally",
                        ),
                    );
                }
            }
        }
    }

    fn validate_destinations(
        targets: &[WeightedDestination],
        feature_path: &str,
        findings: &mut Findings<'_>,
    ) {
        let mut names = HashSet::new();
        for target in targets {
            if !names.insert(target.name.as_str()) {
                findings.reject(
                    feature_path,
                    ValidationError::DuplicateName {
                        kind: "destination",
                        name: target.name.clone(),
                    },
                );
            }
            if !is_valid_name(&target.name) {
                findings.reject(
                    feature_path,
                    ValidationError::invalid(
                        format!("{feature_path}.name"),
                        format!("'{}' is not a valid identifier", target.name),
                    ),
                );
            }
            if let Err(e) = Self::validate_host(&target.upstream.host, feature_path) {
                findings.reject(feature_path, e);
            }
            if target.upstream.port == 0 {
                findings.reject(
                    feature_path,
                    ValidationError::invalid(format!("{feature_path}.port"), "port must be greater than 0"),
                );
            }
        }
    }

    fn validate_grpc(config: &GatewayConfig, grpc: &GrpcTransformation, findings: &mut Findings<'_>) {
        let path = "route.grpcTransformation";
        if config.find_descriptor(&grpc.proto_descriptor_ref).is_none() {
            findings.reject(
                path,
                ValidationError::invalid(
                    "grpcTransformation.protoDescriptorRef",
                    format!("no proto descriptor named '{}'", grpc.proto_descriptor_ref),
                ),
            );
        }
        for (field, value) in [
            ("requestType", &grpc.request_type),
            ("responseType", &grpc.response_type),
            ("service", &grpc.service),
        ] {
            if !PROTO_IDENT.is_match(value) {
                findings.reject(
                    path,
                    ValidationError::invalid(
                        format!("grpcTransformation.{field}"),
                        format!("'{value}' is not a protobuf identifier"),
                    ),
                );
            }
        }
        if !grpc.package.is_empty() && !PROTO_IDENT.is_match(&grpc.package) {
            findings.reject(
                path,
                ValidationError::invalid(
                    "grpcTransformation.package",
                    format!("'{}' is not a protobuf package", grpc.package),
                ),
            );
        }

        let request = &grpc.request_transform;
        for (from, to) in &request.rename_fields {
            if request.remove_fields.contains(from) {
                findings.caution(
                    path,
                    ValidationError::suspicious(
                        format!("grpcTransformation.requestTransform.renameFields.{from}"),
                        format!("'{from}' is removed before it can be renamed to '{to}'"),
                    ),
                );
            }
        }
        if request.add_fields.is_empty()
            && request.remove_fields.is_empty()
            && request.rename_fields.is_empty()
            && grpc.response_transform.filter_fields.is_empty()
            && grpc.response_transform.add_fields.is_empty()
        {
            findings.caution(
                path,
                ValidationError::suspicious("grpcTransformation", "no field operations configured"),
            );
        }
    }

    fn validate_status_codes(
        codes: &[u16],
        field: &str,
        feature_path: &str,
        findings: &mut Findings<'_>,
    ) {
        for code in codes {
            if !(100..=599).contains(code) {
                findings.reject(
                    feature_path,
                    ValidationError::invalid(field, format!("{code} is not an HTTP status code")),
                );
            }
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> Result<(), ValidationError> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::invalid(
                        context,
                        format!("URL scheme must be 'http' or 'https', got '{}'", url.scheme()),
                    ));
                }
                if url.host().is_none() {
                    return Err(ValidationError::invalid(context, "URL must have a valid host"));
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::invalid(context, format!("Invalid URL format: {e}"))),
        }
    }

    /// Validate host field format
    fn validate_host(host: &str, context: &str) -> Result<(), ValidationError> {
        if host.is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("{context}.host"),
            });
        }
        if host.contains("://") {
            return Err(ValidationError::invalid(
                format!("{context}.host"),
                "host should not contain a scheme (use 'example.com' not 'http://example.com')",
            ));
        }
        if host.parse::<std::net::IpAddr>().is_err() && !HOSTNAME.is_match(host) {
            return Err(ValidationError::invalid(
                format!("{context}.host"),
                format!("invalid hostname format: '{host}'"),
            ));
        }
        Ok(())
    }

    /// Two routes of a service conflict when their prefixes are identical and
    /// their method sets overlap.
    fn check_route_conflicts(service: &Service, findings: &mut Findings<'_>) {
        for (i, first) in service.routes.iter().enumerate() {
            for (j, second) in service.routes.iter().enumerate().skip(i + 1) {
                if first.path_prefix != second.path_prefix {
                    continue;
                }
                let overlap: Vec<String> = first
                    .effective_methods()
                    .intersection(&second.effective_methods())
                    .map(|m| m.to_string())
                    .collect();
                if overlap.is_empty() {
                    continue;
                }
                findings.route = Some(j);
                findings.scope = route_scope(&service.name, j, &second.path_prefix);
                findings.reject(
                    "route.pathPrefix",
                    ValidationError::RouteConflict {
                        message: format!(
                            "routes {i} and {j} both match '{}' for {}",
                            first.path_prefix,
                            overlap.join(", ")
                        ),
                    },
                );
            }
        }
        findings.route = None;
        findings.scope = service_scope(&service.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{
        BasicUser, HttpMethod, ProtoDescriptor, RequestTransform, ResponseTransform, Target,
    };

    fn minimal_valid_config() -> GatewayConfig {
        let mut service = Service::new(
            "users",
            Upstream::with_targets(vec![Target::new("a", 8080, 2), Target::new("b", 8080, 1)]),
        );
        service.routes.push(
            Route::new("/api").with_methods([HttpMethod::Get]),
        );
        let mut config = GatewayConfig::new();
        config.services.push(service);
        config
    }

    #[test]
    fn validate_accepts_minimal_config() {
        let diagnostics = ConfigValidator::validate(&minimal_valid_config());
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
    }

    #[test]
    fn validate_rejects_duplicate_and_malformed_service_names() {
        let mut config = minimal_valid_config();
        let mut copy = config.services[0].clone();
        copy.routes.clear();
        config.services.push(copy);
        config.services[0].name = "bad name".to_string();
        config.services[1].name = "bad name".to_string();

        let report = ConfigValidator::report(&config);
        assert!(report.diagnostics.mentions("service.name", Severity::Error));
        assert!(report.is_service_rejected("bad name"));
    }

    #[test]
    fn validate_rejects_empty_targets() {
        let mut config = minimal_valid_config();
        config.services[0].upstream.targets.clear();
        let report = ConfigValidator::report(&config);
        assert!(report.diagnostics.mentions("upstream.targets", Severity::Error));
        assert!(report.is_route_rejected("users", 0));
    }

    #[test]
    fn burst_equal_to_rate_is_a_warning() {
        let mut config = minimal_valid_config();
        config.services[0].routes[0].rate_limit = Some(RateLimit::per_ip(10, 10));
        let diagnostics = ConfigValidator::validate(&config);
        assert!(!diagnostics.has_errors());
        assert!(diagnostics.mentions("route.rateLimit.burst", Severity::Warning));
    }

    #[test]
    fn burst_below_rate_rejects_the_route_only() {
        let mut config = minimal_valid_config();
        config.services[0].routes.push(Route::new("/health"));
        config.services[0].routes[0].rate_limit = Some(RateLimit::per_ip(10, 5));

        let report = ConfigValidator::report(&config);
        assert!(report.is_route_rejected("users", 0));
        assert!(!report.is_route_rejected("users", 1));
        assert!(!report.is_service_rejected("users"));
    }

    #[test]
    fn header_key_requires_key_header() {
        let mut config = minimal_valid_config();
        let mut limit = RateLimit::per_ip(10, 20);
        limit.key_type = RateLimitKey::Header;
        config.services[0].routes[0].rate_limit = Some(limit);
        assert!(
            ConfigValidator::validate(&config).mentions("route.rateLimit.keyType", Severity::Error)
        );
    }

    #[test]
    fn overlapping_methods_on_same_prefix_conflict() {
        let mut config = minimal_valid_config();
        config.services[0]
            .routes
            .push(Route::new("/api").with_methods([HttpMethod::Get, HttpMethod::Post]));
        config.services[0]
            .routes
            .push(Route::new("/api").with_methods([HttpMethod::Delete]));

        let report = ConfigValidator::report(&config);
        assert!(report.is_route_rejected("users", 1));
        assert!(!report.is_route_rejected("users", 2));
    }

    #[test]
    fn absent_methods_conflict_with_everything() {
        let mut config = minimal_valid_config();
        config.services[0].routes.push(Route::new("/api"));
        assert!(ConfigValidator::validate(&config).mentions("route.pathPrefix", Severity::Error));
    }

    #[test]
    fn empty_method_set_is_rejected() {
        let mut config = minimal_valid_config();
        config.services[0].routes[0].methods = Some(BTreeSet::new());
        assert!(ConfigValidator::validate(&config).mentions("route.methods", Severity::Error));
    }

    #[test]
    fn zero_weights_are_flagged() {
        let mut config = minimal_valid_config();
        config.services[0].upstream.targets[1].weight = 0;
        let diagnostics = ConfigValidator::validate(&config);
        assert!(diagnostics.mentions("upstream.targets.weight", Severity::Warning));
        assert!(!diagnostics.has_errors());

        config.services[0].upstream.targets[0].weight = 0;
        assert!(ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn wildcard_origin_with_credentials_is_suspicious() {
        let mut config = minimal_valid_config();
        config.services[0].routes[0].cors = Some(Cors {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
            ..Cors::default()
        });
        let diagnostics = ConfigValidator::validate(&config);
        assert!(diagnostics.mentions("route.cors", Severity::Warning));
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn basic_auth_needs_users() {
        let mut config = minimal_valid_config();
        config.services[0].routes[0].authentication = Some(Authentication::Basic { users: vec![] });
        assert!(ConfigValidator::validate(&config).has_errors());

        config.services[0].routes[0].authentication = Some(Authentication::Basic {
            users: vec![BasicUser {
                username: "alice".to_string(),
                password: "secret".to_string(),
            }],
        });
        assert!(!ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn grpc_transformation_must_reference_a_descriptor() {
        let mut config = minimal_valid_config();
        config.services[0].routes[0].grpc_transformation = Some(GrpcTransformation {
            proto_descriptor_ref: "auth".to_string(),
            package: "auth.v1".to_string(),
            service: "AuthService".to_string(),
            request_type: "LoginRequest".to_string(),
            response_type: "LoginResponse".to_string(),
            request_transform: RequestTransform {
                remove_fields: vec!["password".to_string()],
                ..RequestTransform::default()
            },
            response_transform: ResponseTransform::default(),
        });
        assert!(
            ConfigValidator::validate(&config)
                .mentions("route.grpcTransformation", Severity::Error)
        );

        config.proto_descriptors.push(ProtoDescriptor {
            name: "auth".to_string(),
            source: ProtoSource::Inline {
                content: "syntax = \"proto3\";".to_string(),
            },
            resolved: None,
        });
        assert!(!ConfigValidator::validate(&config).has_errors());
    }

    #[test]
    fn url_descriptors_must_be_http() {
        let mut config = minimal_valid_config();
        config.proto_descriptors.push(ProtoDescriptor {
            name: "remote".to_string(),
            source: ProtoSource::Url {
                address: "ftp://protos.example.com/a.proto".to_string(),
            },
            resolved: None,
        });
        assert!(
            ConfigValidator::validate(&config).mentions("protoDescriptors.source", Severity::Error)
        );
    }
}
