//! Canonical gateway model (the IR every dialect is translated through).
//!
//! These types map directly to the canonical YAML / JSON document. They are
//! serde-friendly and carry defaults so that hand-authored documents remain
//! concise. Exporters only ever borrow a [`GatewayConfig`]; the single field
//! written after construction is [`ProtoDescriptor::resolved`], and only the
//! proto descriptor manager writes it.
use std::{collections::BTreeSet, fmt, str::FromStr, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_status_code() -> u16 {
    429
}

/// Root of the canonical model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Dialect the document was authored for. Informational only.
    #[serde(default, rename = "provider", skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,
    /// Provider-keyed escape hatch, consumed verbatim by exactly one exporter.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub global_config: IndexMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proto_descriptors: Vec<ProtoDescriptor>,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self {
            schema_version: default_schema_version(),
            ..Self::default()
        }
    }

    pub fn find_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_descriptor(&self, name: &str) -> Option<&ProtoDescriptor> {
        self.proto_descriptors.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Rest,
    Grpc,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportProtocol {
    #[default]
    Http,
    Https,
    Http2,
}

impl TransportProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportProtocol::Http | TransportProtocol::Http2 => "http",
            TransportProtocol::Https => "https",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub transport_protocol: TransportProtocol,
    pub upstream: Upstream,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl Service {
    pub fn new(name: impl Into<String>, upstream: Upstream) -> Self {
        Self {
            name: name.into(),
            kind: ServiceKind::Rest,
            transport_protocol: TransportProtocol::Http,
            upstream,
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
}

impl Upstream {
    pub fn with_targets(targets: Vec<Target>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    pub fn algorithm(&self) -> Option<LoadBalanceAlgorithm> {
        self.load_balancer.as_ref().map(|lb| lb.algorithm)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            weight,
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceAlgorithm {
    RoundRobin,
    LeastConn,
    IpHash,
    Weighted,
}

impl LoadBalanceAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceAlgorithm::RoundRobin => "round_robin",
            LoadBalanceAlgorithm::LeastConn => "least_conn",
            LoadBalanceAlgorithm::IpHash => "ip_hash",
            LoadBalanceAlgorithm::Weighted => "weighted",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LoadBalancer {
    pub algorithm: LoadBalanceAlgorithm,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ActiveHealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<PassiveHealthCheck>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHealthCheck {
    pub path: String,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for ActiveHealthCheck {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PassiveHealthCheck {
    pub max_failures: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_status_codes: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    pub max_failures: u32,
    #[serde(with = "duration_str")]
    pub window: Duration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_status_codes: Vec<u16>,
}

#[derive(
    Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 9] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
        HttpMethod::Connect,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown HTTP method '{s}'"))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path_prefix: String,
    /// `None` matches every method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<BTreeSet<HttpMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Cors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirroring: Option<Mirroring>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_split: Option<TrafficSplit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_transformation: Option<GrpcTransformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Retry>,
}

impl Route {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            ..Self::default()
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Methods matched by this route, expanding "absent" to every verb.
    pub fn effective_methods(&self) -> BTreeSet<HttpMethod> {
        match &self.methods {
            Some(methods) => methods.clone(),
            None => HttpMethod::ALL.into_iter().collect(),
        }
    }
}

/// Authentication scheme of a route. Exactly one variant is active.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Authentication {
    None,
    Basic {
        users: Vec<BasicUser>,
    },
    #[serde(rename_all = "camelCase")]
    ApiKey {
        key_name: String,
        #[serde(default)]
        location: KeyLocation,
    },
    #[serde(rename_all = "camelCase")]
    Jwt {
        issuer: String,
        #[serde(default)]
        audiences: Vec<String>,
        jwks_uri: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BasicUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyLocation {
    #[default]
    Header,
    Query,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitKey {
    #[default]
    IpAddress,
    Header,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_second: u32,
    pub burst: u32,
    #[serde(default)]
    pub key_type: RateLimitKey,
    /// Required iff `key_type` is `Header`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_header: Option<String>,
    #[serde(default = "default_status_code")]
    pub response_status: u16,
}

impl RateLimit {
    pub fn per_ip(requests_per_second: u32, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            key_type: RateLimitKey::IpAddress,
            key_header: None,
            response_status: default_status_code(),
        }
    }

    /// Requests admitted above the sustained rate.
    pub fn excess_burst(&self) -> u32 {
        self.burst.saturating_sub(self.requests_per_second)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cors {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub request_add: IndexMap<String, TemplateValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub response_add: IndexMap<String, TemplateValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_remove: Vec<String>,
}

impl Headers {
    pub fn is_empty(&self) -> bool {
        self.request_add.is_empty()
            && self.request_remove.is_empty()
            && self.response_add.is_empty()
            && self.response_remove.is_empty()
    }

    pub fn uses_templates(&self) -> bool {
        self.request_add
            .values()
            .chain(self.response_add.values())
            .any(TemplateValue::is_dynamic)
    }
}

/// Header or message-field value; placeholders are resolved by each exporter
/// into a runtime expression of its dialect.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum TemplateValue {
    Literal(String),
    Uuid,
    Timestamp,
}

impl TemplateValue {
    pub const UUID_PLACEHOLDER: &'static str = "{{uuid}}";
    pub const TIMESTAMP_PLACEHOLDER: &'static str = "{{timestamp}}";

    pub fn literal(value: impl Into<String>) -> Self {
        TemplateValue::Literal(value.into())
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, TemplateValue::Literal(_))
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            Self::UUID_PLACEHOLDER => TemplateValue::Uuid,
            Self::TIMESTAMP_PLACEHOLDER => TemplateValue::Timestamp,
            _ => TemplateValue::Literal(raw.to_string()),
        }
    }
}

impl From<String> for TemplateValue {
    fn from(raw: String) -> Self {
        match TemplateValue::parse(&raw) {
            TemplateValue::Literal(_) => TemplateValue::Literal(raw),
            dynamic => dynamic,
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(raw: &str) -> Self {
        TemplateValue::parse(raw)
    }
}

impl From<TemplateValue> for String {
    fn from(value: TemplateValue) -> Self {
        match value {
            TemplateValue::Literal(text) => text,
            TemplateValue::Uuid => TemplateValue::UUID_PLACEHOLDER.to_string(),
            TemplateValue::Timestamp => TemplateValue::TIMESTAMP_PLACEHOLDER.to_string(),
        }
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Literal(text) => f.write_str(text),
            TemplateValue::Uuid => f.write_str(Self::UUID_PLACEHOLDER),
            TemplateValue::Timestamp => f.write_str(Self::TIMESTAMP_PLACEHOLDER),
        }
    }
}

/// Host/port pair a mirror or split target sends traffic to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedDestination {
    pub name: String,
    pub weight: u32,
    pub upstream: Endpoint,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra_headers: IndexMap<String, String>,
}

/// Shadow traffic; each weight is the percentage of requests copied.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Mirroring {
    pub targets: Vec<WeightedDestination>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct TrafficSplit {
    pub targets: Vec<WeightedDestination>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProtoDescriptor {
    pub name: String,
    pub source: ProtoSource,
    /// Populated by the descriptor manager once compiled.
    #[serde(skip)]
    pub resolved: Option<ResolvedDescriptor>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtoSource {
    File { path: String },
    Inline { content: String },
    Url { address: String },
}

impl ProtoSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtoSource::File { .. } => "file",
            ProtoSource::Inline { .. } => "inline",
            ProtoSource::Url { .. } => "url",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDescriptor {
    pub compiled_path: std::path::PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcTransformation {
    pub proto_descriptor_ref: String,
    pub package: String,
    pub service: String,
    pub request_type: String,
    pub response_type: String,
    #[serde(default)]
    pub request_transform: RequestTransform,
    #[serde(default)]
    pub response_transform: ResponseTransform,
}

impl GrpcTransformation {
    /// Fully-qualified protobuf name of a message type declared in `package`.
    pub fn qualified(&self, message: &str) -> String {
        if message.contains('.') || self.package.is_empty() {
            message.trim_start_matches('.').to_string()
        } else {
            format!("{}.{}", self.package, message)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestTransform {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub add_fields: IndexMap<String, TemplateValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rename_fields: IndexMap<String, String>,
}

impl RequestTransform {
    pub fn is_empty(&self) -> bool {
        self.add_fields.is_empty() && self.remove_fields.is_empty() && self.rename_fields.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTransform {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub add_fields: IndexMap<String, TemplateValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Timeout {
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub connect: Option<Duration>,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub read: Option<Duration>,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub idle: Option<Duration>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Retry {
    pub attempts: u32,
    #[serde(default, with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<String>,
}

/// Durations as humantime strings ("5s", "1m 30s").
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|r| humantime::parse_duration(r.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_values_parse_placeholders() {
        assert_eq!(TemplateValue::from("{{uuid}}"), TemplateValue::Uuid);
        assert_eq!(
            TemplateValue::from("{{timestamp}}"),
            TemplateValue::Timestamp
        );
        assert_eq!(
            TemplateValue::from("static"),
            TemplateValue::Literal("static".to_string())
        );
        assert_eq!(String::from(TemplateValue::Uuid), "{{uuid}}");
    }

    #[test]
    fn deserializes_canonical_yaml() {
        let yaml = r#"
schemaVersion: "1.0"
provider: nginx
services:
  - name: users
    kind: rest
    transportProtocol: http
    upstream:
      targets:
        - { host: a, port: 8080, weight: 2 }
        - { host: b, port: 8080 }
      loadBalancer: { algorithm: weighted }
      circuitBreaker: { maxFailures: 5, window: 30s }
    routes:
      - pathPrefix: /api
        methods: [GET, POST]
        authentication: { type: jwt, issuer: "https://issuer", audiences: [api], jwksUri: "https://issuer/jwks" }
        rateLimit: { requestsPerSecond: 100, burst: 200, keyType: ipAddress }
        headers:
          requestAdd: { X-Request-Id: "{{uuid}}" }
        timeout: { connect: 5s, read: 30s }
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        let service = &config.services[0];
        assert_eq!(config.provider_hint.as_deref(), Some("nginx"));
        assert_eq!(service.upstream.targets[1].weight, 1);
        assert_eq!(
            service.upstream.algorithm(),
            Some(LoadBalanceAlgorithm::Weighted)
        );
        assert_eq!(
            service.upstream.circuit_breaker.as_ref().unwrap().window,
            Duration::from_secs(30)
        );

        let route = &service.routes[0];
        assert_eq!(route.methods.as_ref().unwrap().len(), 2);
        assert!(matches!(
            route.authentication,
            Some(Authentication::Jwt { .. })
        ));
        assert_eq!(route.rate_limit.as_ref().unwrap().response_status, 429);
        assert_eq!(
            route.headers.as_ref().unwrap().request_add["X-Request-Id"],
            TemplateValue::Uuid
        );
        assert_eq!(
            route.timeout.as_ref().unwrap().read,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn absent_methods_mean_every_method() {
        let route = Route::new("/");
        assert_eq!(route.effective_methods().len(), HttpMethod::ALL.len());
    }

    #[test]
    fn qualifies_message_names_with_package() {
        let t = GrpcTransformation {
            proto_descriptor_ref: "auth".to_string(),
            package: "auth.v1".to_string(),
            service: "AuthService".to_string(),
            request_type: "LoginRequest".to_string(),
            response_type: "auth.v1.LoginResponse".to_string(),
            request_transform: RequestTransform::default(),
            response_transform: ResponseTransform::default(),
        };
        assert_eq!(t.qualified(&t.request_type), "auth.v1.LoginRequest");
        assert_eq!(t.qualified(&t.response_type), "auth.v1.LoginResponse");
    }
}
