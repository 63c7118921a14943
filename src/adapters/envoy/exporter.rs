use std::{cmp::Reverse, time::Duration};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use super::model::{
    BASIC_AUTH_FILTER, BASIC_AUTH_ROUTE_TYPE, BASIC_AUTH_TYPE, CORS_FILTER, CORS_POLICY_TYPE,
    CORS_TYPE, HCM_FILTER, HCM_TYPE, HTTP_OPTIONS_KEY, HTTP_OPTIONS_TYPE, JWT_FILTER,
    JWT_ROUTE_TYPE, JWT_TYPE, LISTENER_NAME, LISTENER_PORT, LUA_FILTER, LUA_ROUTE_TYPE, LUA_TYPE,
    RATELIMIT_FILTER, RATELIMIT_TYPE, REQUEST_ID_EXPR, ROUTE_CONFIG_NAME, ROUTER_FILTER,
    ROUTER_TYPE, START_TIME_EXPR, TLS_SOCKET, TLS_TYPE, VIRTUAL_HOST_NAME,
};
use crate::{
    adapters::{
        common::{htpasswd_sha, merge_value, method_names, proto_duration, split_url, to_yaml},
        lua::{GrpcScripting, LuaHost},
    },
    config::models::{
        Authentication, Cors, GatewayConfig, Headers, LoadBalanceAlgorithm, RateLimit, Route,
        Service, ServiceKind, TemplateValue, TransportProtocol,
    },
    core::{
        capability::Feature,
        diagnostics::{route_scope, service_scope},
        export_context::ExportContext,
        provider::ProviderId,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::{route_name, sanitize_name},
};

const EMPTY_LUA: &str = "function envoy_on_request(handle)\nend\n";
const JWKS_FETCH_TIMEOUT: &str = "5s";
const JWKS_CACHE_DURATION: &str = "300s";

/// Renders an Envoy v3 static bootstrap: one listener, one virtual host and
/// a cluster per service plus the clusters mirror, split and JWKS targets
/// need.
#[derive(Clone, Default)]
pub struct EnvoyExporter {
    grpc: GrpcScripting,
}

impl EnvoyExporter {
    pub fn new(grpc: GrpcScripting) -> Self {
        Self { grpc }
    }
}

/// HTTP filters referenced by at least one route.
#[derive(Default)]
struct HttpFilters {
    rate_limit: bool,
    cors: bool,
    basic_users: Vec<String>,
    jwt_providers: Map<String, Value>,
    jwt_requirements: Map<String, Value>,
    lua: bool,
}

impl HttpFilters {
    fn render(self) -> Vec<Value> {
        let mut filters = Vec::new();
        if self.cors {
            filters.push(json!({"name": CORS_FILTER, "typed_config": {"@type": CORS_TYPE}}));
        }
        if !self.jwt_providers.is_empty() {
            filters.push(json!({
                "name": JWT_FILTER,
                "typed_config": {
                    "@type": JWT_TYPE,
                    "providers": self.jwt_providers,
                    "requirement_map": self.jwt_requirements,
                },
            }));
        }
        if !self.basic_users.is_empty() {
            // enabled only by the per-route configs
            filters.push(json!({
                "name": BASIC_AUTH_FILTER,
                "typed_config": {
                    "@type": BASIC_AUTH_TYPE,
                    "users": {"inline_string": self.basic_users.join("\n")},
                },
                "disabled": true,
            }));
        }
        if self.rate_limit {
            filters.push(json!({
                "name": RATELIMIT_FILTER,
                "typed_config": {"@type": RATELIMIT_TYPE, "stat_prefix": "http_local_rate_limiter"},
            }));
        }
        if self.lua {
            filters.push(json!({
                "name": LUA_FILTER,
                "typed_config": {
                    "@type": LUA_TYPE,
                    "default_source_code": {"inline_string": EMPTY_LUA},
                },
            }));
        }
        filters.push(json!({"name": ROUTER_FILTER, "typed_config": {"@type": ROUTER_TYPE}}));
        filters
    }
}

fn socket_endpoint(host: &str, port: u16) -> Value {
    json!({"endpoint": {"address": {"socket_address": {"address": host, "port_value": port}}}})
}

fn apply_protocol(cluster: &mut Value, protocol: TransportProtocol, kind: ServiceKind, sni: &str) {
    if protocol == TransportProtocol::Http2 || kind == ServiceKind::Grpc {
        cluster["typed_extension_protocol_options"] = json!({
            HTTP_OPTIONS_KEY: {
                "@type": HTTP_OPTIONS_TYPE,
                "explicit_http_config": {"http2_protocol_options": {}},
            }
        });
    }
    if protocol == TransportProtocol::Https {
        cluster["transport_socket"] = json!({
            "name": TLS_SOCKET,
            "typed_config": {"@type": TLS_TYPE, "sni": sni},
        });
    }
}

/// Single-endpoint cluster for mirror, split and JWKS destinations.
fn endpoint_cluster(
    name: &str,
    host: &str,
    port: u16,
    protocol: TransportProtocol,
    kind: ServiceKind,
) -> Value {
    let mut cluster = json!({
        "name": name,
        "type": "STRICT_DNS",
        "load_assignment": {
            "cluster_name": name,
            "endpoints": [{"lb_endpoints": [socket_endpoint(host, port)]}],
        },
    });
    apply_protocol(&mut cluster, protocol, kind, host);
    cluster
}

fn header_value(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    name: &str,
    value: &TemplateValue,
) -> Option<String> {
    match value {
        // the formatter treats a lone % as the start of a command
        TemplateValue::Literal(text) => Some(text.replace('%', "%%")),
        dynamic => ctx.template(scope, name, dynamic, |v| match v {
            TemplateValue::Uuid => Some(REQUEST_ID_EXPR.to_string()),
            TemplateValue::Timestamp => Some(START_TIME_EXPR.to_string()),
            TemplateValue::Literal(_) => None,
        }),
    }
}

fn headers_to_add(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    values: &IndexMap<String, TemplateValue>,
) -> Vec<Value> {
    let mut out = Vec::new();
    for (name, value) in values {
        if let Some(resolved) = header_value(ctx, scope, name, value) {
            out.push(json!({
                "header": {"key": name, "value": resolved},
                "append_action": "OVERWRITE_IF_EXISTS_OR_ADD",
            }));
        }
    }
    out
}

fn rate_limit_config(name: &str, limit: &RateLimit) -> Value {
    let percent = json!({"numerator": 100, "denominator": "HUNDRED"});
    json!({
        "@type": RATELIMIT_TYPE,
        "stat_prefix": format!("{}_rate_limit", name.replace('-', "_")),
        "token_bucket": {
            "max_tokens": limit.burst.max(limit.requests_per_second),
            "tokens_per_fill": limit.requests_per_second,
            "fill_interval": "1s",
        },
        "filter_enabled": {"runtime_key": "local_rate_limit_enabled", "default_value": percent},
        "filter_enforced": {"runtime_key": "local_rate_limit_enforced", "default_value": percent},
        "status": {"code": limit.response_status},
    })
}

fn cors_config(cors: &Cors) -> Value {
    let origins: Vec<Value> = cors
        .allowed_origins
        .iter()
        .map(|origin| {
            if origin == "*" {
                json!({"safe_regex": {"regex": ".*"}})
            } else {
                json!({"exact": origin})
            }
        })
        .collect();
    let mut policy = json!({
        "@type": CORS_POLICY_TYPE,
        "allow_origin_string_match": origins,
        "allow_credentials": cors.allow_credentials,
    });
    if !cors.allowed_methods.is_empty() {
        policy["allow_methods"] = json!(cors.allowed_methods.join(","));
    }
    if !cors.allowed_headers.is_empty() {
        policy["allow_headers"] = json!(cors.allowed_headers.join(","));
    }
    if !cors.expose_headers.is_empty() {
        policy["expose_headers"] = json!(cors.expose_headers.join(","));
    }
    if let Some(max_age) = cors.max_age_seconds {
        policy["max_age"] = json!(max_age.to_string());
    }
    policy
}

impl EnvoyExporter {
    /// Envoy keeps the connect timeout on the cluster; the first route that
    /// sets one decides.
    fn connect_timeout(ctx: &mut ExportContext<'_>, service: &Service) -> Option<Duration> {
        let routes = ctx.routes(service);
        let (first, connect) = routes
            .iter()
            .find_map(|(i, r)| r.timeout.as_ref().and_then(|t| t.connect).map(|c| (*i, c)))?;
        for (index, route) in &routes {
            let other = route.timeout.as_ref().and_then(|t| t.connect);
            if *index != first && other.is_some_and(|c| c != connect) {
                ctx.warn(
                    &route_scope(&service.name, *index, &route.path_prefix),
                    Feature::Timeout.path().as_str(),
                    format!("connect timeouts are per cluster; route {first}'s value is used"),
                );
            }
        }
        Some(connect)
    }

    fn service_cluster(ctx: &mut ExportContext<'_>, service: &Service) -> Value {
        let upstream = &service.upstream;
        let weights_differ = upstream.targets.windows(2).any(|w| w[0].weight != w[1].weight);
        let mut endpoints = Vec::new();
        let mut drained = false;
        for target in &upstream.targets {
            let mut endpoint = socket_endpoint(&target.host, target.port);
            if target.weight == 0 {
                drained = true;
                endpoint["health_status"] = json!("DRAINING");
            } else if weights_differ || target.weight != 1 {
                endpoint["load_balancing_weight"] = json!(target.weight);
            }
            endpoints.push(endpoint);
        }
        if drained {
            ctx.info(
                &service_scope(&service.name),
                Feature::WeightedTargets.path().as_str(),
                "targets with weight 0 are rendered as DRAINING endpoints",
            );
        }

        let mut cluster = json!({"name": service.name, "type": "STRICT_DNS"});
        if let Some(connect) = Self::connect_timeout(ctx, service) {
            cluster["connect_timeout"] = json!(proto_duration(connect));
        }
        if let Some(algorithm) = upstream.algorithm() {
            cluster["lb_policy"] = json!(match algorithm {
                LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted => "ROUND_ROBIN",
                LoadBalanceAlgorithm::LeastConn => "LEAST_REQUEST",
                LoadBalanceAlgorithm::IpHash => "RING_HASH",
            });
        }
        cluster["load_assignment"] = json!({
            "cluster_name": service.name,
            "endpoints": [{"lb_endpoints": endpoints}],
        });

        if let Some(active) = upstream.health_check.as_ref().and_then(|h| h.active.as_ref()) {
            cluster["health_checks"] = json!([{
                "timeout": proto_duration(active.timeout),
                "interval": proto_duration(active.interval),
                "healthy_threshold": active.healthy_threshold,
                "unhealthy_threshold": active.unhealthy_threshold,
                "http_health_check": {"path": active.path},
            }]);
        }
        let passive = upstream.health_check.as_ref().and_then(|h| h.passive.as_ref());
        let breaker = upstream.circuit_breaker.as_ref();
        if passive.is_some() || breaker.is_some() {
            let mut outlier = Map::new();
            let failures = passive
                .map(|p| p.max_failures)
                .or(breaker.map(|b| b.max_failures))
                .unwrap_or(5);
            outlier.insert("consecutive_5xx".to_string(), json!(failures));
            if let Some(breaker) = breaker {
                outlier.insert("interval".to_string(), json!(proto_duration(breaker.window)));
                outlier.insert(
                    "base_ejection_time".to_string(),
                    json!(proto_duration(breaker.window)),
                );
            }
            cluster["outlier_detection"] = Value::Object(outlier);
        }

        let sni = upstream.targets.first().map(|t| t.host.as_str()).unwrap_or_default();
        apply_protocol(&mut cluster, service.transport_protocol, service.kind, sni);
        cluster
    }

    async fn route_entry(
        &self,
        ctx: &mut ExportContext<'_>,
        service: &Service,
        index: usize,
        route: &Route,
        clusters: &mut IndexMap<String, Value>,
        filters: &mut HttpFilters,
    ) -> TranslateResult<Value> {
        let name = route_name(&service.name, index);
        let scope = route_scope(&service.name, index, &route.path_prefix);

        let mut matcher = json!({"prefix": route.path_prefix});
        if let Some(methods) = &route.methods {
            let names = method_names(methods);
            let string_match = if names.len() == 1 {
                json!({"exact": names[0]})
            } else {
                json!({"safe_regex": {"regex": format!("^({})$", names.join("|"))}})
            };
            matcher["headers"] = json!([{"name": ":method", "string_match": string_match}]);
        }
        if service.kind == ServiceKind::Grpc {
            matcher["grpc"] = json!({});
        }

        let mut action = Map::new();
        match &route.traffic_split {
            Some(split) => {
                let mut weighted = Vec::new();
                for destination in &split.targets {
                    let cluster_name = format!("{name}-{}", sanitize_name(&destination.name));
                    clusters.insert(
                        cluster_name.clone(),
                        endpoint_cluster(
                            &cluster_name,
                            &destination.upstream.host,
                            destination.upstream.port,
                            service.transport_protocol,
                            service.kind,
                        ),
                    );
                    let mut entry = json!({"name": cluster_name, "weight": destination.weight});
                    if !destination.extra_headers.is_empty() {
                        let extra: Vec<Value> = destination
                            .extra_headers
                            .iter()
                            .map(|(k, v)| json!({"header": {"key": k, "value": v.replace('%', "%%")}}))
                            .collect();
                        entry["request_headers_to_add"] = json!(extra);
                    }
                    weighted.push(entry);
                }
                action.insert("weighted_clusters".to_string(), json!({"clusters": weighted}));
            }
            None => {
                action.insert("cluster".to_string(), json!(service.name));
            }
        }
        if let Some(timeout) = &route.timeout {
            if let Some(read) = timeout.read {
                action.insert("timeout".to_string(), json!(proto_duration(read)));
            }
            if let Some(idle) = timeout.idle {
                action.insert("idle_timeout".to_string(), json!(proto_duration(idle)));
            }
        }
        if let Some(retry) = &route.retry {
            let retry_on = if retry.retry_on.is_empty() {
                "5xx".to_string()
            } else {
                retry.retry_on.join(",")
            };
            let mut policy = json!({"retry_on": retry_on, "num_retries": retry.attempts});
            if let Some(backoff) = retry.backoff {
                policy["retry_back_off"] = json!({"base_interval": proto_duration(backoff)});
            }
            action.insert("retry_policy".to_string(), policy);
        }
        if let Some(mirroring) = route.mirroring.as_ref().filter(|m| !m.targets.is_empty()) {
            let mut policies = Vec::new();
            for destination in &mirroring.targets {
                let cluster_name = format!("{name}-mirror-{}", sanitize_name(&destination.name));
                clusters.insert(
                    cluster_name.clone(),
                    endpoint_cluster(
                        &cluster_name,
                        &destination.upstream.host,
                        destination.upstream.port,
                        service.transport_protocol,
                        service.kind,
                    ),
                );
                policies.push(json!({
                    "cluster": cluster_name,
                    "runtime_fraction": {
                        "default_value": {"numerator": destination.weight.min(100), "denominator": "HUNDRED"},
                    },
                }));
            }
            action.insert("request_mirror_policies".to_string(), json!(policies));
        }
        if service.upstream.algorithm() == Some(LoadBalanceAlgorithm::IpHash) {
            action.insert(
                "hash_policy".to_string(),
                json!([{"connection_properties": {"source_ip": true}}]),
            );
        }

        let mut entry = json!({"name": name, "match": matcher, "route": action});
        if let Some(headers) = &route.headers {
            Self::apply_headers(ctx, &scope, headers, &mut entry);
        }

        let mut per_filter = Map::new();
        if let Some(limit) = &route.rate_limit {
            per_filter.insert(RATELIMIT_FILTER.to_string(), rate_limit_config(&name, limit));
            filters.rate_limit = true;
        }
        if let Some(cors) = &route.cors {
            per_filter.insert(CORS_FILTER.to_string(), cors_config(cors));
            filters.cors = true;
        }
        match &route.authentication {
            Some(Authentication::Basic { users }) => {
                let lines: Vec<String> = users
                    .iter()
                    .map(|u| htpasswd_sha(&u.username, &u.password))
                    .collect();
                for line in &lines {
                    if !filters.basic_users.contains(line) {
                        filters.basic_users.push(line.clone());
                    }
                }
                per_filter.insert(
                    BASIC_AUTH_FILTER.to_string(),
                    json!({"@type": BASIC_AUTH_ROUTE_TYPE, "users": {"inline_string": lines.join("\n")}}),
                );
            }
            Some(Authentication::Jwt {
                issuer,
                audiences,
                jwks_uri,
            }) => match split_url(jwks_uri) {
                Some((scheme, host, port)) => {
                    let jwks_cluster = format!("jwks-{}", sanitize_name(&host));
                    let protocol = if scheme == "https" {
                        TransportProtocol::Https
                    } else {
                        TransportProtocol::Http
                    };
                    clusters.entry(jwks_cluster.clone()).or_insert_with(|| {
                        endpoint_cluster(&jwks_cluster, &host, port, protocol, ServiceKind::Rest)
                    });
                    let provider = format!("{name}-jwt");
                    let mut definition = json!({
                        "issuer": issuer,
                        "remote_jwks": {
                            "http_uri": {"uri": jwks_uri, "cluster": jwks_cluster, "timeout": JWKS_FETCH_TIMEOUT},
                            "cache_duration": JWKS_CACHE_DURATION,
                        },
                        "forward": true,
                    });
                    if !audiences.is_empty() {
                        definition["audiences"] = json!(audiences);
                    }
                    filters.jwt_providers.insert(provider.clone(), definition);
                    filters
                        .jwt_requirements
                        .insert(name.clone(), json!({"provider_name": provider}));
                    per_filter.insert(
                        JWT_FILTER.to_string(),
                        json!({"@type": JWT_ROUTE_TYPE, "requirement_name": name}),
                    );
                }
                None => ctx.warn(
                    &scope,
                    Feature::JwtAuth.path().as_str(),
                    format!("JWKS URI '{jwks_uri}' is not an absolute URL; authentication omitted"),
                ),
            },
            Some(Authentication::ApiKey { .. } | Authentication::None) | None => {}
        }
        if let Some(grpc) = &route.grpc_transformation {
            if let Some(scripts) = self.grpc.generate(ctx, &scope, grpc, LuaHost::Envoy).await? {
                if let Some(script) = scripts.request {
                    per_filter.insert(
                        LUA_FILTER.to_string(),
                        json!({"@type": LUA_ROUTE_TYPE, "source_code": {"inline_string": script}}),
                    );
                    filters.lua = true;
                }
            }
        }
        if !per_filter.is_empty() {
            entry["typed_per_filter_config"] = Value::Object(per_filter);
        }
        Ok(entry)
    }

    fn apply_headers(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        headers: &Headers,
        entry: &mut Value,
    ) {
        let request = headers_to_add(ctx, scope, &headers.request_add);
        if !request.is_empty() {
            entry["request_headers_to_add"] = json!(request);
        }
        if !headers.request_remove.is_empty() {
            entry["request_headers_to_remove"] = json!(headers.request_remove);
        }
        let response = headers_to_add(ctx, scope, &headers.response_add);
        if !response.is_empty() {
            entry["response_headers_to_add"] = json!(response);
        }
        if !headers.response_remove.is_empty() {
            entry["response_headers_to_remove"] = json!(headers.response_remove);
        }
    }
}

#[async_trait]
impl Exporter for EnvoyExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Envoy
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "envoy"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Envoy, config)?;
        let mut clusters: IndexMap<String, Value> = IndexMap::new();
        let mut filters = HttpFilters::default();
        let mut routes: Vec<(usize, Value)> = Vec::new();

        for service in ctx.services() {
            let cluster = Self::service_cluster(&mut ctx, service);
            clusters.insert(service.name.clone(), cluster);
            for (index, route) in ctx.routes(service) {
                let entry = self
                    .route_entry(&mut ctx, service, index, route, &mut clusters, &mut filters)
                    .await?;
                routes.push((route.path_prefix.len(), entry));
            }
        }
        // routes match first-wins; longer prefixes must come first
        routes.sort_by_key(|(length, _)| Reverse(*length));
        let routes: Vec<Value> = routes.into_iter().map(|(_, entry)| entry).collect();

        let listener = json!({
            "name": LISTENER_NAME,
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": LISTENER_PORT}},
            "filter_chains": [{
                "filters": [{
                    "name": HCM_FILTER,
                    "typed_config": {
                        "@type": HCM_TYPE,
                        "stat_prefix": "ingress_http",
                        "codec_type": "AUTO",
                        "route_config": {
                            "name": ROUTE_CONFIG_NAME,
                            "virtual_hosts": [{
                                "name": VIRTUAL_HOST_NAME,
                                "domains": ["*"],
                                "routes": routes,
                            }],
                        },
                        "http_filters": filters.render(),
                    },
                }],
            }],
        });
        let mut document = json!({
            "static_resources": {
                "listeners": [listener],
                "clusters": clusters.into_values().collect::<Vec<_>>(),
            }
        });
        if let Some(extra) = ctx.global_config() {
            merge_value(&mut document, extra);
        }
        let text = to_yaml(ProviderId::Envoy, &document)?;
        Ok(ctx.finish(text))
    }
}
