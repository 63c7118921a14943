use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};

use super::model::{
    ApisixActiveCheck, ApisixChecks, ApisixConfig, ApisixConsumer, ApisixNode, ApisixNodes,
    ApisixPassiveCheck, ApisixRoute, ApisixThresholds, ApisixTimeout, ApisixUpstream,
    END_MARKER,
};
use crate::{
    adapters::{
        common::{merge_value, method_names, to_value, to_yaml},
        lua::{GrpcScripting, LuaHost},
    },
    config::models::{
        Authentication, GatewayConfig, Headers, KeyLocation, LoadBalanceAlgorithm, RateLimitKey,
        Route, Service, ServiceKind, TemplateValue, TransportProtocol,
    },
    core::{
        capability::Feature,
        diagnostics::{route_scope, service_scope},
        export_context::ExportContext,
        provider::ProviderId,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::{nginx_header_var, route_name},
};

pub const REQUEST_ID_VAR: &str = "$request_id";
pub const MSEC_VAR: &str = "$msec";

fn runtime(value: &TemplateValue) -> Option<String> {
    match value {
        TemplateValue::Uuid => Some(REQUEST_ID_VAR.to_string()),
        TemplateValue::Timestamp => Some(MSEC_VAR.to_string()),
        TemplateValue::Literal(text) => Some(text.clone()),
    }
}

/// Renders an APISIX standalone configuration file.
#[derive(Clone, Default)]
pub struct ApisixExporter {
    grpc: GrpcScripting,
}

impl ApisixExporter {
    pub fn new(grpc: GrpcScripting) -> Self {
        Self { grpc }
    }

    fn scheme(service: &Service) -> &'static str {
        match (service.kind, service.transport_protocol) {
            (ServiceKind::Grpc, TransportProtocol::Https) => "grpcs",
            (ServiceKind::Grpc, _) => "grpc",
            (ServiceKind::Rest, TransportProtocol::Https) => "https",
            (ServiceKind::Rest, _) => "http",
        }
    }

    /// `/api` matches itself and everything below it.
    pub fn uris(prefix: &str) -> Vec<String> {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            vec!["/*".to_string()]
        } else {
            vec![trimmed.to_string(), format!("{trimmed}/*")]
        }
    }

    fn upstream(ctx: &mut ExportContext<'_>, service: &Service) -> ApisixUpstream {
        let upstream = &service.upstream;
        let scope = service_scope(&service.name);
        let mut native = ApisixUpstream {
            id: Some(service.name.clone()),
            scheme: Some(Self::scheme(service).to_string()),
            nodes: ApisixNodes::List(
                upstream
                    .targets
                    .iter()
                    .map(|t| ApisixNode {
                        host: t.host.clone(),
                        port: t.port,
                        weight: t.weight,
                    })
                    .collect(),
            ),
            ..ApisixUpstream::default()
        };
        match upstream.algorithm() {
            None => {}
            Some(LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted) => {
                native.lb_type = Some("roundrobin".to_string());
            }
            Some(LoadBalanceAlgorithm::LeastConn) => {
                native.lb_type = Some("least_conn".to_string());
            }
            Some(LoadBalanceAlgorithm::IpHash) => {
                native.lb_type = Some("chash".to_string());
                native.hash_on = Some("vars".to_string());
                native.key = Some("remote_addr".to_string());
            }
        }
        if service.kind == ServiceKind::Rest
            && service.transport_protocol == TransportProtocol::Http2
        {
            ctx.warn(
                &scope,
                "service.transportProtocol",
                "APISIX speaks HTTP/1.1 to REST upstreams; http2 is downgraded",
            );
        }

        if let Some(health_check) = &upstream.health_check {
            let active = health_check.active.as_ref().map(|a| ApisixActiveCheck {
                check_type: Some("http".to_string()),
                http_path: a.path.clone(),
                timeout: Some(a.timeout.as_secs_f64()),
                healthy: ApisixThresholds {
                    interval: Some(a.interval.as_secs().max(1)),
                    successes: Some(a.healthy_threshold),
                    ..ApisixThresholds::default()
                },
                unhealthy: ApisixThresholds {
                    interval: Some(a.interval.as_secs().max(1)),
                    http_failures: Some(a.unhealthy_threshold),
                    ..ApisixThresholds::default()
                },
            });
            let passive = health_check.passive.as_ref().map(|p| ApisixPassiveCheck {
                unhealthy: ApisixThresholds {
                    http_failures: Some(p.max_failures),
                    http_statuses: p.unhealthy_status_codes.clone(),
                    ..ApisixThresholds::default()
                },
            });
            native.checks = Some(ApisixChecks { active, passive });
        }

        let routes = ctx.routes(service);
        if let Some((first, retry)) = routes
            .iter()
            .find_map(|(i, r)| r.retry.as_ref().map(|retry| (*i, retry)))
        {
            native.retries = Some(retry.attempts);
            for (index, route) in &routes {
                if *index != first && route.retry.as_ref().is_some_and(|r| r.attempts != retry.attempts) {
                    ctx.warn(
                        &route_scope(&service.name, *index, &route.path_prefix),
                        Feature::Retry.path().as_str(),
                        format!("retries are set on the upstream; route {first}'s attempts are used"),
                    );
                }
            }
        }
        native
    }

    async fn route(
        &self,
        ctx: &mut ExportContext<'_>,
        service: &Service,
        index: usize,
        route: &Route,
        consumers: &mut Vec<ApisixConsumer>,
    ) -> TranslateResult<ApisixRoute> {
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let mut native = ApisixRoute {
            id: route_name(&service.name, index),
            uris: Self::uris(&route.path_prefix),
            methods: route.methods.as_ref().map(|m| method_names(m)),
            upstream_id: Some(service.name.clone()),
            ..ApisixRoute::default()
        };
        let plugins = &mut native.plugins;

        if let Some(timeout) = &route.timeout {
            native.timeout = Some(ApisixTimeout {
                connect: timeout.connect.map(|d| d.as_secs_f64()),
                send: timeout.read.map(|d| d.as_secs_f64()),
                read: timeout.read.map(|d| d.as_secs_f64()),
            });
        }

        match &route.authentication {
            None | Some(Authentication::None) => {}
            Some(Authentication::Basic { users }) => {
                plugins.insert("basic-auth".to_string(), json!({}));
                for user in users {
                    if consumers.iter().any(|c| c.username == user.username) {
                        continue;
                    }
                    let mut consumer_plugins = IndexMap::new();
                    consumer_plugins.insert(
                        "basic-auth".to_string(),
                        json!({"username": user.username, "password": user.password}),
                    );
                    consumers.push(ApisixConsumer {
                        username: user.username.clone(),
                        plugins: consumer_plugins,
                    });
                }
            }
            Some(Authentication::ApiKey { key_name, location }) => {
                let field = match location {
                    KeyLocation::Header => "header",
                    KeyLocation::Query => "query",
                };
                plugins.insert("key-auth".to_string(), json!({ field: key_name }));
            }
            Some(Authentication::Jwt {
                issuer, audiences, ..
            }) => {
                plugins.insert(
                    "openid-connect".to_string(),
                    json!({
                        "client_id": audiences.first().cloned().unwrap_or_else(|| "gatemorph".to_string()),
                        "client_secret": "",
                        "discovery": format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/')),
                        "bearer_only": true,
                        "use_jwks": true,
                    }),
                );
            }
        }

        if let Some(limit) = &route.rate_limit {
            let key = match limit.key_type {
                RateLimitKey::IpAddress => "remote_addr".to_string(),
                RateLimitKey::Header => {
                    nginx_header_var(limit.key_header.as_deref().unwrap_or_default())
                }
            };
            plugins.insert(
                "limit-req".to_string(),
                json!({
                    "rate": limit.requests_per_second,
                    "burst": limit.excess_burst(),
                    "rejected_code": limit.response_status,
                    "key_type": "var",
                    "key": key,
                }),
            );
        }

        if let Some(cors) = &route.cors {
            let mut config = json!({
                "allow_origins": cors.allowed_origins.join(","),
                "allow_credential": cors.allow_credentials,
            });
            if !cors.allowed_methods.is_empty() {
                config["allow_methods"] = json!(cors.allowed_methods.join(","));
            }
            if !cors.allowed_headers.is_empty() {
                config["allow_headers"] = json!(cors.allowed_headers.join(","));
            }
            if !cors.expose_headers.is_empty() {
                config["expose_headers"] = json!(cors.expose_headers.join(","));
            }
            if let Some(max_age) = cors.max_age_seconds {
                config["max_age"] = json!(max_age);
            }
            plugins.insert("cors".to_string(), config);
        }

        if let Some(headers) = &route.headers {
            Self::headers(ctx, &scope, headers, plugins);
        }

        if let Some(target) = route.mirroring.as_ref().and_then(|m| m.targets.first()) {
            plugins.insert(
                "proxy-mirror".to_string(),
                json!({
                    "host": format!("http://{}", target.upstream.authority()),
                    "sample_ratio": f64::from(target.weight.min(100)) / 100.0,
                }),
            );
        }

        if let Some(split) = &route.traffic_split {
            let mut weighted = Vec::new();
            for target in &split.targets {
                if !target.extra_headers.is_empty() {
                    ctx.warn(
                        &scope,
                        Feature::TrafficSplit.path().as_str(),
                        format!("{}: per-destination headers are not supported by traffic-split", target.name),
                    );
                }
                weighted.push(json!({
                    "upstream": {
                        "name": target.name,
                        "type": "roundrobin",
                        "nodes": { target.upstream.authority(): 1 },
                    },
                    "weight": target.weight,
                }));
            }
            plugins.insert(
                "traffic-split".to_string(),
                json!({"rules": [{"weighted_upstreams": weighted}]}),
            );
        }

        if let Some(breaker) = &service.upstream.circuit_breaker {
            let statuses = if breaker.unhealthy_status_codes.is_empty() {
                vec![500, 502, 503, 504]
            } else {
                breaker.unhealthy_status_codes.clone()
            };
            plugins.insert(
                "api-breaker".to_string(),
                json!({
                    "break_response_code": 502,
                    "max_breaker_sec": breaker.window.as_secs().max(3),
                    "unhealthy": {"http_statuses": statuses, "failures": breaker.max_failures},
                }),
            );
        }

        if let Some(grpc) = &route.grpc_transformation {
            if let Some(scripts) = self.grpc.generate(ctx, &scope, grpc, LuaHost::Apisix).await? {
                if let Some(request) = scripts.request {
                    native
                        .plugins
                        .insert("serverless-pre-function".to_string(), json!({"phase": "rewrite", "functions": [request]}));
                }
                if let Some(response) = scripts.response {
                    native.plugins.insert(
                        "serverless-post-function".to_string(),
                        json!({"phase": "body_filter", "functions": [response]}),
                    );
                }
            }
        }
        Ok(native)
    }

    /// The first request `{{uuid}}` header is produced by the request-id
    /// plugin; every other template becomes an nginx variable.
    fn headers(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        headers: &Headers,
        plugins: &mut IndexMap<String, Value>,
    ) {
        let request_id = headers
            .request_add
            .iter()
            .find(|(_, v)| **v == TemplateValue::Uuid)
            .map(|(name, _)| name.clone());
        let echoed = request_id
            .as_ref()
            .is_some_and(|name| headers.response_add.get(name) == Some(&TemplateValue::Uuid));
        if let Some(name) = &request_id {
            plugins.insert(
                "request-id".to_string(),
                json!({"header_name": name, "include_in_response": echoed, "algorithm": "uuid"}),
            );
        }

        let mut request_set = serde_json::Map::new();
        for (name, value) in &headers.request_add {
            if Some(name) == request_id.as_ref() {
                continue;
            }
            if let Some(resolved) = ctx.template(scope, name, value, runtime) {
                request_set.insert(name.clone(), json!(resolved));
            }
        }
        let mut response_set = serde_json::Map::new();
        for (name, value) in &headers.response_add {
            if echoed && Some(name) == request_id.as_ref() {
                continue;
            }
            if let Some(resolved) = ctx.template(scope, name, value, runtime) {
                response_set.insert(name.clone(), json!(resolved));
            }
        }

        let section = |set: serde_json::Map<String, Value>, remove: &[String]| {
            let mut headers = json!({});
            if !set.is_empty() {
                headers["set"] = Value::Object(set);
            }
            if !remove.is_empty() {
                headers["remove"] = json!(remove);
            }
            headers
        };
        if !request_set.is_empty() || !headers.request_remove.is_empty() {
            plugins.insert(
                "proxy-rewrite".to_string(),
                json!({"headers": section(request_set, &headers.request_remove)}),
            );
        }
        if !response_set.is_empty() || !headers.response_remove.is_empty() {
            plugins.insert(
                "response-rewrite".to_string(),
                json!({"headers": section(response_set, &headers.response_remove)}),
            );
        }
    }
}

#[async_trait]
impl Exporter for ApisixExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Apisix
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "apisix"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Apisix, config)?;
        let mut document = ApisixConfig::default();

        for service in ctx.services() {
            document.upstreams.push(Self::upstream(&mut ctx, service));
            for (index, route) in ctx.routes(service) {
                let rendered = self
                    .route(&mut ctx, service, index, route, &mut document.consumers)
                    .await?;
                document.routes.push(rendered);
            }
        }

        let mut value = to_value(ProviderId::Apisix, &document)?;
        if let Some(extra) = ctx.global_config() {
            merge_value(&mut value, extra);
        }
        let mut text = to_yaml(ProviderId::Apisix, &value)?;
        text.push_str(END_MARKER);
        text.push('\n');
        Ok(ctx.finish(text))
    }
}
