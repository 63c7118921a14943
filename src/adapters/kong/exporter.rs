use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::model::{
    FORMAT_VERSION, KongActiveCheck, KongBasicCredential, KongConfig, KongConsumer,
    KongHealthchecks, KongJwtSecret, KongPassiveCheck, KongPlugin, KongRoute, KongService,
    KongTarget, KongThresholds, KongUpstream,
};
use crate::{
    adapters::{
        common::{merge_value, method_names, to_value, to_yaml},
        lua::{GrpcScripting, LuaHost},
    },
    config::models::{
        Authentication, Headers, KeyLocation, LoadBalanceAlgorithm, RateLimitKey, Route, Service,
        ServiceKind, TemplateValue, TransportProtocol, Upstream,
    },
    core::{
        capability::Feature, diagnostics::route_scope, export_context::ExportContext,
        provider::ProviderId,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::{route_name, sanitize_name},
};

/// Renders decK declarative configuration.
#[derive(Clone, Default)]
pub struct KongExporter {
    grpc: GrpcScripting,
}

impl KongExporter {
    pub fn new(grpc: GrpcScripting) -> Self {
        Self { grpc }
    }

    pub fn upstream_name(service: &str) -> String {
        format!("{service}-upstream")
    }

    fn protocol(service: &Service) -> &'static str {
        match (service.kind, service.transport_protocol) {
            (ServiceKind::Grpc, TransportProtocol::Https) => "grpcs",
            (ServiceKind::Grpc, _) => "grpc",
            (ServiceKind::Rest, TransportProtocol::Https) => "https",
            (ServiceKind::Rest, _) => "http",
        }
    }

    fn upstream(ctx: &mut ExportContext<'_>, service: &Service) -> KongUpstream {
        let upstream: &Upstream = &service.upstream;
        let (algorithm, hash_on) = match upstream.algorithm() {
            None => (None, None),
            Some(LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted) => {
                (Some("round-robin"), None)
            }
            Some(LoadBalanceAlgorithm::LeastConn) => (Some("least-connections"), None),
            Some(LoadBalanceAlgorithm::IpHash) => (Some("consistent-hashing"), Some("ip")),
        };

        let mut healthchecks = KongHealthchecks::default();
        if let Some(active) = upstream.health_check.as_ref().and_then(|h| h.active.as_ref()) {
            healthchecks.active = Some(KongActiveCheck {
                check_type: "http".to_string(),
                http_path: active.path.clone(),
                timeout: active.timeout.as_secs_f64(),
                healthy: KongThresholds {
                    interval: Some(active.interval.as_secs_f64()),
                    successes: Some(active.healthy_threshold),
                    ..KongThresholds::default()
                },
                unhealthy: KongThresholds {
                    interval: Some(active.interval.as_secs_f64()),
                    http_failures: Some(active.unhealthy_threshold),
                    ..KongThresholds::default()
                },
            });
        }
        let passive = upstream.health_check.as_ref().and_then(|h| h.passive.as_ref());
        match (passive, &upstream.circuit_breaker) {
            (Some(passive), _) => {
                healthchecks.passive = Some(KongPassiveCheck {
                    unhealthy: KongThresholds {
                        http_failures: Some(passive.max_failures),
                        http_statuses: passive.unhealthy_status_codes.clone(),
                        ..KongThresholds::default()
                    },
                });
            }
            (None, Some(breaker)) => {
                healthchecks.passive = Some(KongPassiveCheck {
                    unhealthy: KongThresholds {
                        http_failures: Some(breaker.max_failures),
                        http_statuses: breaker.unhealthy_status_codes.clone(),
                        ..KongThresholds::default()
                    },
                });
            }
            (None, None) => {}
        }

        let targets = upstream
            .targets
            .iter()
            .map(|t| KongTarget {
                target: t.authority(),
                weight: t.weight,
            })
            .collect();
        if upstream.targets.iter().any(|t| t.weight == 0) {
            ctx.info(
                &crate::core::diagnostics::service_scope(&service.name),
                "upstream.targets.weight",
                "targets with weight 0 are kept but receive no traffic",
            );
        }

        KongUpstream {
            name: Self::upstream_name(&service.name),
            algorithm: algorithm.map(str::to_string),
            hash_on: hash_on.map(str::to_string),
            healthchecks: (healthchecks.active.is_some() || healthchecks.passive.is_some())
                .then_some(healthchecks),
            targets,
            extra: Default::default(),
        }
    }

    /// Kong keeps timeouts and retries on the service; the first route that
    /// sets them wins.
    fn service_settings(ctx: &mut ExportContext<'_>, service: &Service, kong: &mut KongService) {
        let routes = ctx.routes(service);
        if let Some((first, timeout)) = routes
            .iter()
            .find_map(|(i, r)| r.timeout.as_ref().map(|t| (*i, t)))
        {
            let millis = |d: Option<Duration>| d.map(|d| d.as_millis() as u64);
            kong.connect_timeout = millis(timeout.connect);
            kong.read_timeout = millis(timeout.read);
            kong.write_timeout = millis(timeout.read);
            for (index, route) in &routes {
                if *index != first && route.timeout.as_ref() != Some(timeout) {
                    ctx.warn(
                        &route_scope(&service.name, *index, &route.path_prefix),
                        "route.timeout",
                        format!("Kong applies timeouts per service; route {first}'s timeouts are used"),
                    );
                }
            }
        }
        if let Some(retry) = routes.iter().find_map(|(_, r)| r.retry.as_ref()) {
            kong.retries = Some(retry.attempts);
        }
    }

    async fn route(
        &self,
        ctx: &mut ExportContext<'_>,
        service: &Service,
        index: usize,
        route: &Route,
        consumers: &mut Vec<KongConsumer>,
    ) -> TranslateResult<KongRoute> {
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let grpc_service = service.kind == ServiceKind::Grpc;
        let mut kong = KongRoute {
            name: route_name(&service.name, index),
            paths: vec![route.path_prefix.clone()],
            methods: None,
            protocols: grpc_service.then(|| vec!["grpc".to_string(), "grpcs".to_string()]),
            strip_path: false,
            plugins: Vec::new(),
            extra: Default::default(),
        };

        if let Some(methods) = &route.methods {
            if grpc_service {
                ctx.warn(
                    &scope,
                    Feature::MethodMatch.path().as_str(),
                    "gRPC routes cannot match on methods in Kong; the method list is dropped",
                );
            } else {
                kong.methods = Some(method_names(methods));
            }
        }

        if let Some(auth) = &route.authentication {
            Self::authentication(auth, &mut kong.plugins, consumers);
        }

        if let Some(limit) = &route.rate_limit {
            let mut config = json!({
                "second": limit.requests_per_second,
                "policy": "local",
                "error_code": limit.response_status,
            });
            match limit.key_type {
                RateLimitKey::IpAddress => config["limit_by"] = json!("ip"),
                RateLimitKey::Header => {
                    config["limit_by"] = json!("header");
                    config["header_name"] = json!(limit.key_header);
                }
            }
            kong.plugins.push(KongPlugin::new("rate-limiting", config));
        }

        if let Some(cors) = &route.cors {
            let mut config = json!({
                "origins": cors.allowed_origins,
                "credentials": cors.allow_credentials,
            });
            if !cors.allowed_methods.is_empty() {
                config["methods"] = json!(cors.allowed_methods);
            }
            if !cors.allowed_headers.is_empty() {
                config["headers"] = json!(cors.allowed_headers);
            }
            if !cors.expose_headers.is_empty() {
                config["exposed_headers"] = json!(cors.expose_headers);
            }
            if let Some(max_age) = cors.max_age_seconds {
                config["max_age"] = json!(max_age);
            }
            kong.plugins.push(KongPlugin::new("cors", config));
        }

        if let Some(headers) = &route.headers {
            Self::headers(ctx, &scope, headers, &mut kong.plugins);
        }

        if let Some(grpc) = &route.grpc_transformation {
            if let Some(scripts) = self.grpc.generate(ctx, &scope, grpc, LuaHost::Kong).await? {
                let mut config = json!({});
                if let Some(request) = scripts.request {
                    config["access"] = json!([request]);
                }
                if let Some(response) = scripts.response {
                    config["body_filter"] = json!([response]);
                }
                kong.plugins.push(KongPlugin::new("pre-function", config));
            }
        }

        Ok(kong)
    }

    fn authentication(
        auth: &Authentication,
        plugins: &mut Vec<KongPlugin>,
        consumers: &mut Vec<KongConsumer>,
    ) {
        match auth {
            Authentication::None => {}
            Authentication::Basic { users } => {
                plugins.push(KongPlugin::new("basic-auth", json!({"hide_credentials": false})));
                for user in users {
                    if consumers.iter().any(|c| c.username == user.username) {
                        continue;
                    }
                    consumers.push(KongConsumer {
                        username: user.username.clone(),
                        basicauth_credentials: vec![KongBasicCredential {
                            username: user.username.clone(),
                            password: user.password.clone(),
                        }],
                        ..KongConsumer::default()
                    });
                }
            }
            Authentication::ApiKey { key_name, location } => {
                plugins.push(KongPlugin::new(
                    "key-auth",
                    json!({
                        "key_names": [key_name],
                        "key_in_header": *location == KeyLocation::Header,
                        "key_in_query": *location == KeyLocation::Query,
                        "hide_credentials": false,
                    }),
                ));
            }
            Authentication::Jwt { issuer, .. } => {
                plugins.push(KongPlugin::new(
                    "jwt",
                    json!({"key_claim_name": "iss", "claims_to_verify": ["exp"]}),
                ));
                let username = sanitize_name(issuer);
                if !consumers.iter().any(|c| c.username == username) {
                    consumers.push(KongConsumer {
                        username,
                        jwt_secrets: vec![KongJwtSecret {
                            key: issuer.clone(),
                            algorithm: "RS256".to_string(),
                        }],
                        ..KongConsumer::default()
                    });
                }
            }
        }
    }

    fn headers(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        headers: &Headers,
        plugins: &mut Vec<KongPlugin>,
    ) {
        let mut correlation: Option<(String, bool)> = None;
        let mut request_add = Vec::new();
        let mut response_add = Vec::new();

        for (name, value, response) in headers
            .request_add
            .iter()
            .map(|(n, v)| (n, v, false))
            .chain(headers.response_add.iter().map(|(n, v)| (n, v, true)))
        {
            if *value == TemplateValue::Uuid {
                match &mut correlation {
                    None => correlation = Some((name.clone(), response)),
                    Some((header, echo)) if header.eq_ignore_ascii_case(name) && response => {
                        *echo = true;
                    }
                    Some(_) => ctx.warn(
                        scope,
                        Feature::HeaderTemplates.path().as_str(),
                        format!("{name}: Kong generates one correlation id per route; header omitted"),
                    ),
                }
                continue;
            }
            if let Some(resolved) = ctx.template(scope, name, value, |_| None) {
                let entry = format!("{name}:{resolved}");
                if response {
                    response_add.push(entry);
                } else {
                    request_add.push(entry);
                }
            }
        }

        if let Some((header_name, echo)) = correlation {
            plugins.push(KongPlugin::new(
                "correlation-id",
                json!({"header_name": header_name, "generator": "uuid", "echo_downstream": echo}),
            ));
        }

        if !request_add.is_empty() || !headers.request_remove.is_empty() {
            let mut config = json!({});
            if !request_add.is_empty() {
                config["add"] = json!({"headers": request_add});
            }
            if !headers.request_remove.is_empty() {
                config["remove"] = json!({"headers": headers.request_remove});
            }
            plugins.push(KongPlugin::new("request-transformer", config));
        }
        if !response_add.is_empty() || !headers.response_remove.is_empty() {
            let mut config = json!({});
            if !response_add.is_empty() {
                config["add"] = json!({"headers": response_add});
            }
            if !headers.response_remove.is_empty() {
                config["remove"] = json!({"headers": headers.response_remove});
            }
            plugins.push(KongPlugin::new("response-transformer", config));
        }
    }
}

#[async_trait]
impl Exporter for KongExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Kong
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "kong"))]
    async fn export(
        &self,
        config: &crate::config::models::GatewayConfig,
    ) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Kong, config)?;
        let mut document = KongConfig {
            format_version: FORMAT_VERSION.to_string(),
            ..KongConfig::default()
        };

        for service in ctx.services() {
            document.upstreams.push(Self::upstream(&mut ctx, service));

            let port = service.upstream.targets.first().map_or(80, |t| t.port);
            let mut kong = KongService {
                name: service.name.clone(),
                protocol: Self::protocol(service).to_string(),
                host: Self::upstream_name(&service.name),
                port,
                ..KongService::default()
            };
            if service.kind == ServiceKind::Rest
                && service.transport_protocol == TransportProtocol::Http2
            {
                ctx.warn(
                    &crate::core::diagnostics::service_scope(&service.name),
                    "service.transportProtocol",
                    "Kong proxies REST services over HTTP/1.1; http2 is downgraded",
                );
            }
            Self::service_settings(&mut ctx, service, &mut kong);

            for (index, route) in ctx.routes(service) {
                let rendered = self
                    .route(&mut ctx, service, index, route, &mut document.consumers)
                    .await?;
                kong.routes.push(rendered);
            }
            document.services.push(kong);
        }

        let mut value: Value = to_value(ProviderId::Kong, &document)?;
        if let Some(extra) = ctx.global_config() {
            merge_value(&mut value, extra);
        }
        let text = to_yaml(ProviderId::Kong, &value)?;
        Ok(ctx.finish(text))
    }
}
