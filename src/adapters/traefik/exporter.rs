use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};

use super::model::{
    ForwardingTimeouts, MirrorRef, MirroringService, Router, Server, ServerHealthCheck,
    ServersLoadBalancer, ServersTransport, ServiceRef, TraefikConfig, TraefikService,
    WeightedService,
};
use crate::{
    adapters::common::{go_duration, htpasswd_sha, merge_value, to_value, to_yaml},
    config::models::{
        Authentication, Endpoint, GatewayConfig, Headers, LoadBalanceAlgorithm, RateLimitKey,
        Route, Service, Timeout, TransportProtocol,
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

pub const STICKY_COOKIE: &str = "gatemorph_affinity";
pub const BREAKER_EXPRESSION: &str = "ResponseCodeRatio(500, 600, 0, 600) > 0.50";

/// Renders Traefik dynamic configuration for the file provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraefikExporter;

/// Router rule for a prefix and an optional method set.
pub fn router_rule(route: &Route) -> String {
    let mut rule = format!("PathPrefix(`{}`)", route.path_prefix);
    if let Some(methods) = &route.methods {
        let alternatives: Vec<String> = methods.iter().map(|m| format!("Method(`{m}`)")).collect();
        if alternatives.len() == 1 {
            rule.push_str(&format!(" && {}", alternatives[0]));
        } else {
            rule.push_str(&format!(" && ({})", alternatives.join(" || ")));
        }
    }
    rule
}

fn endpoint_service(scheme: &str, endpoint: &Endpoint) -> TraefikService {
    TraefikService {
        load_balancer: Some(ServersLoadBalancer {
            servers: vec![Server {
                url: format!("{scheme}://{}", endpoint.authority()),
                weight: None,
            }],
            ..ServersLoadBalancer::default()
        }),
        ..TraefikService::default()
    }
}

impl TraefikExporter {
    fn scheme(service: &Service) -> &'static str {
        match service.transport_protocol {
            TransportProtocol::Https => "https",
            TransportProtocol::Http2 => "h2c",
            TransportProtocol::Http => "http",
        }
    }

    fn load_balancer(ctx: &mut ExportContext<'_>, service: &Service) -> TraefikService {
        let upstream = &service.upstream;
        let scheme = Self::scheme(service);
        let weights_differ = upstream.targets.windows(2).any(|w| w[0].weight != w[1].weight);
        let mut lb = ServersLoadBalancer {
            servers: upstream
                .targets
                .iter()
                .map(|t| Server {
                    url: format!("{scheme}://{}", t.authority()),
                    weight: (weights_differ || t.weight != 1).then_some(t.weight),
                })
                .collect(),
            ..ServersLoadBalancer::default()
        };
        match upstream.algorithm() {
            None => {}
            Some(LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted) => {
                lb.strategy = Some("wrr".to_string());
            }
            Some(LoadBalanceAlgorithm::LeastConn) => lb.strategy = Some("p2c".to_string()),
            Some(LoadBalanceAlgorithm::IpHash) => {
                lb.sticky = Some(json!({"cookie": {"name": STICKY_COOKIE, "httpOnly": true}}));
            }
        }
        if let Some(active) = upstream.health_check.as_ref().and_then(|h| h.active.as_ref()) {
            lb.health_check = Some(ServerHealthCheck {
                path: active.path.clone(),
                interval: Some(go_duration(active.interval)),
                timeout: Some(go_duration(active.timeout)),
                extra: IndexMap::new(),
            });
        }
        if upstream.targets.iter().any(|t| t.weight == 0) {
            ctx.info(
                &service_scope(&service.name),
                Feature::WeightedTargets.path().as_str(),
                "servers with weight 0 are kept but receive no traffic",
            );
        }
        TraefikService {
            load_balancer: Some(lb),
            ..TraefikService::default()
        }
    }

    /// Traefik keeps forwarding timeouts on a servers transport, one per
    /// service; the first route's timeout wins.
    fn transport(ctx: &mut ExportContext<'_>, service: &Service) -> Option<ServersTransport> {
        let routes = ctx.routes(service);
        let (first, timeout): (usize, &Timeout) = routes
            .iter()
            .find_map(|(i, r)| r.timeout.as_ref().map(|t| (*i, t)))?;
        for (index, route) in &routes {
            if *index != first && route.timeout.as_ref() != Some(timeout) {
                ctx.warn(
                    &route_scope(&service.name, *index, &route.path_prefix),
                    Feature::Timeout.path().as_str(),
                    format!("forwarding timeouts are per service; route {first}'s timeouts are used"),
                );
            }
        }
        Some(ServersTransport {
            forwarding_timeouts: Some(ForwardingTimeouts {
                dial_timeout: timeout.connect.map(go_duration),
                response_header_timeout: timeout.read.map(go_duration),
                idle_conn_timeout: timeout.idle.map(go_duration),
            }),
            extra: IndexMap::new(),
        })
    }

    fn middlewares(
        ctx: &mut ExportContext<'_>,
        service: &Service,
        index: usize,
        route: &Route,
        middlewares: &mut IndexMap<String, Value>,
    ) -> Vec<String> {
        let base = route_name(&service.name, index);
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let mut attached = Vec::new();
        let mut add = |name: String, definition: Value, attached: &mut Vec<String>| {
            middlewares.insert(name.clone(), definition);
            attached.push(name);
        };

        if let Some(Authentication::Basic { users }) = &route.authentication {
            let entries: Vec<String> = users
                .iter()
                .map(|u| htpasswd_sha(&u.username, &u.password))
                .collect();
            add(
                format!("{base}-auth"),
                json!({"basicAuth": {"users": entries}}),
                &mut attached,
            );
        }

        if let Some(limit) = &route.rate_limit {
            let criterion = match limit.key_type {
                RateLimitKey::IpAddress => json!({"ipStrategy": {"depth": 0}}),
                RateLimitKey::Header => json!({"requestHeaderName": limit.key_header}),
            };
            add(
                format!("{base}-ratelimit"),
                json!({"rateLimit": {
                    "average": limit.requests_per_second,
                    "burst": limit.burst.max(limit.requests_per_second),
                    "period": "1s",
                    "sourceCriterion": criterion,
                }}),
                &mut attached,
            );
        }

        if let Some(cors) = &route.cors {
            let mut headers = json!({
                "accessControlAllowOriginList": cors.allowed_origins,
                "accessControlAllowCredentials": cors.allow_credentials,
            });
            if !cors.allowed_methods.is_empty() {
                headers["accessControlAllowMethods"] = json!(cors.allowed_methods);
            }
            if !cors.allowed_headers.is_empty() {
                headers["accessControlAllowHeaders"] = json!(cors.allowed_headers);
            }
            if !cors.expose_headers.is_empty() {
                headers["accessControlExposeHeaders"] = json!(cors.expose_headers);
            }
            if let Some(max_age) = cors.max_age_seconds {
                headers["accessControlMaxAge"] = json!(max_age);
            }
            add(format!("{base}-cors"), json!({"headers": headers}), &mut attached);
        }

        if let Some(headers) = &route.headers {
            if let Some(definition) = Self::header_middleware(ctx, &scope, headers) {
                add(format!("{base}-headers"), definition, &mut attached);
            }
        }

        if let Some(retry) = &route.retry {
            let mut config = json!({"attempts": retry.attempts});
            if let Some(backoff) = retry.backoff {
                config["initialInterval"] = json!(go_duration(backoff));
            }
            add(format!("{base}-retry"), json!({"retry": config}), &mut attached);
        }

        if let Some(breaker) = &service.upstream.circuit_breaker {
            // one breaker per service, shared by its routers
            let name = format!("{}-circuitbreaker", service.name);
            add(
                name,
                json!({"circuitBreaker": {
                    "expression": BREAKER_EXPRESSION,
                    "fallbackDuration": go_duration(breaker.window),
                }}),
                &mut attached,
            );
        }
        attached
    }

    fn header_middleware(ctx: &mut ExportContext<'_>, scope: &str, headers: &Headers) -> Option<Value> {
        let mut request = serde_json::Map::new();
        for (name, value) in &headers.request_add {
            if let Some(resolved) = ctx.template(scope, name, value, |_| None) {
                request.insert(name.clone(), json!(resolved));
            }
        }
        for name in &headers.request_remove {
            request.insert(name.clone(), json!(""));
        }
        let mut response = serde_json::Map::new();
        for (name, value) in &headers.response_add {
            if let Some(resolved) = ctx.template(scope, name, value, |_| None) {
                response.insert(name.clone(), json!(resolved));
            }
        }
        for name in &headers.response_remove {
            response.insert(name.clone(), json!(""));
        }
        if request.is_empty() && response.is_empty() {
            return None;
        }
        let mut definition = json!({});
        if !request.is_empty() {
            definition["customRequestHeaders"] = Value::Object(request);
        }
        if !response.is_empty() {
            definition["customResponseHeaders"] = Value::Object(response);
        }
        Some(json!({"headers": definition}))
    }
}

#[async_trait]
impl Exporter for TraefikExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Traefik
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "traefik"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Traefik, config)?;
        let mut document = TraefikConfig::default();
        let http = &mut document.http;

        for service in ctx.services() {
            let mut main = Self::load_balancer(&mut ctx, service);
            if let Some(transport) = Self::transport(&mut ctx, service) {
                let name = format!("{}-transport", service.name);
                if let Some(lb) = main.load_balancer.as_mut() {
                    lb.servers_transport = Some(name.clone());
                }
                http.servers_transports.insert(name, transport);
            }
            http.services.insert(service.name.clone(), main);
            let scheme = Self::scheme(service);

            for (index, route) in ctx.routes(service) {
                let name = route_name(&service.name, index);
                let mut target = service.name.clone();

                if let Some(split) = &route.traffic_split {
                    let mut refs = Vec::new();
                    for destination in &split.targets {
                        let child = format!("{name}-{}", sanitize_name(&destination.name));
                        if !destination.extra_headers.is_empty() {
                            ctx.warn(
                                &route_scope(&service.name, index, &route.path_prefix),
                                Feature::TrafficSplit.path().as_str(),
                                format!("{}: per-destination headers are not supported", destination.name),
                            );
                        }
                        http.services
                            .insert(child.clone(), endpoint_service(scheme, &destination.upstream));
                        refs.push(ServiceRef {
                            name: child,
                            weight: destination.weight,
                        });
                    }
                    target = format!("{name}-split");
                    http.services.insert(
                        target.clone(),
                        TraefikService {
                            weighted: Some(WeightedService { services: refs }),
                            ..TraefikService::default()
                        },
                    );
                }

                if let Some(mirroring) = route.mirroring.as_ref().filter(|m| !m.targets.is_empty()) {
                    let mut mirrors = Vec::new();
                    for destination in &mirroring.targets {
                        let child = format!("{name}-{}", sanitize_name(&destination.name));
                        http.services
                            .insert(child.clone(), endpoint_service(scheme, &destination.upstream));
                        mirrors.push(MirrorRef {
                            name: child,
                            percent: destination.weight.min(100),
                        });
                    }
                    let mirror_name = format!("{name}-mirror");
                    http.services.insert(
                        mirror_name.clone(),
                        TraefikService {
                            mirroring: Some(MirroringService {
                                service: target,
                                mirrors,
                            }),
                            ..TraefikService::default()
                        },
                    );
                    target = mirror_name;
                }

                let middlewares =
                    Self::middlewares(&mut ctx, service, index, route, &mut http.middlewares);
                http.routers.insert(
                    name,
                    Router {
                        rule: router_rule(route),
                        service: target,
                        middlewares,
                        ..Router::default()
                    },
                );
            }
        }

        let mut value = to_value(ProviderId::Traefik, &document)?;
        if let Some(extra) = ctx.global_config() {
            merge_value(&mut value, extra);
        }
        let text = to_yaml(ProviderId::Traefik, &value)?;
        Ok(ctx.finish(text))
    }
}
