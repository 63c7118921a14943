use std::{cmp::Reverse, time::Duration};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use super::model::{
    APP_LABEL, AUTHORIZATION_POLICY, DESTINATION_RULE, JWT_SUFFIX, KIND_LABEL, NETWORKING_API,
    REQUEST_AUTHENTICATION, REQUIRE_JWT_SUFFIX, SECURITY_API, VIRTUAL_SERVICE, render_documents,
    resource,
};
use crate::{
    adapters::common::{go_duration, method_names},
    config::models::{
        Authentication, Cors, GatewayConfig, Headers, LoadBalanceAlgorithm, Route, Service,
        ServiceKind, TemplateValue, TransportProtocol,
    },
    core::{
        capability::Feature,
        diagnostics::{route_scope, service_scope},
        export_context::ExportContext,
        provider::ProviderId,
        weights,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::{route_name, sanitize_name},
};

/// Renders one VirtualService per service, a DestinationRule per backend
/// host that needs a traffic policy and request authentication resources
/// for JWT routes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IstioExporter;

fn destination(host: &str, port: u16) -> Value {
    json!({"host": host, "port": {"number": port}})
}

fn cors_policy(cors: &Cors) -> Value {
    let origins: Vec<Value> = cors
        .allowed_origins
        .iter()
        .map(|origin| {
            if origin == "*" {
                json!({"regex": ".*"})
            } else {
                json!({"exact": origin})
            }
        })
        .collect();
    let mut policy = json!({"allowOrigins": origins});
    if !cors.allowed_methods.is_empty() {
        policy["allowMethods"] = json!(cors.allowed_methods);
    }
    if !cors.allowed_headers.is_empty() {
        policy["allowHeaders"] = json!(cors.allowed_headers);
    }
    if !cors.expose_headers.is_empty() {
        policy["exposeHeaders"] = json!(cors.expose_headers);
    }
    if cors.allow_credentials {
        policy["allowCredentials"] = json!(true);
    }
    if let Some(max_age) = cors.max_age_seconds {
        policy["maxAge"] = json!(go_duration(Duration::from_secs(max_age)));
    }
    policy
}

fn header_operations(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    set: &IndexMap<String, TemplateValue>,
    remove: &[String],
) -> Option<Value> {
    let mut values = Map::new();
    for (name, value) in set {
        // header operations only take static strings
        if let Some(resolved) = ctx.template(scope, name, value, |_| None) {
            values.insert(name.clone(), json!(resolved));
        }
    }
    let mut operations = Map::new();
    if !values.is_empty() {
        operations.insert("set".to_string(), Value::Object(values));
    }
    if !remove.is_empty() {
        operations.insert("remove".to_string(), json!(remove));
    }
    (!operations.is_empty()).then_some(Value::Object(operations))
}

impl IstioExporter {
    /// Destinations for the service's own targets, weights closed to 100.
    fn target_destinations(ctx: &mut ExportContext<'_>, service: &Service) -> Vec<Value> {
        let targets = &service.upstream.targets;
        if targets.len() == 1 {
            return vec![json!({"destination": destination(&targets[0].host, targets[0].port)})];
        }
        let before: Vec<u32> = targets.iter().map(|t| t.weight).collect();
        let normalized = weights::normalize(&before, 100);
        if normalized.changed {
            ctx.warn(
                &service_scope(&service.name),
                Feature::WeightedTargets.path().as_str(),
                weights::describe(&before, &normalized.weights),
            );
        }
        targets
            .iter()
            .zip(normalized.weights)
            .map(|(target, weight)| {
                json!({"destination": destination(&target.host, target.port), "weight": weight})
            })
            .collect()
    }

    fn split_destinations(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        route: &Route,
    ) -> Option<Vec<Value>> {
        let split = route.traffic_split.as_ref().filter(|s| !s.targets.is_empty())?;
        let before: Vec<u32> = split.targets.iter().map(|t| t.weight).collect();
        let normalized = weights::normalize(&before, 100);
        if normalized.changed {
            ctx.warn(
                scope,
                Feature::TrafficSplit.path().as_str(),
                weights::describe(&before, &normalized.weights),
            );
        }
        let destinations = split
            .targets
            .iter()
            .zip(normalized.weights)
            .map(|(target, weight)| {
                let mut entry = json!({
                    "destination": destination(&target.upstream.host, target.upstream.port),
                    "weight": weight,
                });
                if !target.extra_headers.is_empty() {
                    entry["headers"] = json!({"request": {"set": target.extra_headers}});
                }
                entry
            })
            .collect();
        Some(destinations)
    }

    fn http_route(
        ctx: &mut ExportContext<'_>,
        service: &Service,
        index: usize,
        route: &Route,
        targets: &[Value],
    ) -> Value {
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let mut matcher = json!({"uri": {"prefix": route.path_prefix}});
        if let Some(methods) = &route.methods {
            let names = method_names(methods);
            matcher["method"] = if names.len() == 1 {
                json!({"exact": names[0]})
            } else {
                json!({"regex": format!("^({})$", names.join("|"))})
            };
        }

        let destinations =
            Self::split_destinations(ctx, &scope, route).unwrap_or_else(|| targets.to_vec());
        let mut entry = json!({
            "name": route_name(&service.name, index),
            "match": [matcher],
            "route": destinations,
        });

        if let Some(mirroring) = route.mirroring.as_ref().filter(|m| !m.targets.is_empty()) {
            let mut mirrors = Vec::new();
            for target in &mirroring.targets {
                if !target.extra_headers.is_empty() {
                    ctx.warn(
                        &scope,
                        Feature::Mirroring.path().as_str(),
                        format!("extra headers of mirror '{}' cannot be expressed and were omitted", target.name),
                    );
                }
                mirrors.push(json!({
                    "destination": destination(&target.upstream.host, target.upstream.port),
                    "percentage": {"value": f64::from(target.weight.min(100))},
                }));
            }
            entry["mirrors"] = json!(mirrors);
        }
        if let Some(read) = route.timeout.as_ref().and_then(|t| t.read) {
            entry["timeout"] = json!(go_duration(read));
        }
        if let Some(retry) = &route.retry {
            let mut retries = json!({"attempts": retry.attempts});
            if !retry.retry_on.is_empty() {
                retries["retryOn"] = json!(retry.retry_on.join(","));
            }
            entry["retries"] = retries;
        }
        if let Some(cors) = &route.cors {
            entry["corsPolicy"] = cors_policy(cors);
        }
        if let Some(headers) = &route.headers {
            Self::apply_headers(ctx, &scope, headers, &mut entry);
        }
        entry
    }

    fn apply_headers(ctx: &mut ExportContext<'_>, scope: &str, headers: &Headers, entry: &mut Value) {
        let mut operations = Map::new();
        if let Some(request) =
            header_operations(ctx, scope, &headers.request_add, &headers.request_remove)
        {
            operations.insert("request".to_string(), request);
        }
        if let Some(response) =
            header_operations(ctx, scope, &headers.response_add, &headers.response_remove)
        {
            operations.insert("response".to_string(), response);
        }
        if !operations.is_empty() {
            entry["headers"] = Value::Object(operations);
        }
    }

    /// Connect and idle timeouts belong to the connection pool; the first
    /// route that sets each decides.
    fn pool_timeouts(ctx: &ExportContext<'_>, service: &Service) -> (Option<Duration>, Option<Duration>) {
        let routes = ctx.routes(service);
        let timeouts = || routes.iter().filter_map(|(_, r)| r.timeout.as_ref());
        (
            timeouts().find_map(|t| t.connect),
            timeouts().find_map(|t| t.idle),
        )
    }

    fn traffic_policy(ctx: &ExportContext<'_>, service: &Service, sni: &str) -> Map<String, Value> {
        let upstream = &service.upstream;
        let mut policy = Map::new();
        if let Some(algorithm) = upstream.algorithm() {
            let lb = match algorithm {
                LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted => {
                    json!({"simple": "ROUND_ROBIN"})
                }
                LoadBalanceAlgorithm::LeastConn => json!({"simple": "LEAST_REQUEST"}),
                LoadBalanceAlgorithm::IpHash => json!({"consistentHash": {"useSourceIp": true}}),
            };
            policy.insert("loadBalancer".to_string(), lb);
        }

        let mut pool = Map::new();
        let (connect, idle) = Self::pool_timeouts(ctx, service);
        if let Some(connect) = connect {
            pool.insert("tcp".to_string(), json!({"connectTimeout": go_duration(connect)}));
        }
        let mut http = Map::new();
        if let Some(idle) = idle {
            http.insert("idleTimeout".to_string(), json!(go_duration(idle)));
        }
        if service.transport_protocol == TransportProtocol::Http2 || service.kind == ServiceKind::Grpc {
            http.insert("h2UpgradePolicy".to_string(), json!("UPGRADE"));
        }
        if !http.is_empty() {
            pool.insert("http".to_string(), Value::Object(http));
        }
        if !pool.is_empty() {
            policy.insert("connectionPool".to_string(), Value::Object(pool));
        }

        let passive = upstream.health_check.as_ref().and_then(|h| h.passive.as_ref());
        let breaker = upstream.circuit_breaker.as_ref();
        if passive.is_some() || breaker.is_some() {
            let failures = passive
                .map(|p| p.max_failures)
                .or(breaker.map(|b| b.max_failures))
                .unwrap_or(5);
            let mut outlier = json!({"consecutive5xxErrors": failures});
            if let Some(breaker) = breaker {
                outlier["interval"] = json!(go_duration(breaker.window));
                outlier["baseEjectionTime"] = json!(go_duration(breaker.window));
            }
            policy.insert("outlierDetection".to_string(), outlier);
        }

        if service.transport_protocol == TransportProtocol::Https {
            policy.insert("tls".to_string(), json!({"mode": "SIMPLE", "sni": sni}));
        }
        policy
    }

    /// One rule per distinct backend host; every rule carries the same policy.
    fn destination_rules(ctx: &ExportContext<'_>, service: &Service) -> Vec<Value> {
        let mut hosts: Vec<&str> = Vec::new();
        for target in &service.upstream.targets {
            if !hosts.contains(&target.host.as_str()) {
                hosts.push(&target.host);
            }
        }
        let mut rules = Vec::new();
        for host in &hosts {
            let policy = Self::traffic_policy(ctx, service, host);
            if policy.is_empty() {
                continue;
            }
            let name = if hosts.len() == 1 {
                service.name.clone()
            } else {
                sanitize_name(&format!("{}-{host}", service.name))
            };
            rules.push(resource(
                NETWORKING_API,
                DESTINATION_RULE,
                &name,
                json!({"host": host, "trafficPolicy": policy}),
            ));
        }
        rules
    }

    /// RequestAuthentication validating the token plus a policy denying
    /// requests on the route's prefix that carry none.
    fn jwt_resources(
        service: &Service,
        index: usize,
        route: &Route,
        issuer: &str,
        audiences: &[String],
        jwks_uri: &str,
    ) -> [Value; 2] {
        let name = route_name(&service.name, index);
        let selector = json!({"matchLabels": {APP_LABEL: service.name}});
        let mut rule = json!({"issuer": issuer, "jwksUri": jwks_uri, "forwardOriginalToken": true});
        if !audiences.is_empty() {
            rule["audiences"] = json!(audiences);
        }
        let authentication = resource(
            SECURITY_API,
            REQUEST_AUTHENTICATION,
            &format!("{name}{JWT_SUFFIX}"),
            json!({"selector": selector, "jwtRules": [rule]}),
        );
        let prefix = route.path_prefix.trim_end_matches('/');
        let paths = if prefix.is_empty() {
            vec!["*".to_string()]
        } else {
            vec![prefix.to_string(), format!("{prefix}/*")]
        };
        let authorization = resource(
            SECURITY_API,
            AUTHORIZATION_POLICY,
            &format!("{name}{REQUIRE_JWT_SUFFIX}"),
            json!({
                "selector": selector,
                "action": "DENY",
                "rules": [{
                    "from": [{"source": {"notRequestPrincipals": ["*"]}}],
                    "to": [{"operation": {"paths": paths}}],
                }],
            }),
        );
        [authentication, authorization]
    }

    fn virtual_service(
        ctx: &mut ExportContext<'_>,
        service: &Service,
        security: &mut Vec<Value>,
    ) -> Value {
        let targets = Self::target_destinations(ctx, service);
        let mut routes: Vec<(usize, Value)> = Vec::new();
        for (index, route) in ctx.routes(service) {
            let entry = Self::http_route(ctx, service, index, route, &targets);
            routes.push((route.path_prefix.len(), entry));
            if let Some(Authentication::Jwt {
                issuer,
                audiences,
                jwks_uri,
            }) = &route.authentication
            {
                security.extend(Self::jwt_resources(
                    service, index, route, issuer, audiences, jwks_uri,
                ));
            }
        }
        // http routes match first-wins
        routes.sort_by_key(|(length, _)| Reverse(*length));
        let http: Vec<Value> = routes.into_iter().map(|(_, entry)| entry).collect();

        let mut document = resource(
            NETWORKING_API,
            VIRTUAL_SERVICE,
            &service.name,
            json!({"hosts": [service.name], "http": http}),
        );
        if service.kind == ServiceKind::Grpc {
            document["metadata"]["labels"] = json!({KIND_LABEL: "grpc"});
        }
        document
    }

    fn passthrough(ctx: &mut ExportContext<'_>, documents: &mut Vec<Value>) {
        match ctx.global_config() {
            Some(Value::Array(extra)) => documents.extend(extra.iter().cloned()),
            Some(extra @ Value::Object(_)) => documents.push(extra.clone()),
            Some(_) => ctx.warn(
                "globalConfig",
                "globalConfig.istio",
                "expected a resource or a list of resources; passthrough ignored",
            ),
            None => {}
        }
    }
}

#[async_trait]
impl Exporter for IstioExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Istio
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "istio"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Istio, config)?;
        let mut documents = Vec::new();
        let mut security = Vec::new();
        for service in ctx.services() {
            documents.push(Self::virtual_service(&mut ctx, service, &mut security));
            documents.extend(Self::destination_rules(&ctx, service));
        }
        documents.extend(security);
        Self::passthrough(&mut ctx, &mut documents);
        let text = render_documents(&documents)?;
        Ok(ctx.finish(text))
    }
}
