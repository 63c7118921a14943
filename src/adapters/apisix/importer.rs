use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    exporter::{MSEC_VAR, REQUEST_ID_VAR},
    model::{ApisixConfig, ApisixNodes, ApisixRoute, ApisixUpstream, END_MARKER},
};
use crate::{
    adapters::{
        common::{
            DOCUMENT_SCOPE, from_yaml, parse_methods, round_robin_for, split_authority,
            split_url, strings_at, template_from,
        },
        lua::extract_embedded,
    },
    config::models::{
        ActiveHealthCheck, Authentication, BasicUser, CircuitBreaker, Cors, Endpoint,
        GatewayConfig, HealthCheck, Headers, KeyLocation, LoadBalanceAlgorithm, LoadBalancer,
        Mirroring, PassiveHealthCheck, RateLimit, RateLimitKey, Retry, Route, Service,
        ServiceKind, Target, TemplateValue, Timeout, TrafficSplit, TransportProtocol, Upstream,
        WeightedDestination,
    },
    core::{
        diagnostics::{Diagnostics, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateResult, Translation},
    utils::names::{header_from_nginx_var, parse_route_name},
};

/// Parses an APISIX standalone configuration file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApisixImporter;

fn nodes(nodes: &ApisixNodes) -> Vec<Target> {
    match nodes {
        ApisixNodes::List(list) => list
            .iter()
            .map(|n| Target::new(&n.host, n.port, n.weight))
            .collect(),
        ApisixNodes::Map(map) => map
            .iter()
            .filter_map(|(authority, weight)| {
                split_authority(authority, 80).map(|(host, port)| Target::new(host, port, *weight))
            })
            .collect(),
    }
}

fn comma_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(_)) => strings_at(value, key),
        _ => Vec::new(),
    }
}

fn header_template(value: &str) -> TemplateValue {
    template_from(value, &[REQUEST_ID_VAR], &[MSEC_VAR])
}

/// Strip the `/*` wildcard the exporter appends.
fn prefix_of(pattern: &str) -> String {
    let prefix = pattern.trim_end_matches('*').trim_end_matches('/');
    if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix.to_string()
    }
}

struct ImportState {
    config: GatewayConfig,
    diagnostics: Diagnostics,
}

impl ImportState {
    fn upstream(&mut self, native: &ApisixUpstream, scope: &str) -> (Upstream, ServiceKind, TransportProtocol) {
        let mut upstream = Upstream::with_targets(nodes(&native.nodes));
        upstream.load_balancer = match native.lb_type.as_deref() {
            None => None,
            Some("roundrobin") => Some(round_robin_for(&upstream.targets)),
            Some("least_conn" | "ewma") => Some(LoadBalancer {
                algorithm: LoadBalanceAlgorithm::LeastConn,
            }),
            Some("chash") => {
                if native.key.as_deref() != Some("remote_addr") {
                    self.diagnostics.warning(
                        scope,
                        "upstream.loadBalancer.ip_hash",
                        format!(
                            "hashing on '{}' is approximated by hashing the client IP",
                            native.key.as_deref().unwrap_or("")
                        ),
                    );
                }
                Some(LoadBalancer {
                    algorithm: LoadBalanceAlgorithm::IpHash,
                })
            }
            Some(other) => {
                self.diagnostics.warning(
                    scope,
                    "upstream.loadBalancer",
                    format!("unknown balancer type '{other}', the default is used"),
                );
                None
            }
        };

        if let Some(checks) = &native.checks {
            let defaults = ActiveHealthCheck::default();
            let active = checks.active.as_ref().map(|a| ActiveHealthCheck {
                path: if a.http_path.is_empty() {
                    defaults.path.clone()
                } else {
                    a.http_path.clone()
                },
                interval: a
                    .healthy
                    .interval
                    .or(a.unhealthy.interval)
                    .map_or(defaults.interval, Duration::from_secs),
                timeout: a.timeout.map_or(defaults.timeout, Duration::from_secs_f64),
                healthy_threshold: a.healthy.successes.unwrap_or(defaults.healthy_threshold),
                unhealthy_threshold: a
                    .unhealthy
                    .http_failures
                    .unwrap_or(defaults.unhealthy_threshold),
            });
            let passive = checks.passive.as_ref().map(|p| PassiveHealthCheck {
                max_failures: p.unhealthy.http_failures.unwrap_or(5),
                unhealthy_status_codes: p.unhealthy.http_statuses.clone(),
            });
            if active.is_some() || passive.is_some() {
                upstream.health_check = Some(HealthCheck { active, passive });
            }
        }

        let (kind, transport) = match native.scheme.as_deref().unwrap_or("http") {
            "grpc" => (ServiceKind::Grpc, TransportProtocol::Http2),
            "grpcs" => (ServiceKind::Grpc, TransportProtocol::Https),
            "https" => (ServiceKind::Rest, TransportProtocol::Https),
            "http" => (ServiceKind::Rest, TransportProtocol::Http),
            other => {
                self.diagnostics.warning(
                    scope,
                    "service.transportProtocol",
                    format!("scheme '{other}' is not supported; http is assumed"),
                );
                (ServiceKind::Rest, TransportProtocol::Http)
            }
        };
        for key in native.extra.keys().filter(|k| !matches!(k.as_str(), "desc" | "labels")) {
            self.diagnostics.warning(
                scope,
                format!("upstream.{key}"),
                format!("upstream field '{key}' has no canonical equivalent and was dropped"),
            );
        }
        (upstream, kind, transport)
    }

    fn route(
        &mut self,
        document: &ApisixConfig,
        native: &ApisixRoute,
        service: &mut Service,
        retries: Option<u32>,
    ) -> Route {
        let index = service.routes.len();
        let patterns = native.patterns();
        let prefix = patterns.first().map_or_else(|| "/".to_string(), |p| prefix_of(p));
        let scope = route_scope(&service.name, index, &prefix);
        if patterns.iter().any(|p| prefix_of(p) != prefix) {
            self.diagnostics.warning(
                &scope,
                "route.pathPrefix",
                format!("only '{prefix}' is kept of {} URI patterns", patterns.len()),
            );
        }
        for key in native
            .extra
            .keys()
            .filter(|k| !matches!(k.as_str(), "name" | "desc" | "labels" | "status" | "priority"))
        {
            self.diagnostics.warning(
                &scope,
                format!("route.{key}"),
                format!("route field '{key}' has no canonical equivalent and was dropped"),
            );
        }

        let mut route = Route::new(prefix);
        if let Some(methods) = &native.methods {
            let (parsed, unknown) = parse_methods(methods.iter().map(String::as_str));
            for method in unknown {
                self.diagnostics
                    .warning(&scope, "route.methods", format!("unknown method '{method}' was dropped"));
            }
            route.methods = Some(parsed);
        }
        if let Some(timeout) = &native.timeout {
            route.timeout = Some(Timeout {
                connect: timeout.connect.map(Duration::from_secs_f64),
                read: timeout.read.or(timeout.send).map(Duration::from_secs_f64),
                idle: None,
            });
        }
        route.retry = retries.filter(|r| *r > 0).map(|attempts| Retry {
            attempts,
            backoff: None,
            retry_on: Vec::new(),
        });

        for (name, config) in &native.plugins {
            self.plugin(document, name, config, &scope, &mut route, service);
        }
        if route.headers.as_ref().is_some_and(Headers::is_empty) {
            route.headers = None;
        }
        route
    }

    fn plugin(
        &mut self,
        document: &ApisixConfig,
        name: &str,
        config: &Value,
        scope: &str,
        route: &mut Route,
        service: &mut Service,
    ) {
        let number = |key: &str| config.get(key).and_then(Value::as_f64);
        match name {
            "limit-req" | "limit-count" => {
                let rate = if name == "limit-req" {
                    number("rate").unwrap_or(1.0)
                } else {
                    number("count").unwrap_or(1.0) / number("time_window").unwrap_or(1.0).max(1.0)
                };
                let rps = rate.ceil().max(1.0) as u32;
                let excess = number("burst").unwrap_or(0.0).max(0.0) as u32;
                let mut limit = RateLimit::per_ip(rps, rps + excess);
                match config.get("key").and_then(Value::as_str) {
                    None | Some("remote_addr") => {}
                    Some(key) => match header_from_nginx_var(key) {
                        Some(header) => {
                            limit.key_type = RateLimitKey::Header;
                            limit.key_header = Some(header);
                        }
                        None => self.diagnostics.warning(
                            scope,
                            "route.rateLimit.keyType",
                            format!("limit key '{key}' is approximated by the client address"),
                        ),
                    },
                }
                if let Some(code) = number("rejected_code") {
                    limit.response_status = code as u16;
                }
                route.rate_limit = Some(limit);
            }
            "cors" => {
                route.cors = Some(Cors {
                    allowed_origins: comma_list(config, "allow_origins"),
                    allowed_methods: comma_list(config, "allow_methods"),
                    allowed_headers: comma_list(config, "allow_headers"),
                    expose_headers: comma_list(config, "expose_headers"),
                    allow_credentials: config
                        .get("allow_credential")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    max_age_seconds: config.get("max_age").and_then(Value::as_u64),
                });
            }
            "key-auth" => {
                let (key_name, location) = match (
                    config.get("header").and_then(Value::as_str),
                    config.get("query").and_then(Value::as_str),
                ) {
                    (Some(header), _) => (header, KeyLocation::Header),
                    (None, Some(query)) => (query, KeyLocation::Query),
                    (None, None) => ("apikey", KeyLocation::Header),
                };
                route.authentication = Some(Authentication::ApiKey {
                    key_name: key_name.to_string(),
                    location,
                });
            }
            "basic-auth" => {
                let users = document
                    .consumers
                    .iter()
                    .filter_map(|c| c.plugins.get("basic-auth"))
                    .filter_map(|auth| {
                        Some(BasicUser {
                            username: auth.get("username")?.as_str()?.to_string(),
                            password: auth.get("password")?.as_str()?.to_string(),
                        })
                    })
                    .collect();
                route.authentication = Some(Authentication::Basic { users });
            }
            "openid-connect" => {
                let discovery = config.get("discovery").and_then(Value::as_str).unwrap_or_default();
                let issuer = discovery
                    .trim_end_matches("/.well-known/openid-configuration")
                    .to_string();
                let audiences = config
                    .get("client_id")
                    .and_then(Value::as_str)
                    .filter(|id| *id != "gatemorph" && !id.is_empty())
                    .map(|id| vec![id.to_string()])
                    .unwrap_or_default();
                let jwks_uri = format!("{issuer}/.well-known/jwks.json");
                self.diagnostics.warning(
                    scope,
                    "route.authentication.jwt",
                    format!("jwksUri derived from the discovery document as {jwks_uri}"),
                );
                route.authentication = Some(Authentication::Jwt {
                    issuer,
                    audiences,
                    jwks_uri,
                });
            }
            "proxy-rewrite" | "response-rewrite" => {
                let response = name == "response-rewrite";
                let headers = route.headers.get_or_insert_with(Headers::default);
                if let Some(native) = config.get("headers").and_then(Value::as_object) {
                    let sectioned = native.contains_key("set")
                        || native.contains_key("add")
                        || native.contains_key("remove");
                    let mut set = Vec::new();
                    let mut remove = Vec::new();
                    if sectioned {
                        for section in ["set", "add"] {
                            if let Some(map) = native.get(section).and_then(Value::as_object) {
                                set.extend(map.iter().map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string())));
                            }
                        }
                        remove = strings_at(config.get("headers").unwrap_or(&Value::Null), "remove");
                    } else {
                        for (key, value) in native {
                            match value.as_str() {
                                Some("") => remove.push(key.clone()),
                                Some(text) => set.push((key.clone(), text.to_string())),
                                None => {}
                            }
                        }
                    }
                    let (add, removed) = if response {
                        (&mut headers.response_add, &mut headers.response_remove)
                    } else {
                        (&mut headers.request_add, &mut headers.request_remove)
                    };
                    for (key, value) in set {
                        add.insert(key, header_template(&value));
                    }
                    removed.extend(remove);
                }
                let others: Vec<&String> = config
                    .as_object()
                    .map(|o| o.keys().filter(|k| k.as_str() != "headers").collect())
                    .unwrap_or_default();
                for key in others {
                    self.diagnostics.warning(
                        scope,
                        format!("plugins.{name}.{key}"),
                        format!("{name} option '{key}' has no canonical equivalent and was dropped"),
                    );
                }
            }
            "request-id" => {
                let header = config
                    .get("header_name")
                    .and_then(Value::as_str)
                    .unwrap_or("X-Request-Id")
                    .to_string();
                let echo = config
                    .get("include_in_response")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let headers = route.headers.get_or_insert_with(Headers::default);
                headers.request_add.insert(header.clone(), TemplateValue::Uuid);
                if echo {
                    headers.response_add.insert(header, TemplateValue::Uuid);
                }
            }
            "proxy-mirror" => {
                let host = config.get("host").and_then(Value::as_str).unwrap_or_default();
                match split_url(host) {
                    Some((_, host, port)) => {
                        let ratio = number("sample_ratio").unwrap_or(1.0);
                        route.mirroring = Some(Mirroring {
                            targets: vec![WeightedDestination {
                                name: "mirror".to_string(),
                                weight: (ratio * 100.0).round() as u32,
                                upstream: Endpoint { host, port },
                                extra_headers: IndexMap::new(),
                            }],
                        });
                    }
                    None => self.diagnostics.warning(
                        scope,
                        "route.mirroring",
                        format!("mirror host '{host}' is not a URL and was dropped"),
                    ),
                }
            }
            "traffic-split" => {
                let weighted = config
                    .get("rules")
                    .and_then(Value::as_array)
                    .and_then(|rules| rules.first())
                    .and_then(|rule| rule.get("weighted_upstreams"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut targets = Vec::new();
                for (i, entry) in weighted.iter().enumerate() {
                    let weight = entry.get("weight").and_then(Value::as_u64).unwrap_or(1) as u32;
                    let upstream = entry
                        .get("upstream")
                        .and_then(|u| serde_json::from_value::<ApisixUpstream>(u.clone()).ok());
                    let (name, endpoint) = match &upstream {
                        Some(u) => (
                            u.name.clone().unwrap_or_else(|| format!("split-{i}")),
                            nodes(&u.nodes).first().map(|t| Endpoint {
                                host: t.host.clone(),
                                port: t.port,
                            }),
                        ),
                        None => (
                            "default".to_string(),
                            service.upstream.targets.first().map(|t| Endpoint {
                                host: t.host.clone(),
                                port: t.port,
                            }),
                        ),
                    };
                    match endpoint {
                        Some(upstream) => targets.push(WeightedDestination {
                            name,
                            weight,
                            upstream,
                            extra_headers: IndexMap::new(),
                        }),
                        None => self.diagnostics.warning(
                            scope,
                            "route.trafficSplit",
                            format!("split destination {i} has no node and was dropped"),
                        ),
                    }
                }
                if config
                    .get("rules")
                    .and_then(Value::as_array)
                    .is_some_and(|r| r.len() > 1 || r.iter().any(|rule| rule.get("match").is_some()))
                {
                    self.diagnostics.warning(
                        scope,
                        "route.trafficSplit",
                        "conditional split rules are flattened into the first weighted rule",
                    );
                }
                if !targets.is_empty() {
                    route.traffic_split = Some(TrafficSplit { targets });
                }
            }
            "api-breaker" => {
                if service.upstream.circuit_breaker.is_none() {
                    let unhealthy = config.get("unhealthy").cloned().unwrap_or(Value::Null);
                    service.upstream.circuit_breaker = Some(CircuitBreaker {
                        max_failures: unhealthy.get("failures").and_then(Value::as_u64).unwrap_or(3) as u32,
                        window: Duration::from_secs(
                            config.get("max_breaker_sec").and_then(Value::as_u64).unwrap_or(300),
                        ),
                        unhealthy_status_codes: unhealthy
                            .get("http_statuses")
                            .and_then(Value::as_array)
                            .map(|codes| codes.iter().filter_map(|c| c.as_u64()).map(|c| c as u16).collect())
                            .unwrap_or_default(),
                    });
                }
            }
            "serverless-pre-function" | "serverless-post-function" => {
                let functions = strings_at(config, "functions");
                match functions.iter().find_map(|f| extract_embedded(f)) {
                    Some(embedded) => {
                        let transformation = embedded.adopt(&mut self.config);
                        if route.grpc_transformation.is_none() {
                            route.grpc_transformation = Some(transformation);
                        }
                        service.kind = ServiceKind::Grpc;
                    }
                    None => self.diagnostics.warning(
                        scope,
                        "route.grpcTransformation",
                        format!("custom {name} code cannot be represented and was dropped"),
                    ),
                }
            }
            other => self.diagnostics.warning(
                scope,
                format!("plugins.{other}"),
                format!("plugin '{other}' has no canonical equivalent and was dropped"),
            ),
        }
    }
}

impl Importer for ApisixImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Apisix
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "apisix"))]
    fn import(&self, native: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let body = native
            .lines()
            .filter(|line| line.trim() != END_MARKER)
            .collect::<Vec<_>>()
            .join("\n");
        let document: ApisixConfig = from_yaml(ProviderId::Apisix, &body)?;
        let mut state = ImportState {
            config: GatewayConfig::new(),
            diagnostics: Diagnostics::new(),
        };
        state.config.provider_hint = Some(ProviderId::Apisix.to_string());

        if !document.extra.is_empty() {
            let passthrough = document
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<serde_json::Map<_, _>>();
            state
                .config
                .global_config
                .insert(ProviderId::Apisix.to_string(), Value::Object(passthrough));
        }

        // services keyed by upstream, in first-use order
        let mut services: IndexMap<String, (Service, Option<u32>)> = IndexMap::new();
        for native_route in &document.routes {
            let (service_name, upstream) = match (&native_route.upstream_id, &native_route.upstream) {
                (Some(id), _) => {
                    let upstream = document.upstreams.iter().find(|u| u.id.as_deref() == Some(id));
                    if upstream.is_none() {
                        state.diagnostics.warning(
                            DOCUMENT_SCOPE,
                            "routes.upstream_id",
                            format!("route '{}' references unknown upstream '{id}'", native_route.id),
                        );
                        continue;
                    }
                    (id.clone(), upstream)
                }
                (None, Some(inline)) => {
                    let name = parse_route_name(&native_route.id)
                        .map_or_else(|| native_route.id.clone(), |(s, _)| s.to_string());
                    (name, Some(inline))
                }
                (None, None) => {
                    state.diagnostics.warning(
                        DOCUMENT_SCOPE,
                        "routes.upstream",
                        format!("route '{}' has no upstream and was dropped", native_route.id),
                    );
                    continue;
                }
            };
            if !services.contains_key(&service_name) {
                let Some(upstream) = upstream else { continue };
                let scope = service_scope(&service_name);
                let (canonical, kind, transport) = state.upstream(upstream, &scope);
                let mut service = Service::new(&service_name, canonical);
                service.kind = kind;
                service.transport_protocol = transport;
                services.insert(service_name.clone(), (service, upstream.retries));
            }
            if let Some((service, retries)) = services.get_mut(&service_name) {
                let retries = *retries;
                let route = state.route(&document, native_route, service, retries);
                service.routes.push(route);
            }
        }

        for upstream in &document.upstreams {
            if let Some(id) = &upstream.id {
                if !services.contains_key(id) {
                    state.diagnostics.warning(
                        DOCUMENT_SCOPE,
                        "upstreams",
                        format!("upstream '{id}' is not used by any route and was dropped"),
                    );
                }
            }
        }

        state.config.services = services.into_values().map(|(s, _)| s).collect();
        tracing::debug!(services = state.config.services.len(), "imported apisix document");
        Ok(Translation::new(state.config, state.diagnostics))
    }
}
