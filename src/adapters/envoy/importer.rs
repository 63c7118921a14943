use std::{collections::HashSet, time::Duration};

use indexmap::IndexMap;
use serde_json::Value;

use super::model::{
    BASIC_AUTH_FILTER, CORS_FILTER, HCM_FILTER, HCM_TYPE, JWT_FILTER, LUA_FILTER,
    RATELIMIT_FILTER, REQUEST_ID_EXPR, ROUTER_FILTER, START_TIME_EXPR, per_filter,
    socket_addresses,
};
use crate::{
    adapters::{
        common::{
            DOCUMENT_SCOPE, from_yaml, parse_htpasswd, parse_methods, round_robin_for,
            value_duration,
        },
        lua::extract_embedded,
    },
    config::models::{
        ActiveHealthCheck, Authentication, BasicUser, CircuitBreaker, Cors, Endpoint,
        GatewayConfig, HealthCheck, Headers, LoadBalanceAlgorithm, LoadBalancer, Mirroring,
        PassiveHealthCheck, RateLimit, Retry, Route, Service, ServiceKind, Target, TemplateValue,
        Timeout, TrafficSplit, TransportProtocol, Upstream, WeightedDestination,
    },
    core::{
        diagnostics::{Diagnostics, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateError, TranslateResult, Translation},
    utils::names::parse_route_name,
};

const KNOWN_CLUSTER_KEYS: [&str; 12] = [
    "name",
    "type",
    "connect_timeout",
    "lb_policy",
    "load_assignment",
    "health_checks",
    "outlier_detection",
    "typed_extension_protocol_options",
    "http2_protocol_options",
    "transport_socket",
    "dns_lookup_family",
    "common_lb_config",
];
const KNOWN_ROUTE_KEYS: [&str; 8] = [
    "name",
    "match",
    "route",
    "request_headers_to_add",
    "request_headers_to_remove",
    "response_headers_to_add",
    "response_headers_to_remove",
    "typed_per_filter_config",
];
const KNOWN_ACTION_KEYS: [&str; 7] = [
    "cluster",
    "weighted_clusters",
    "timeout",
    "idle_timeout",
    "retry_policy",
    "request_mirror_policies",
    "hash_policy",
];
const KNOWN_FILTERS: [&str; 6] = [
    CORS_FILTER,
    JWT_FILTER,
    BASIC_AUTH_FILTER,
    RATELIMIT_FILTER,
    LUA_FILTER,
    ROUTER_FILTER,
];

/// Parses an Envoy v3 static bootstrap (YAML or JSON).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvoyImporter;

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn u32_at(value: &Value, pointer: &str) -> Option<u32> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn duration_at(value: &Value, pointer: &str) -> Option<Duration> {
    value.pointer(pointer).and_then(value_duration)
}

fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn comma_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Header value with formatter commands reversed into templates.
fn template_value(raw: &str) -> TemplateValue {
    match raw.trim() {
        REQUEST_ID_EXPR => TemplateValue::Uuid,
        START_TIME_EXPR => TemplateValue::Timestamp,
        _ => TemplateValue::Literal(raw.replace("%%", "%")),
    }
}

fn headers_added(entries: &[Value]) -> IndexMap<String, TemplateValue> {
    entries
        .iter()
        .filter_map(|entry| {
            let key = str_at(entry, "/header/key")?;
            let value = str_at(entry, "/header/value").unwrap_or_default();
            Some((key.to_string(), template_value(value)))
        })
        .collect()
}

fn names(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Part of a generated cluster name after `prefix-`.
fn destination_name(cluster: &str, prefix: &str) -> String {
    cluster
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(cluster)
        .to_string()
}

fn status_code(value: Option<&Value>) -> u16 {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()).unwrap_or(429),
        Some(Value::String(name)) => match name.as_str() {
            "ServiceUnavailable" => 503,
            "Forbidden" => 403,
            "BadRequest" => 400,
            other => other.parse().unwrap_or(429),
        },
        _ => 429,
    }
}

struct Jwt<'a> {
    providers: Option<&'a Value>,
    requirements: Option<&'a Value>,
}

struct ImportedService {
    service: Service,
    connect_timeout: Option<Duration>,
    routes: Vec<(Option<usize>, Route)>,
}

struct ImportState<'a> {
    clusters: IndexMap<&'a str, &'a Value>,
    jwt: Jwt<'a>,
    basic_users: Option<&'a str>,
    services: IndexMap<String, ImportedService>,
    auxiliary: HashSet<String>,
    config: GatewayConfig,
    diagnostics: Diagnostics,
}

impl<'a> ImportState<'a> {
    fn report_unknown(&mut self, scope: &str, entity: &str, value: &Value, known: &[&str]) {
        for key in value
            .as_object()
            .into_iter()
            .flat_map(|o| o.keys())
            .filter(|k| !known.contains(&k.as_str()))
        {
            self.diagnostics.warning(
                scope,
                format!("{entity}.{key}"),
                format!("{entity} field '{key}' has no canonical equivalent and was dropped"),
            );
        }
    }

    fn http_filters(&mut self, manager: &'a Value) {
        for filter in array_at(manager, "/http_filters") {
            let name = filter.get("name").and_then(Value::as_str).unwrap_or_default();
            match name {
                JWT_FILTER => {
                    self.jwt = Jwt {
                        providers: filter.pointer("/typed_config/providers"),
                        requirements: filter.pointer("/typed_config/requirement_map"),
                    };
                }
                BASIC_AUTH_FILTER => {
                    self.basic_users = str_at(filter, "/typed_config/users/inline_string");
                }
                _ if KNOWN_FILTERS.contains(&name) => {}
                other => self.diagnostics.warning(
                    DOCUMENT_SCOPE,
                    format!("http_filters.{other}"),
                    format!("HTTP filter '{other}' has no canonical equivalent and was dropped"),
                ),
            }
        }
    }

    /// Canonical service for a cluster, created on first use.
    fn service(&mut self, name: &str) -> Option<&mut ImportedService> {
        if !self.services.contains_key(name) {
            let cluster = *self.clusters.get(name)?;
            let imported = self.service_from_cluster(name, cluster);
            self.services.insert(name.to_string(), imported);
        }
        self.services.get_mut(name)
    }

    fn service_from_cluster(&mut self, name: &str, cluster: &Value) -> ImportedService {
        let scope = service_scope(name);
        self.report_unknown(&scope, "cluster", cluster, &KNOWN_CLUSTER_KEYS);

        let targets: Vec<Target> = socket_addresses(cluster)
            .into_iter()
            .map(|(host, port, weight, status)| {
                let weight = match status.as_deref() {
                    Some("DRAINING") => 0,
                    _ => weight.unwrap_or(1),
                };
                Target::new(host, port, weight)
            })
            .collect();
        let mut upstream = Upstream::with_targets(targets);
        upstream.load_balancer = match cluster.get("lb_policy").and_then(Value::as_str) {
            None => None,
            Some("ROUND_ROBIN") => Some(round_robin_for(&upstream.targets)),
            Some("LEAST_REQUEST") => Some(LoadBalancer {
                algorithm: LoadBalanceAlgorithm::LeastConn,
            }),
            Some("RING_HASH" | "MAGLEV") => Some(LoadBalancer {
                algorithm: LoadBalanceAlgorithm::IpHash,
            }),
            Some(other) => {
                self.diagnostics.warning(
                    &scope,
                    "cluster.lb_policy",
                    format!("lb_policy {other} has no canonical equivalent; default balancing is used"),
                );
                None
            }
        };

        let mut health = HealthCheck::default();
        if let Some(check) = array_at(cluster, "/health_checks").first() {
            match str_at(check, "/http_health_check/path") {
                Some(path) => {
                    let defaults = ActiveHealthCheck::default();
                    health.active = Some(ActiveHealthCheck {
                        path: path.to_string(),
                        interval: duration_at(check, "/interval").unwrap_or(defaults.interval),
                        timeout: duration_at(check, "/timeout").unwrap_or(defaults.timeout),
                        healthy_threshold: u32_at(check, "/healthy_threshold")
                            .unwrap_or(defaults.healthy_threshold),
                        unhealthy_threshold: u32_at(check, "/unhealthy_threshold")
                            .unwrap_or(defaults.unhealthy_threshold),
                    });
                }
                None => self.diagnostics.warning(
                    &scope,
                    "cluster.health_checks",
                    "only HTTP health checks can be represented; the check was dropped",
                ),
            }
        }
        if let Some(outlier) = cluster.get("outlier_detection") {
            let failures = u32_at(outlier, "/consecutive_5xx").unwrap_or(5);
            match duration_at(outlier, "/interval") {
                Some(window) => {
                    upstream.circuit_breaker = Some(CircuitBreaker {
                        max_failures: failures,
                        window,
                        unhealthy_status_codes: Vec::new(),
                    });
                }
                None => {
                    health.passive = Some(PassiveHealthCheck {
                        max_failures: failures,
                        unhealthy_status_codes: Vec::new(),
                    });
                }
            }
        }
        if health.active.is_some() || health.passive.is_some() {
            upstream.health_check = Some(health);
        }

        let mut service = Service::new(name, upstream);
        let http2 = cluster
            .pointer("/typed_extension_protocol_options")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|o| o.values())
            .any(|options| options.pointer("/explicit_http_config/http2_protocol_options").is_some())
            || cluster.get("http2_protocol_options").is_some();
        if cluster.get("transport_socket").is_some() {
            service.transport_protocol = TransportProtocol::Https;
        } else if http2 {
            service.transport_protocol = TransportProtocol::Http2;
        }

        ImportedService {
            service,
            connect_timeout: duration_at(cluster, "/connect_timeout"),
            routes: Vec::new(),
        }
    }

    fn endpoint(&mut self, cluster: &str) -> Option<Endpoint> {
        self.auxiliary.insert(cluster.to_string());
        let value = *self.clusters.get(cluster)?;
        socket_addresses(value)
            .into_iter()
            .next()
            .map(|(host, port, _, _)| Endpoint { host, port })
    }

    fn route(&mut self, entry: &'a Value) {
        let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
        let Some(action) = entry.get("route") else {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "route",
                format!("route '{name}' has no cluster action (redirect or direct response) and was dropped"),
            );
            return;
        };

        let Some(prefix) = self.path_prefix(name, entry) else {
            return;
        };

        let split_clusters: Vec<(&str, u32, &[Value])> = array_at(action, "/weighted_clusters/clusters")
            .iter()
            .filter_map(|c| {
                let cluster = c.get("name").and_then(Value::as_str)?;
                let weight = c.get("weight").and_then(Value::as_u64).unwrap_or(1) as u32;
                Some((cluster, weight, array_at(c, "/request_headers_to_add")))
            })
            .collect();
        let service_name = match action.get("cluster").and_then(Value::as_str) {
            Some(cluster) => cluster.to_string(),
            None => match parse_route_name(name).filter(|(svc, _)| self.clusters.contains_key(svc)) {
                Some((svc, _)) => svc.to_string(),
                None => match split_clusters.first() {
                    Some((cluster, _, _)) => cluster.to_string(),
                    None => {
                        self.diagnostics.warning(
                            DOCUMENT_SCOPE,
                            "route.route",
                            format!("route '{name}' names no cluster and was dropped"),
                        );
                        return;
                    }
                },
            },
        };
        if self.service(&service_name).is_none() {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "route.route.cluster",
                format!("route '{name}' points at undefined cluster '{service_name}' and was dropped"),
            );
            return;
        }

        let position = parse_route_name(name)
            .filter(|(svc, _)| *svc == service_name)
            .map(|(_, index)| index);
        let scope = route_scope(&service_name, position.unwrap_or_default(), &prefix);
        self.report_unknown(&scope, "route", entry, &KNOWN_ROUTE_KEYS);
        self.report_unknown(&scope, "route.route", action, &KNOWN_ACTION_KEYS);

        let mut route = Route::new(prefix);
        let mut grpc_match = false;
        if let Some(matcher) = entry.get("match") {
            grpc_match = matcher.get("grpc").is_some();
            self.methods(&scope, matcher, &mut route);
        }

        if !split_clusters.is_empty() {
            let mut targets = Vec::new();
            for (cluster, weight, extra) in &split_clusters {
                let Some(upstream) = self.endpoint(cluster) else {
                    self.diagnostics.warning(
                        &scope,
                        "route.trafficSplit",
                        format!("weighted cluster '{cluster}' is undefined and was dropped"),
                    );
                    continue;
                };
                targets.push(WeightedDestination {
                    name: destination_name(cluster, name),
                    weight: *weight,
                    upstream,
                    extra_headers: headers_added(extra)
                        .into_iter()
                        .map(|(k, v)| (k, v.to_string()))
                        .collect(),
                });
            }
            route.traffic_split = Some(TrafficSplit { targets });
        }

        let mut mirrors = Vec::new();
        for policy in array_at(action, "/request_mirror_policies") {
            let Some(cluster) = policy.get("cluster").and_then(Value::as_str) else {
                continue;
            };
            let Some(upstream) = self.endpoint(cluster) else {
                continue;
            };
            let numerator = u32_at(policy, "/runtime_fraction/default_value/numerator").unwrap_or(100);
            let percent = match str_at(policy, "/runtime_fraction/default_value/denominator") {
                Some("TEN_THOUSAND") => numerator / 100,
                Some("MILLION") => numerator / 10_000,
                _ => numerator,
            };
            mirrors.push(WeightedDestination {
                name: destination_name(cluster, &format!("{name}-mirror")),
                weight: percent,
                upstream,
                extra_headers: IndexMap::new(),
            });
        }
        if !mirrors.is_empty() {
            route.mirroring = Some(Mirroring { targets: mirrors });
        }

        let connect = self.services.get(&service_name).and_then(|s| s.connect_timeout);
        let timeout = Timeout {
            connect,
            read: duration_at(action, "/timeout"),
            idle: duration_at(action, "/idle_timeout"),
        };
        if timeout != Timeout::default() {
            route.timeout = Some(timeout);
        }
        if let Some(policy) = action.get("retry_policy") {
            route.retry = Some(Retry {
                attempts: u32_at(policy, "/num_retries").unwrap_or(1),
                backoff: duration_at(policy, "/retry_back_off/base_interval"),
                retry_on: comma_list(policy.get("retry_on").and_then(Value::as_str)),
            });
        }

        let headers = Headers {
            request_add: headers_added(array_at(entry, "/request_headers_to_add")),
            request_remove: names(array_at(entry, "/request_headers_to_remove")),
            response_add: headers_added(array_at(entry, "/response_headers_to_add")),
            response_remove: names(array_at(entry, "/response_headers_to_remove")),
        };
        if !headers.is_empty() {
            route.headers = Some(headers);
        }

        let mut grpc_service = grpc_match;
        if let Some(configs) = entry.get("typed_per_filter_config") {
            grpc_service |= self.per_filter(&scope, name, configs, &mut route);
        }

        if let Some(imported) = self.services.get_mut(&service_name) {
            if grpc_service {
                imported.service.kind = ServiceKind::Grpc;
            }
            imported.routes.push((position, route));
        }
    }

    fn path_prefix(&mut self, name: &str, entry: &Value) -> Option<String> {
        let matcher = entry.get("match")?;
        if let Some(prefix) = matcher.get("prefix").and_then(Value::as_str) {
            return Some(prefix.to_string());
        }
        if let Some(path) = matcher.get("path").and_then(Value::as_str) {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "route.match.path",
                format!("route '{name}': exact path '{path}' is imported as a prefix"),
            );
            return Some(path.to_string());
        }
        self.diagnostics.warning(
            DOCUMENT_SCOPE,
            "route.match",
            format!("route '{name}' matches by regex or template and was dropped"),
        );
        None
    }

    fn methods(&mut self, scope: &str, matcher: &Value, route: &mut Route) {
        for header in array_at(matcher, "/headers") {
            let name = header.get("name").and_then(Value::as_str).unwrap_or_default();
            if name != ":method" {
                self.diagnostics.warning(
                    scope,
                    "route.match.headers",
                    format!("header matcher on '{name}' has no canonical equivalent and was dropped"),
                );
                continue;
            }
            let verbs: Vec<String> = if let Some(exact) = str_at(header, "/string_match/exact")
                .or_else(|| str_at(header, "/exact_match"))
            {
                vec![exact.to_string()]
            } else if let Some(regex) = str_at(header, "/string_match/safe_regex/regex")
                .or_else(|| str_at(header, "/safe_regex_match/regex"))
            {
                regex
                    .trim_start_matches('^')
                    .trim_end_matches('$')
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split('|')
                    .map(str::to_string)
                    .collect()
            } else {
                Vec::new()
            };
            let (methods, unknown) = parse_methods(verbs.iter().map(String::as_str));
            if !unknown.is_empty() || methods.is_empty() {
                self.diagnostics.warning(
                    scope,
                    "route.methods",
                    "method matcher could not be read as a list of verbs and was dropped",
                );
                continue;
            }
            route.methods = Some(methods);
        }
    }

    /// Returns true when a gRPC transformation was recovered.
    fn per_filter(&mut self, scope: &str, name: &str, configs: &Value, route: &mut Route) -> bool {
        let mut grpc = false;
        if let Some(limit) = per_filter(configs, RATELIMIT_FILTER) {
            let per_fill = u32_at(limit, "/token_bucket/tokens_per_fill").unwrap_or(1);
            let interval = duration_at(limit, "/token_bucket/fill_interval")
                .map(|d| d.as_secs_f64())
                .filter(|s| *s > 0.0)
                .unwrap_or(1.0);
            let rps = ((per_fill as f64) / interval).round().max(1.0) as u32;
            let mut rate = RateLimit::per_ip(rps, u32_at(limit, "/token_bucket/max_tokens").unwrap_or(rps));
            rate.response_status = status_code(limit.pointer("/status/code"));
            route.rate_limit = Some(rate);
        }
        if let Some(cors) = per_filter(configs, CORS_FILTER) {
            let mut origins = Vec::new();
            for matcher in array_at(cors, "/allow_origin_string_match") {
                if let Some(exact) = matcher.get("exact").and_then(Value::as_str) {
                    origins.push(exact.to_string());
                } else if str_at(matcher, "/safe_regex/regex") == Some(".*") {
                    origins.push("*".to_string());
                } else {
                    self.diagnostics.warning(
                        scope,
                        "route.cors.allowedOrigins",
                        "only exact origins and the wildcard can be represented",
                    );
                }
            }
            route.cors = Some(Cors {
                allowed_origins: origins,
                allowed_methods: comma_list(str_at(cors, "/allow_methods")),
                allowed_headers: comma_list(str_at(cors, "/allow_headers")),
                expose_headers: comma_list(str_at(cors, "/expose_headers")),
                allow_credentials: cors
                    .get("allow_credentials")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                max_age_seconds: str_at(cors, "/max_age").and_then(|s| s.parse().ok()),
            });
        }
        if let Some(basic) = per_filter(configs, BASIC_AUTH_FILTER) {
            let lines = str_at(basic, "/users/inline_string").or(self.basic_users);
            let users: Vec<BasicUser> = lines
                .unwrap_or_default()
                .lines()
                .filter_map(parse_htpasswd)
                .map(|(username, password)| BasicUser { username, password })
                .collect();
            self.diagnostics.warning(
                scope,
                "route.authentication.basic",
                "htpasswd hashes are imported as passwords",
            );
            route.authentication = Some(Authentication::Basic { users });
        }
        if let Some(jwt) = per_filter(configs, JWT_FILTER) {
            let requirement = jwt
                .get("requirement_name")
                .and_then(Value::as_str)
                .unwrap_or(name);
            match self.jwt_provider(requirement) {
                Some(authentication) => route.authentication = Some(authentication),
                None => self.diagnostics.warning(
                    scope,
                    "route.authentication.jwt",
                    format!("JWT requirement '{requirement}' does not name a remote-JWKS provider"),
                ),
            }
        }
        if let Some(lua) = per_filter(configs, LUA_FILTER) {
            let script = str_at(lua, "/source_code/inline_string").unwrap_or_default();
            match extract_embedded(script) {
                Some(embedded) => {
                    route.grpc_transformation = Some(embedded.adopt(&mut self.config));
                    grpc = true;
                }
                None => self.diagnostics.warning(
                    scope,
                    "route.grpcTransformation",
                    "custom Lua code cannot be represented and was dropped",
                ),
            }
        }
        for key in configs.as_object().into_iter().flat_map(|o| o.keys()) {
            let known = [RATELIMIT_FILTER, CORS_FILTER, BASIC_AUTH_FILTER, JWT_FILTER, LUA_FILTER]
                .iter()
                .any(|f| f.rsplit('.').next() == key.rsplit('.').next());
            if !known {
                self.diagnostics.warning(
                    scope,
                    format!("typed_per_filter_config.{key}"),
                    format!("per-route config for '{key}' has no canonical equivalent and was dropped"),
                );
            }
        }
        grpc
    }

    fn jwt_provider(&mut self, requirement: &str) -> Option<Authentication> {
        let provider_name = self
            .jwt
            .requirements
            .and_then(|map| map.get(requirement))
            .and_then(|r| r.get("provider_name"))
            .and_then(Value::as_str)?;
        let provider = self.jwt.providers?.get(provider_name)?;
        let jwks_uri = str_at(provider, "/remote_jwks/http_uri/uri")?;
        if let Some(cluster) = str_at(provider, "/remote_jwks/http_uri/cluster") {
            self.auxiliary.insert(cluster.to_string());
        }
        Some(Authentication::Jwt {
            issuer: str_at(provider, "/issuer").unwrap_or_default().to_string(),
            audiences: array_at(provider, "/audiences")
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect(),
            jwks_uri: jwks_uri.to_string(),
        })
    }

    fn finish(mut self) -> (GatewayConfig, Diagnostics) {
        for name in self.clusters.keys() {
            if !self.services.contains_key(*name) && !self.auxiliary.contains(*name) {
                self.diagnostics.warning(
                    service_scope(name),
                    "cluster",
                    format!("cluster '{name}' is not referenced by any route and was dropped"),
                );
            }
        }
        for (_, mut imported) in self.services {
            if imported.routes.iter().all(|(position, _)| position.is_some()) {
                imported.routes.sort_by_key(|(position, _)| *position);
            }
            imported.service.routes = imported.routes.into_iter().map(|(_, r)| r).collect();
            self.config.services.push(imported.service);
        }
        (self.config, self.diagnostics)
    }
}

impl Importer for EnvoyImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Envoy
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "envoy"))]
    fn import(&self, input: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let document: Value = from_yaml(ProviderId::Envoy, input)?;
        let Some(resources) = document.get("static_resources") else {
            return Err(TranslateError::parse(
                ProviderId::Envoy,
                "document has no static_resources section",
            ));
        };

        let mut state = ImportState {
            clusters: array_at(resources, "/clusters")
                .iter()
                .filter_map(|c| Some((c.get("name")?.as_str()?, c)))
                .collect(),
            jwt: Jwt {
                providers: None,
                requirements: None,
            },
            basic_users: None,
            services: IndexMap::new(),
            auxiliary: HashSet::new(),
            config: GatewayConfig::new(),
            diagnostics: Diagnostics::new(),
        };
        state.config.provider_hint = Some(ProviderId::Envoy.to_string());

        let managers: Vec<&Value> = array_at(resources, "/listeners")
            .iter()
            .flat_map(|l| array_at(l, "/filter_chains"))
            .flat_map(|chain| array_at(chain, "/filters"))
            .filter(|f| {
                f.get("name").and_then(Value::as_str) == Some(HCM_FILTER)
                    || str_at(f, "/typed_config/@type") == Some(HCM_TYPE)
            })
            .filter_map(|f| f.get("typed_config"))
            .collect();
        if managers.is_empty() {
            state.diagnostics.warning(
                DOCUMENT_SCOPE,
                "listeners",
                "no HTTP connection manager found; no routes were imported",
            );
        }
        for manager in managers {
            state.http_filters(manager);
            if manager.get("rds").is_some() {
                state.diagnostics.warning(
                    DOCUMENT_SCOPE,
                    "route_config.rds",
                    "routes served over RDS cannot be imported from a static document",
                );
            }
            for host in array_at(manager, "/route_config/virtual_hosts") {
                for entry in array_at(host, "/routes") {
                    state.route(entry);
                }
            }
        }

        if let Some(root) = document.as_object() {
            for (key, value) in root.iter().filter(|(k, _)| k.as_str() != "static_resources") {
                let passthrough = state
                    .config
                    .global_config
                    .entry(ProviderId::Envoy.to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Some(object) = passthrough.as_object_mut() {
                    object.insert(key.clone(), value.clone());
                }
            }
        }

        let (config, diagnostics) = state.finish();
        tracing::info!(services = config.services.len(), "envoy bootstrap imported");
        Ok(Translation::new(config, diagnostics))
    }
}
