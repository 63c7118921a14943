use std::{collections::HashMap, time::Duration};

use indexmap::IndexMap;
use serde_json::Value;

use super::model::{
    APP_LABEL, AUTHORIZATION_POLICY, DESTINATION_RULE, JWT_SUFFIX, KIND_LABEL,
    REQUEST_AUTHENTICATION, REQUIRE_JWT_SUFFIX, VIRTUAL_SERVICE, kind, name, parse_documents,
};
use crate::{
    adapters::common::{
        DOCUMENT_SCOPE, parse_methods, round_robin_for, strings_at, value_duration,
    },
    config::models::{
        Authentication, CircuitBreaker, Cors, Endpoint, GatewayConfig, HealthCheck, Headers,
        LoadBalanceAlgorithm, LoadBalancer, Mirroring, PassiveHealthCheck, Retry, Route, Service,
        ServiceKind, Target, TemplateValue, Timeout, TrafficSplit, TransportProtocol, Upstream,
        WeightedDestination,
    },
    core::{
        diagnostics::{Diagnostics, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateError, TranslateResult, Translation},
    utils::names::{parse_route_name, sanitize_name},
};

const KNOWN_ROUTE_KEYS: [&str; 10] = [
    "name",
    "match",
    "route",
    "mirrors",
    "mirror",
    "mirrorPercentage",
    "timeout",
    "retries",
    "corsPolicy",
    "headers",
];
const KNOWN_MATCH_KEYS: [&str; 2] = ["uri", "method"];
const KNOWN_POLICY_KEYS: [&str; 4] = ["loadBalancer", "connectionPool", "outlierDetection", "tls"];

/// Parses a stream of Istio VirtualService, DestinationRule and
/// RequestAuthentication resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct IstioImporter;

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

/// `(host, port, weight)` of a route destination.
fn destination(entry: &Value) -> Option<(String, u16, Option<u32>)> {
    let host = str_at(entry, "/destination/host")?;
    let port = entry
        .pointer("/destination/port/number")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(80);
    Some((host.to_string(), port, u32_at(entry, "/weight")))
}

fn header_set(operations: Option<&Value>) -> IndexMap<String, TemplateValue> {
    let mut out = IndexMap::new();
    for key in ["/set", "/add"] {
        if let Some(map) = operations.and_then(|o| o.pointer(key)).and_then(Value::as_object) {
            for (name, value) in map {
                if let Some(value) = value.as_str() {
                    out.insert(name.clone(), TemplateValue::Literal(value.to_string()));
                }
            }
        }
    }
    out
}

fn header_remove(operations: Option<&Value>) -> Vec<String> {
    operations.map(|o| strings_at(o, "remove")).unwrap_or_default()
}

fn mirrors(entry: &Value) -> Vec<WeightedDestination> {
    let mut out = Vec::new();
    let mut add = |target: &Value, percent: Option<f64>| {
        let Some(host) = str_at(target, "/host") else {
            return;
        };
        let port = target
            .pointer("/port/number")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(80);
        out.push(WeightedDestination {
            name: sanitize_name(host),
            weight: percent.map_or(100, |p| p.round().clamp(0.0, 100.0) as u32),
            upstream: Endpoint {
                host: host.to_string(),
                port,
            },
            extra_headers: IndexMap::new(),
        });
    };
    for mirror in array_at(entry, "/mirrors") {
        if let Some(target) = mirror.get("destination") {
            add(target, mirror.pointer("/percentage/value").and_then(Value::as_f64));
        }
    }
    if let Some(target) = entry.get("mirror") {
        add(target, entry.pointer("/mirrorPercentage/value").and_then(Value::as_f64));
    }
    out
}

struct ImportedRoute {
    position: Option<usize>,
    route: Route,
    destinations: Vec<(String, u16, Option<u32>)>,
    /// Per-destination `headers.request.set`, used by splits.
    extra_headers: Vec<IndexMap<String, String>>,
}

struct ImportState<'a> {
    policies: HashMap<&'a str, &'a Value>,
    authentications: Vec<&'a Value>,
    passthrough: Vec<Value>,
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

    fn methods(&mut self, scope: &str, matcher: &Value, route: &mut Route) {
        let Some(method) = matcher.get("method") else {
            return;
        };
        let verbs: Vec<String> = if let Some(exact) = str_at(method, "/exact") {
            vec![exact.to_string()]
        } else if let Some(regex) = str_at(method, "/regex") {
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
            return;
        }
        route.methods = Some(methods);
    }

    fn path_prefix(&mut self, service: &str, name: &str, entry: &Value) -> Option<String> {
        let matches = array_at(entry, "/match");
        let Some(matcher) = matches.first() else {
            return Some("/".to_string());
        };
        if matches.len() > 1 {
            self.diagnostics.warning(
                service_scope(service),
                "http.match",
                format!("route '{name}' has several match blocks; only the first is imported"),
            );
        }
        if let Some(prefix) = str_at(matcher, "/uri/prefix") {
            return Some(prefix.to_string());
        }
        if let Some(exact) = str_at(matcher, "/uri/exact") {
            self.diagnostics.warning(
                service_scope(service),
                "http.match.uri.exact",
                format!("route '{name}': exact path '{exact}' is imported as a prefix"),
            );
            return Some(exact.to_string());
        }
        if matcher.get("uri").is_none() {
            return Some("/".to_string());
        }
        self.diagnostics.warning(
            service_scope(service),
            "http.match.uri",
            format!("route '{name}' matches by regex and was dropped"),
        );
        None
    }

    fn cors(&mut self, scope: &str, policy: &Value) -> Cors {
        let mut origins = Vec::new();
        for matcher in array_at(policy, "/allowOrigins") {
            if let Some(exact) = str_at(matcher, "/exact") {
                origins.push(exact.to_string());
            } else if matches!(str_at(matcher, "/regex"), Some(".*" | "*")) {
                origins.push("*".to_string());
            } else {
                self.diagnostics.warning(
                    scope,
                    "route.cors.allowedOrigins",
                    "only exact origins and the wildcard can be represented",
                );
            }
        }
        origins.extend(strings_at(policy, "allowOrigin"));
        Cors {
            allowed_origins: origins,
            allowed_methods: strings_at(policy, "allowMethods"),
            allowed_headers: strings_at(policy, "allowHeaders"),
            expose_headers: strings_at(policy, "exposeHeaders"),
            allow_credentials: policy
                .get("allowCredentials")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            max_age_seconds: duration_at(policy, "/maxAge").map(|d| d.as_secs()),
        }
    }

    fn http_route(&mut self, service: &str, entry: &Value) -> Option<ImportedRoute> {
        let name = str_at(entry, "/name").unwrap_or_default();
        let prefix = self.path_prefix(service, name, entry)?;
        let position = parse_route_name(name)
            .filter(|(owner, _)| *owner == service)
            .map(|(_, index)| index);
        let scope = route_scope(service, position.unwrap_or_default(), &prefix);
        self.report_unknown(&scope, "http", entry, &KNOWN_ROUTE_KEYS);

        let mut route = Route::new(prefix);
        if let Some(matcher) = array_at(entry, "/match").first() {
            self.report_unknown(&scope, "http.match", matcher, &KNOWN_MATCH_KEYS);
            self.methods(&scope, matcher, &mut route);
        }

        let mut destinations = Vec::new();
        let mut extra_headers: Vec<IndexMap<String, String>> = Vec::new();
        for target in array_at(entry, "/route") {
            match destination(target) {
                Some(found) => {
                    destinations.push(found);
                    extra_headers.push(
                        target
                            .pointer("/headers/request/set")
                            .and_then(Value::as_object)
                            .map(|map| {
                                map.iter()
                                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                                    .collect()
                            })
                            .unwrap_or_default(),
                    );
                }
                None => self.diagnostics.warning(
                    &scope,
                    "http.route.destination",
                    "destination without a host was dropped",
                ),
            }
        }
        if destinations.is_empty() {
            self.diagnostics.warning(
                &scope,
                "http.route",
                format!("route '{name}' has no destinations (redirect or direct response) and was dropped"),
            );
            return None;
        }

        let mirrors = mirrors(entry);
        if !mirrors.is_empty() {
            route.mirroring = Some(Mirroring { targets: mirrors });
        }
        if let Some(read) = duration_at(entry, "/timeout") {
            route.timeout = Some(Timeout {
                read: Some(read),
                ..Timeout::default()
            });
        }
        if let Some(retries) = entry.get("retries") {
            if retries.get("perTryTimeout").is_some() {
                self.diagnostics.warning(
                    &scope,
                    "http.retries.perTryTimeout",
                    "per-try timeouts have no canonical equivalent and were dropped",
                );
            }
            route.retry = Some(Retry {
                attempts: u32_at(retries, "/attempts").unwrap_or(1),
                backoff: None,
                retry_on: str_at(retries, "/retryOn")
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
        if let Some(policy) = entry.get("corsPolicy") {
            route.cors = Some(self.cors(&scope, policy));
        }
        let request = entry.pointer("/headers/request");
        let response = entry.pointer("/headers/response");
        let headers = Headers {
            request_add: header_set(request),
            request_remove: header_remove(request),
            response_add: header_set(response),
            response_remove: header_remove(response),
        };
        if !headers.is_empty() {
            route.headers = Some(headers);
        }

        Some(ImportedRoute {
            position,
            route,
            destinations,
            extra_headers,
        })
    }

    fn traffic_policy(&mut self, service: &mut Service, routes: &mut [ImportedRoute]) {
        let Some(host) = service.upstream.targets.first().map(|t| t.host.clone()) else {
            return;
        };
        let Some(policy) = self.policies.get(host.as_str()).copied() else {
            return;
        };
        let scope = service_scope(&service.name);
        self.report_unknown(&scope, "trafficPolicy", policy, &KNOWN_POLICY_KEYS);

        let upstream = &mut service.upstream;
        if let Some(lb) = policy.get("loadBalancer") {
            upstream.load_balancer = match str_at(lb, "/simple") {
                Some("ROUND_ROBIN") => Some(round_robin_for(&upstream.targets)),
                Some("LEAST_REQUEST" | "LEAST_CONN") => Some(LoadBalancer {
                    algorithm: LoadBalanceAlgorithm::LeastConn,
                }),
                None if lb.pointer("/consistentHash").is_some() => Some(LoadBalancer {
                    algorithm: LoadBalanceAlgorithm::IpHash,
                }),
                other => {
                    self.diagnostics.warning(
                        &scope,
                        "trafficPolicy.loadBalancer",
                        format!(
                            "load balancer {} has no canonical equivalent; default balancing is used",
                            other.unwrap_or("setting")
                        ),
                    );
                    None
                }
            };
        }

        if let Some(outlier) = policy.get("outlierDetection") {
            let failures = u32_at(outlier, "/consecutive5xxErrors")
                .or_else(|| u32_at(outlier, "/consecutiveErrors"))
                .or_else(|| u32_at(outlier, "/consecutiveGatewayErrors"))
                .unwrap_or(5);
            match duration_at(outlier, "/interval") {
                Some(window) => {
                    upstream.circuit_breaker = Some(CircuitBreaker {
                        max_failures: failures,
                        window,
                        unhealthy_status_codes: Vec::new(),
                    });
                }
                None => {
                    upstream.health_check = Some(HealthCheck {
                        active: None,
                        passive: Some(PassiveHealthCheck {
                            max_failures: failures,
                            unhealthy_status_codes: Vec::new(),
                        }),
                    });
                }
            }
        }

        if str_at(policy, "/connectionPool/http/h2UpgradePolicy") == Some("UPGRADE") {
            service.transport_protocol = TransportProtocol::Http2;
        }
        if let Some(mode) = str_at(policy, "/tls/mode") {
            if mode == "SIMPLE" {
                service.transport_protocol = TransportProtocol::Https;
            } else {
                self.diagnostics.warning(
                    &scope,
                    "trafficPolicy.tls.mode",
                    format!("TLS mode {mode} has no canonical equivalent; plain HTTP is assumed"),
                );
            }
        }

        // pool timeouts land on routes that set a timeout, or on the first route
        let connect = duration_at(policy, "/connectionPool/tcp/connectTimeout");
        let idle = duration_at(policy, "/connectionPool/http/idleTimeout");
        if connect.is_some() || idle.is_some() {
            let any_timeout = routes.iter().any(|r| r.route.timeout.is_some());
            for (index, imported) in routes.iter_mut().enumerate() {
                if (any_timeout && imported.route.timeout.is_none()) || (!any_timeout && index > 0) {
                    continue;
                }
                let timeout = imported.route.timeout.get_or_insert_with(Timeout::default);
                timeout.connect = connect;
                timeout.idle = idle;
            }
        }
    }

    fn virtual_service(&mut self, document: &Value) {
        let Some(service_name) = name(document)
            .or_else(|| str_at(document, "/spec/hosts/0"))
            .map(str::to_string)
        else {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "VirtualService.metadata.name",
                "virtual service without a name was dropped",
            );
            return;
        };
        let scope = service_scope(&service_name);
        for section in ["tcp", "tls"] {
            if document.pointer(&format!("/spec/{section}")).is_some() {
                self.diagnostics.warning(
                    &scope,
                    format!("VirtualService.spec.{section}"),
                    format!("{section} routes have no canonical equivalent and were dropped"),
                );
            }
        }

        let mut routes: Vec<ImportedRoute> = array_at(document, "/spec/http")
            .iter()
            .filter_map(|entry| self.http_route(&service_name, entry))
            .collect();
        if routes.is_empty() {
            self.diagnostics.warning(
                &scope,
                "VirtualService.spec.http",
                format!("virtual service '{service_name}' routes nothing and was dropped"),
            );
            return;
        }
        if routes.iter().all(|r| r.position.is_some()) {
            routes.sort_by_key(|r| r.position);
        }

        // the destination list most routes share is the service's target set
        let shared = routes
            .iter()
            .map(|r| {
                let count = routes.iter().filter(|o| o.destinations == r.destinations).count();
                (count, r)
            })
            .rev()
            .max_by_key(|(count, _)| *count)
            .map(|(_, r)| r.destinations.clone())
            .unwrap_or_default();

        let targets: Vec<Target> = shared
            .iter()
            .map(|(host, port, weight)| Target::new(host.clone(), *port, weight.unwrap_or(1)))
            .collect();
        let mut service = Service::new(service_name.clone(), Upstream::with_targets(targets));
        let kind_label = document
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(KIND_LABEL))
            .and_then(Value::as_str);
        if kind_label == Some("grpc") {
            service.kind = ServiceKind::Grpc;
        }

        for imported in &mut routes {
            if imported.destinations != shared {
                imported.route.traffic_split = Some(TrafficSplit {
                    targets: imported
                        .destinations
                        .iter()
                        .zip(&imported.extra_headers)
                        .map(|((host, port, weight), extra)| WeightedDestination {
                            name: sanitize_name(host),
                            weight: weight.unwrap_or(1),
                            upstream: Endpoint {
                                host: host.clone(),
                                port: *port,
                            },
                            extra_headers: extra.clone(),
                        })
                        .collect(),
                });
            }
        }
        self.traffic_policy(&mut service, &mut routes);
        service.routes = routes.into_iter().map(|r| r.route).collect();
        self.config.services.push(service);
    }

    fn authentication(&mut self, document: &Value) {
        let resource_name = name(document).unwrap_or_default();
        let Some(rule) = array_at(document, "/spec/jwtRules").first() else {
            return;
        };
        if array_at(document, "/spec/jwtRules").len() > 1 {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "RequestAuthentication.spec.jwtRules",
                format!("'{resource_name}' has several JWT rules; only the first is imported"),
            );
        }
        let Some(jwks_uri) = str_at(rule, "/jwksUri") else {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "RequestAuthentication.spec.jwtRules.jwks",
                format!("'{resource_name}' embeds its keys instead of naming a JWKS URI and was dropped"),
            );
            return;
        };
        let authentication = Authentication::Jwt {
            issuer: str_at(rule, "/issuer").unwrap_or_default().to_string(),
            audiences: strings_at(rule, "audiences"),
            jwks_uri: jwks_uri.to_string(),
        };

        if let Some((owner, index)) = resource_name
            .strip_suffix(JWT_SUFFIX)
            .and_then(parse_route_name)
        {
            if let Some(route) = self
                .config
                .services
                .iter_mut()
                .find(|s| s.name == owner)
                .and_then(|s| s.routes.get_mut(index))
            {
                route.authentication = Some(authentication);
                return;
            }
        }
        // a workload-wide rule applies to every route of the selected service
        let selected = str_at(document, &format!("/spec/selector/matchLabels/{APP_LABEL}"));
        match selected.and_then(|app| self.config.services.iter_mut().find(|s| s.name == app)) {
            Some(service) => {
                for route in service.routes.iter_mut().filter(|r| r.authentication.is_none()) {
                    route.authentication = Some(authentication.clone());
                }
                self.diagnostics.info(
                    service_scope(&service.name),
                    "route.authentication.jwt",
                    format!("'{resource_name}' selects the whole workload; applied to every route"),
                );
            }
            None => self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "RequestAuthentication",
                format!("'{resource_name}' does not select an imported service and was dropped"),
            ),
        }
    }
}

impl Importer for IstioImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Istio
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "istio"))]
    fn import(&self, input: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let documents = parse_documents(input)?;
        let mut state = ImportState {
            policies: HashMap::new(),
            authentications: Vec::new(),
            passthrough: Vec::new(),
            config: GatewayConfig::new(),
            diagnostics: Diagnostics::new(),
        };
        state.config.provider_hint = Some(ProviderId::Istio.to_string());

        let mut virtual_services = Vec::new();
        for document in &documents {
            match kind(document) {
                Some(VIRTUAL_SERVICE) => virtual_services.push(document),
                Some(DESTINATION_RULE) => {
                    if let (Some(host), Some(policy)) = (
                        str_at(document, "/spec/host"),
                        document.pointer("/spec/trafficPolicy"),
                    ) {
                        state.policies.insert(host, policy);
                    }
                    if document.pointer("/spec/subsets").is_some() {
                        state.diagnostics.warning(
                            DOCUMENT_SCOPE,
                            "DestinationRule.spec.subsets",
                            "subsets have no canonical equivalent and were dropped",
                        );
                    }
                }
                Some(REQUEST_AUTHENTICATION) => state.authentications.push(document),
                Some(AUTHORIZATION_POLICY)
                    if name(document).is_some_and(|n| n.ends_with(REQUIRE_JWT_SUFFIX)) => {}
                other => {
                    state.diagnostics.info(
                        DOCUMENT_SCOPE,
                        "globalConfig.istio",
                        format!(
                            "{} resource '{}' is kept verbatim as passthrough",
                            other.unwrap_or("untyped"),
                            name(document).unwrap_or_default()
                        ),
                    );
                    state.passthrough.push(document.clone());
                }
            }
        }
        if virtual_services.is_empty() {
            return Err(TranslateError::parse(
                ProviderId::Istio,
                "no VirtualService resources found",
            ));
        }
        for document in virtual_services {
            state.virtual_service(document);
        }
        for document in std::mem::take(&mut state.authentications) {
            state.authentication(document);
        }

        let mut config = state.config;
        if !state.passthrough.is_empty() {
            config.global_config.insert(
                ProviderId::Istio.as_str().to_string(),
                Value::Array(state.passthrough),
            );
        }
        tracing::debug!(services = config.services.len(), "istio resources imported");
        Ok(Translation::new(config, state.diagnostics))
    }
}
