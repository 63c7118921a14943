use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use indexmap::IndexMap;

use super::{
    exporter::{MIRROR_PREFIX, REQUEST_ID_VAR, TIMESTAMP_VAR},
    model::{self, Directive},
};
use crate::{
    adapters::{
        common::{DOCUMENT_SCOPE, parse_duration, parse_methods, split_authority, split_url, template_from},
        lua::extract_embedded,
    },
    config::models::{
        Authentication, CircuitBreaker, Cors, Endpoint, GatewayConfig, HealthCheck, Headers,
        KeyLocation, LoadBalanceAlgorithm, LoadBalancer, Mirroring, PassiveHealthCheck, RateLimit,
        RateLimitKey, Retry, Route, Service, ServiceKind, Target, TemplateValue, Timeout,
        TrafficSplit, TransportProtocol, Upstream, WeightedDestination,
    },
    core::{diagnostics::Diagnostics, provider::ProviderId},
    ports::translator::{Importer, TranslateError, TranslateResult, Translation},
    utils::names::{header_from_nginx_var, sanitize_name},
};

const KNOWN_SERVER: [&str; 4] = ["listen", "server_name", "http2", "location"];
const DEFAULT_CONDITIONS: [&str; 2] = ["error", "timeout"];
const SERVER_ERRORS: [&str; 4] = ["http_500", "http_502", "http_503", "http_504"];

/// Parses an nginx `http`-context include (or a full `nginx.conf`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NginxImporter;

/// Condition of an `if` block without its parentheses.
pub fn condition_parts(directive: &Directive) -> Vec<&str> {
    let mut parts: Vec<&str> = directive.args.iter().map(String::as_str).collect();
    match parts.first().copied() {
        Some("(") => {
            parts.remove(0);
        }
        Some(first) => parts[0] = first.strip_prefix('(').unwrap_or(first),
        None => {}
    }
    match parts.last().copied() {
        Some(")") => {
            parts.pop();
        }
        Some(last) => {
            let end = parts.len() - 1;
            parts[end] = last.strip_suffix(')').unwrap_or(last);
        }
        None => {}
    }
    parts
}

/// Verbs of a `^(GET|POST)$` alternation.
pub fn methods_from_regex(pattern: &str) -> Vec<&str> {
    let inner = pattern.trim_start_matches('^').trim_end_matches('$');
    let inner = inner
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(inner);
    inner.split('|').filter(|m| !m.is_empty()).collect()
}

fn template(value: &str) -> TemplateValue {
    template_from(value, &[REQUEST_ID_VAR], &[TIMESTAMP_VAR])
}

fn duration_arg(directive: &Directive) -> Option<Duration> {
    directive.arg(0).and_then(parse_duration)
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Requests per second of a `rate=` argument.
fn rate(raw: &str) -> Option<(u32, bool)> {
    if let Some(per_second) = raw.strip_suffix("r/s") {
        return per_second.parse().ok().map(|r| (r, true));
    }
    let per_minute: u32 = raw.strip_suffix("r/m")?.parse().ok()?;
    Some((per_minute.div_ceil(60).max(1), per_minute % 60 == 0))
}

struct Zone {
    key: String,
    rate: Option<(u32, bool)>,
}

struct ImportState<'a> {
    zones: HashMap<String, Zone>,
    maps: HashMap<String, Vec<(String, String)>>,
    splits: HashMap<String, Vec<(String, String)>>,
    upstreams: IndexMap<String, &'a Directive>,
    internal: HashMap<String, &'a Directive>,
    services: IndexMap<String, Service>,
    config: GatewayConfig,
    diagnostics: Diagnostics,
}

impl<'a> ImportState<'a> {
    fn upstream(&mut self, name: &str, block: &Directive) -> Upstream {
        let scope = format!("upstream {name}");
        let mut upstream = Upstream::default();
        let mut max_fails = None;
        let mut fail_timeout = None;
        for directive in block.children() {
            match directive.name.as_str() {
                "least_conn" => {
                    upstream.load_balancer = Some(LoadBalancer {
                        algorithm: LoadBalanceAlgorithm::LeastConn,
                    })
                }
                "ip_hash" => {
                    upstream.load_balancer = Some(LoadBalancer {
                        algorithm: LoadBalanceAlgorithm::IpHash,
                    })
                }
                "server" => {
                    let Some((host, port)) = directive.arg(0).and_then(|a| split_authority(a, 80))
                    else {
                        self.diagnostics.warning(
                            &scope,
                            "upstream.targets",
                            format!("unparseable server '{}'; skipped", directive.args.join(" ")),
                        );
                        continue;
                    };
                    let weight = if directive.flag("down") {
                        0
                    } else {
                        directive
                            .param("weight")
                            .and_then(|w| w.parse().ok())
                            .unwrap_or(1)
                    };
                    if directive.flag("backup") {
                        self.diagnostics.warning(
                            &scope,
                            "upstream.targets",
                            format!("backup server {host}:{port} imported as a regular target"),
                        );
                    }
                    max_fails = max_fails.or(directive.param("max_fails").and_then(|m| m.parse().ok()));
                    fail_timeout = fail_timeout.or(directive.param("fail_timeout").and_then(parse_duration));
                    upstream.targets.push(Target::new(host, port, weight));
                }
                other => self.diagnostics.warning(
                    &scope,
                    format!("upstream.{other}").as_str(),
                    "directive has no canonical equivalent; dropped",
                ),
            }
        }
        match (max_fails, fail_timeout) {
            (Some(max_failures), Some(window)) => {
                upstream.circuit_breaker = Some(CircuitBreaker {
                    max_failures,
                    window,
                    unhealthy_status_codes: Vec::new(),
                })
            }
            (Some(max_failures), None) => {
                upstream.health_check = Some(HealthCheck {
                    active: None,
                    passive: Some(PassiveHealthCheck {
                        max_failures,
                        unhealthy_status_codes: Vec::new(),
                    }),
                })
            }
            (None, _) => {}
        }
        // round robin is implicit; differing weights make it weighted
        let weights_differ = upstream.targets.windows(2).any(|w| w[0].weight != w[1].weight);
        if upstream.load_balancer.is_none() && weights_differ {
            upstream.load_balancer = Some(LoadBalancer {
                algorithm: LoadBalanceAlgorithm::Weighted,
            });
        }
        upstream
    }

    /// First server of an auxiliary upstream, or the authority itself.
    fn endpoint(&self, reference: &str) -> Option<Endpoint> {
        if let Some(block) = self.upstreams.get(reference) {
            let server = model::find(block.children(), "server")?;
            let (host, port) = split_authority(server.arg(0)?, 80)?;
            return Some(Endpoint { host, port });
        }
        let (host, port) = split_authority(reference, 80)?;
        Some(Endpoint { host, port })
    }

    /// Service a `*_pass` target resolves to, created lazily for literal
    /// authorities.
    fn service_for(&mut self, scheme: &str, host: &str) -> Option<String> {
        let name = if self.services.contains_key(host) {
            host.to_string()
        } else {
            let (target_host, port) = split_authority(host, if scheme.ends_with('s') { 443 } else { 80 })?;
            let name = sanitize_name(host);
            self.services.entry(name.clone()).or_insert_with(|| {
                Service::new(
                    name.clone(),
                    Upstream::with_targets(vec![Target::new(target_host, port, 1)]),
                )
            });
            name
        };
        if let Some(service) = self.services.get_mut(&name) {
            match scheme {
                "https" => service.transport_protocol = TransportProtocol::Https,
                "grpc" => {
                    service.kind = ServiceKind::Grpc;
                    service.transport_protocol = TransportProtocol::Http2;
                }
                "grpcs" => {
                    service.kind = ServiceKind::Grpc;
                    service.transport_protocol = TransportProtocol::Https;
                }
                _ => {}
            }
        }
        Some(name)
    }

    /// Owning service of a split route plus its weighted destinations.
    fn split(&mut self, variable: &str, scope: &str) -> Option<(Option<String>, TrafficSplit)> {
        let entries = self.splits.get(variable)?.clone();
        let owner = entries.first().and_then(|(_, upstream)| {
            self.services
                .keys()
                .filter(|name| upstream.starts_with(&format!("{name}-")))
                .max_by_key(|name| name.len())
                .cloned()
        });
        let assigned: u32 = entries
            .iter()
            .filter_map(|(share, _)| share.strip_suffix('%').and_then(|p| p.parse::<f64>().ok()))
            .map(|p| p.round() as u32)
            .sum();
        let mut split = TrafficSplit::default();
        for (share, upstream) in &entries {
            let weight = match share.strip_suffix('%') {
                Some(percent) => percent.parse::<f64>().map(|p| p.round() as u32).unwrap_or(0),
                None => 100u32.saturating_sub(assigned),
            };
            let Some(endpoint) = self.endpoint(upstream) else {
                self.diagnostics.warning(
                    scope,
                    "route.trafficSplit",
                    format!("split destination '{upstream}' has no server; skipped"),
                );
                continue;
            };
            let name = match &owner {
                Some(service) => {
                    let rest = upstream.strip_prefix(&format!("{service}-")).unwrap_or(upstream);
                    match rest.split_once('-') {
                        Some((index, dest)) if index.parse::<usize>().is_ok() => dest.to_string(),
                        _ => rest.to_string(),
                    }
                }
                None => upstream.clone(),
            };
            split.targets.push(WeightedDestination {
                name,
                weight,
                upstream: endpoint,
                extra_headers: IndexMap::new(),
            });
        }
        Some((owner, split))
    }

    fn mirror(&mut self, path: &str, scope: &str) -> Option<WeightedDestination> {
        let Some(location) = self.internal.get(path).copied() else {
            self.diagnostics.warning(
                scope,
                "route.mirroring",
                format!("mirror location '{path}' is not defined; skipped"),
            );
            return None;
        };
        let mut extra_headers = IndexMap::new();
        let mut endpoint = None;
        for directive in location.children() {
            match directive.name.as_str() {
                "proxy_set_header" => {
                    if let (Some(name), Some(value)) = (directive.arg(0), directive.arg(1)) {
                        extra_headers.insert(name.to_string(), value.to_string());
                    }
                }
                "proxy_pass" => {
                    let url = directive.arg(0).unwrap_or_default().replace("$request_uri", "");
                    endpoint = split_url(&url).map(|(_, host, port)| Endpoint { host, port });
                }
                _ => {}
            }
        }
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Some(WeightedDestination {
            name,
            weight: 100,
            upstream: endpoint?,
            extra_headers,
        })
    }

    fn if_block(&mut self, block: &Directive, scope: &str, route: &mut Route, cors: &mut CorsHeaders) {
        let parts = condition_parts(block);
        let returns = model::find(block.children(), "return").and_then(|r| r.arg(0));
        match (parts.as_slice(), returns) {
            (["$request_method", "!~" | "!~*", pattern], _) => {
                let (methods, unknown) = parse_methods(methods_from_regex(pattern));
                if !unknown.is_empty() {
                    self.diagnostics.warning(
                        scope,
                        "route.methods",
                        format!("unknown methods {} dropped", unknown.join(", ")),
                    );
                }
                route.methods = Some(methods);
            }
            (["$request_method", "!=", method], _) => {
                let (methods, _) = parse_methods([*method]);
                route.methods = Some(methods);
            }
            (["$request_method", "=", "OPTIONS"], Some("204")) => {
                for header in model::find_all(block.children(), "add_header") {
                    cors.record(header);
                }
            }
            ([variable, "=", ""], Some("401")) => {
                let key = if let Some(name) = header_from_nginx_var(variable) {
                    Some((name, KeyLocation::Header))
                } else {
                    variable
                        .strip_prefix("$arg_")
                        .map(|name| (name.to_string(), KeyLocation::Query))
                };
                match key {
                    Some((key_name, location)) => {
                        route.authentication = Some(Authentication::ApiKey { key_name, location });
                        self.diagnostics.info(
                            scope,
                            "route.authentication.apiKey",
                            "only the presence of the key was enforced; key values must be provisioned",
                        );
                    }
                    None => self.diagnostics.warning(
                        scope,
                        "location.if",
                        format!("condition on '{variable}' has no canonical equivalent; dropped"),
                    ),
                }
            }
            _ => self.diagnostics.warning(
                scope,
                "location.if",
                format!("condition '{}' has no canonical equivalent; dropped", parts.join(" ")),
            ),
        }
    }

    fn rate_limit(&mut self, directive: &Directive, scope: &str) -> Option<RateLimit> {
        let zone_name = directive.param("zone")?;
        let Some(zone) = self.zones.get(zone_name) else {
            self.diagnostics.warning(
                scope,
                "route.rateLimit",
                format!("limit_req zone '{zone_name}' is not defined; dropped"),
            );
            return None;
        };
        let Some((requests_per_second, exact)) = zone.rate else {
            self.diagnostics.warning(
                scope,
                "route.rateLimit",
                format!("zone '{zone_name}' has no usable rate; dropped"),
            );
            return None;
        };
        let key = zone.key.clone();
        if !exact {
            self.diagnostics.warning(
                scope,
                "route.rateLimit",
                "per-minute rate rounded up to requests per second",
            );
        }
        let excess: u32 = directive
            .param("burst")
            .and_then(|b| b.parse().ok())
            .unwrap_or(0);
        if excess > 0 && !directive.flag("nodelay") {
            self.diagnostics.info(
                scope,
                "route.rateLimit.burst",
                "queued (delayed) excess requests are modeled as an immediate burst",
            );
        }
        let mut limit = RateLimit::per_ip(requests_per_second, requests_per_second + excess);
        match key.as_str() {
            "$binary_remote_addr" | "$remote_addr" => {}
            other => match header_from_nginx_var(other) {
                Some(header) => {
                    limit.key_type = RateLimitKey::Header;
                    limit.key_header = Some(header);
                }
                None => self.diagnostics.warning(
                    scope,
                    "route.rateLimit.keyType",
                    format!("limit key '{other}' imported as the client address"),
                ),
            },
        }
        Some(limit)
    }

    fn location(&mut self, location: &'a Directive) {
        let (modifier, path) = match location.args.as_slice() {
            [path] => (None, path.as_str()),
            [modifier, path] => (Some(modifier.as_str()), path.as_str()),
            _ => {
                self.diagnostics.warning(DOCUMENT_SCOPE, "location", "location without a path; skipped");
                return;
            }
        };
        let scope = format!("location {path}");
        match modifier {
            None | Some("^~") => {}
            Some("=") => self.diagnostics.warning(
                &scope,
                "route.pathPrefix",
                "exact match imported as a prefix match",
            ),
            Some(other) => {
                self.diagnostics.warning(
                    &scope,
                    "route.match",
                    format!("'{other}' regex locations have no canonical equivalent; dropped"),
                );
                return;
            }
        }

        let mut route = Route::new(path);
        let mut headers = Headers::default();
        let mut cors = CorsHeaders::default();
        let mut timeout = Timeout::default();
        let mut mirrors = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        let mut tries = None;
        let mut pass = None;
        let mut grpc = None;
        let mut limit_status = None;

        for directive in location.children() {
            let name = directive.name.as_str();
            let suffix = name
                .strip_prefix("proxy_")
                .or_else(|| name.strip_prefix("grpc_"))
                .unwrap_or(name);
            match (name, suffix) {
                ("if", _) => self.if_block(directive, &scope, &mut route, &mut cors),
                ("add_header", _) => {
                    let (Some(header), Some(value)) = (directive.arg(0), directive.arg(1)) else {
                        continue;
                    };
                    if header.to_ascii_lowercase().starts_with("access-control-") {
                        cors.record(directive);
                    } else {
                        headers.response_add.insert(header.to_string(), template(value));
                    }
                }
                (_, "set_header") => {
                    let (Some(header), Some(value)) = (directive.arg(0), directive.arg(1)) else {
                        continue;
                    };
                    if value.is_empty() {
                        headers.request_remove.push(header.to_string());
                    } else {
                        headers.request_add.insert(header.to_string(), template(value));
                    }
                }
                (_, "hide_header") => {
                    if let Some(header) = directive.arg(0) {
                        headers.response_remove.push(header.to_string());
                    }
                }
                ("limit_req", _) => route.rate_limit = self.rate_limit(directive, &scope),
                ("limit_req_status", _) => {
                    limit_status = directive.arg(0).and_then(|s| s.parse::<u16>().ok())
                }
                ("auth_basic", _) if directive.arg(0) != Some("off") => {
                    route.authentication = Some(Authentication::Basic { users: Vec::new() });
                }
                ("auth_basic", _) => {}
                ("auth_basic_user_file", _) => self.diagnostics.warning(
                    &scope,
                    "route.authentication.basic",
                    format!(
                        "credentials live in {}; add users to the imported route",
                        directive.arg(0).unwrap_or_default()
                    ),
                ),
                ("mirror", _) => match directive.arg(0) {
                    Some("off") | None => {}
                    Some(path) => mirrors.extend(self.mirror(path, &scope)),
                },
                (_, "connect_timeout") => timeout.connect = duration_arg(directive),
                (_, "read_timeout") => timeout.read = duration_arg(directive),
                (_, "send_timeout") => {}
                ("keepalive_timeout", _) => timeout.idle = duration_arg(directive),
                (_, "next_upstream") => conditions = directive.args.clone(),
                (_, "next_upstream_tries") => {
                    tries = directive.arg(0).and_then(|t| t.parse::<u32>().ok())
                }
                ("access_by_lua_block" | "body_filter_by_lua_block", _) => {
                    match directive.lua.as_deref().and_then(extract_embedded) {
                        Some(embedded) => {
                            if grpc.is_none() {
                                grpc = Some(embedded.adopt(&mut self.config));
                            }
                        }
                        None => self.diagnostics.warning(
                            &scope,
                            format!("location.{name}").as_str(),
                            "hand-written Lua has no canonical equivalent; dropped",
                        ),
                    }
                }
                (_, "pass") => pass = directive.arg(0).map(str::to_string),
                ("proxy_ssl_server_name" | "proxy_http_version", _) => {}
                _ => self.diagnostics.warning(
                    &scope,
                    format!("location.{name}").as_str(),
                    "directive has no canonical equivalent; dropped",
                ),
            }
        }

        let Some(pass) = pass else {
            self.diagnostics.warning(
                &scope,
                "route",
                "location does not proxy to an upstream; skipped",
            );
            return;
        };
        let (scheme, host) = pass.split_once("://").unwrap_or(("http", pass.as_str()));
        let host = host.split('/').next().unwrap_or(host);
        let service_name = if host.starts_with('$') {
            match self.split(host, &scope) {
                Some((owner, split)) => {
                    let owner = match owner {
                        Some(owner) => Some(owner),
                        None => split
                            .targets
                            .first()
                            .and_then(|t| self.service_for(scheme, &t.upstream.authority())),
                    };
                    route.traffic_split = Some(split);
                    owner
                }
                None => {
                    self.diagnostics.warning(
                        &scope,
                        "route",
                        format!("'{host}' is not a split_clients variable; location skipped"),
                    );
                    return;
                }
            }
        } else {
            self.service_for(scheme, host)
        };
        let Some(service_name) = service_name else {
            self.diagnostics.warning(
                &scope,
                "route",
                format!("cannot resolve upstream '{pass}'; location skipped"),
            );
            return;
        };

        if let Some(limit) = route.rate_limit.as_mut() {
            if let Some(status) = limit_status {
                limit.response_status = status;
            }
        }
        route.cors = cors.into_cors();
        if !headers.is_empty() {
            route.headers = Some(headers);
        }
        if timeout != Timeout::default() {
            route.timeout = Some(timeout);
        }
        if !mirrors.is_empty() {
            route.mirroring = Some(Mirroring { targets: mirrors });
        }
        if grpc.is_some() {
            route.grpc_transformation = grpc;
        }

        let mut retry_on = Vec::new();
        let mut codes = Vec::new();
        if SERVER_ERRORS.iter().all(|c| conditions.iter().any(|x| x == c)) && tries.is_some() {
            retry_on.push("5xx".to_string());
            conditions.retain(|c| !SERVER_ERRORS.contains(&c.as_str()));
        }
        for condition in &conditions {
            if DEFAULT_CONDITIONS.contains(&condition.as_str()) || condition == "off" {
                continue;
            }
            match condition.strip_prefix("http_").and_then(|c| c.parse::<u16>().ok()) {
                Some(code) if tries.is_none() => codes.push(code),
                _ => retry_on.push(condition.clone()),
            }
        }
        match tries {
            Some(0) => self.diagnostics.warning(
                &scope,
                "route.retry",
                "unlimited retries have no canonical equivalent; dropped",
            ),
            Some(tries) => {
                route.retry = Some(Retry {
                    attempts: tries - 1,
                    backoff: None,
                    retry_on,
                })
            }
            None => {}
        }

        if let Some(service) = self.services.get_mut(&service_name) {
            if !codes.is_empty() {
                if let Some(passive) = service
                    .upstream
                    .health_check
                    .as_mut()
                    .and_then(|h| h.passive.as_mut())
                {
                    for code in codes {
                        if !passive.unhealthy_status_codes.contains(&code) {
                            passive.unhealthy_status_codes.push(code);
                        }
                    }
                }
            }
            if route.grpc_transformation.is_some() {
                service.kind = ServiceKind::Grpc;
            }
            service.routes.push(route);
        }
    }
}

/// `Access-Control-*` headers collected from a location and its preflight.
#[derive(Default)]
struct CorsHeaders {
    values: IndexMap<String, String>,
}

impl CorsHeaders {
    fn record(&mut self, directive: &Directive) {
        if let (Some(name), Some(value)) = (directive.arg(0), directive.arg(1)) {
            self.values
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }

    fn into_cors(self) -> Option<Cors> {
        if self.values.is_empty() {
            return None;
        }
        let get = |name: &str| self.values.get(name).map(String::as_str);
        Some(Cors {
            allowed_origins: get("access-control-allow-origin")
                .map(|o| vec![o.to_string()])
                .unwrap_or_default(),
            allowed_methods: get("access-control-allow-methods")
                .map(comma_list)
                .unwrap_or_default(),
            allowed_headers: get("access-control-allow-headers")
                .map(comma_list)
                .unwrap_or_default(),
            expose_headers: get("access-control-expose-headers")
                .map(comma_list)
                .unwrap_or_default(),
            allow_credentials: get("access-control-allow-credentials") == Some("true"),
            max_age_seconds: get("access-control-max-age").and_then(|m| m.parse().ok()),
        })
    }
}

impl Importer for NginxImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Nginx
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "nginx"))]
    fn import(&self, native: &str) -> TranslateResult<Translation<GatewayConfig>> {
        if native.trim().is_empty() {
            return Err(TranslateError::parse(ProviderId::Nginx, "document is empty"));
        }
        let parsed = model::parse(native)?;
        let mut diagnostics = Diagnostics::new();
        let top: &[Directive] = match model::find(&parsed, "http") {
            Some(http) => {
                let dropped: Vec<&str> = parsed
                    .iter()
                    .filter(|d| d.name != "http")
                    .map(|d| d.name.as_str())
                    .collect();
                if !dropped.is_empty() {
                    diagnostics.info(
                        DOCUMENT_SCOPE,
                        "globalConfig.nginx",
                        format!("main-context directives dropped: {}", dropped.join(", ")),
                    );
                }
                http.children()
            }
            None => &parsed,
        };

        let mut state = ImportState {
            zones: HashMap::new(),
            maps: HashMap::new(),
            splits: HashMap::new(),
            upstreams: IndexMap::new(),
            internal: HashMap::new(),
            services: IndexMap::new(),
            config: GatewayConfig::new(),
            diagnostics,
        };
        let mut servers = Vec::new();
        let mut passthrough = Vec::new();
        for directive in top {
            match directive.name.as_str() {
                "upstream" => {
                    if let Some(name) = directive.arg(0) {
                        state.upstreams.insert(name.to_string(), directive);
                    }
                }
                "server" => servers.push(directive),
                "limit_req_zone" => {
                    let Some(zone) = directive.param("zone") else {
                        continue;
                    };
                    let name = zone.split(':').next().unwrap_or(zone).to_string();
                    state.zones.insert(
                        name,
                        Zone {
                            key: directive.arg(0).unwrap_or_default().to_string(),
                            rate: directive.param("rate").and_then(rate),
                        },
                    );
                }
                "map" | "split_clients" => {
                    let Some(variable) = directive.arg(1) else {
                        continue;
                    };
                    let entries = directive
                        .children()
                        .iter()
                        .map(|e| (e.name.clone(), e.arg(0).unwrap_or_default().to_string()))
                        .collect();
                    if directive.name == "map" {
                        state.maps.insert(variable.to_string(), entries);
                    } else {
                        state.splits.insert(variable.to_string(), entries);
                    }
                }
                _ => passthrough.push(directive.clone()),
            }
        }
        if servers.is_empty() && state.upstreams.is_empty() {
            return Err(TranslateError::parse(
                ProviderId::Nginx,
                "no server or upstream blocks found",
            ));
        }

        let auxiliary: HashSet<String> = state
            .splits
            .values()
            .flatten()
            .map(|(_, upstream)| upstream.clone())
            .collect();
        let upstreams: Vec<(String, &Directive)> = state
            .upstreams
            .iter()
            .filter(|(name, _)| !auxiliary.contains(*name))
            .map(|(name, block)| (name.clone(), *block))
            .collect();
        for (name, block) in upstreams {
            let upstream = state.upstream(&name, block);
            state.services.insert(name.clone(), Service::new(name, upstream));
        }

        for server in &servers {
            for directive in server.children() {
                if directive.name == "location"
                    && directive.arg(0) == Some("=")
                    && directive.arg(1).is_some_and(|p| p.starts_with(MIRROR_PREFIX))
                {
                    if let Some(path) = directive.arg(1) {
                        state.internal.insert(path.to_string(), directive);
                    }
                } else if !KNOWN_SERVER.contains(&directive.name.as_str()) {
                    state.diagnostics.warning(
                        DOCUMENT_SCOPE,
                        format!("server.{}", directive.name).as_str(),
                        "directive has no canonical equivalent; dropped",
                    );
                }
            }
        }
        for server in &servers {
            for location in model::find_all(server.children(), "location") {
                if location.arg(0) == Some("=")
                    && location.arg(1).is_some_and(|p| p.starts_with(MIRROR_PREFIX))
                {
                    continue;
                }
                state.location(location);
            }
        }

        // origins behind a generated `map $http_origin` variable
        let maps = std::mem::take(&mut state.maps);
        for service in state.services.values_mut() {
            for route in &mut service.routes {
                let Some(cors) = route.cors.as_mut() else {
                    continue;
                };
                if let Some(entries) = cors.allowed_origins.first().and_then(|o| maps.get(o)) {
                    cors.allowed_origins = entries
                        .iter()
                        .filter(|(key, _)| key != "default")
                        .map(|(key, _)| key.clone())
                        .collect();
                }
            }
        }

        let mut config = state.config;
        config.provider_hint = Some(ProviderId::Nginx.to_string());
        config.services = state.services.into_values().collect();
        if !passthrough.is_empty() {
            config.global_config.insert(
                ProviderId::Nginx.as_str().to_string(),
                serde_json::Value::String(model::render(&passthrough)),
            );
        }
        tracing::debug!(services = config.services.len(), "nginx configuration imported");
        Ok(Translation::new(config, state.diagnostics))
    }
}
