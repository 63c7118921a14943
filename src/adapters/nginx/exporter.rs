use async_trait::async_trait;

use super::model::{self, Directive};
use crate::{
    adapters::{
        common::{go_duration, htpasswd_sha},
        lua::{GrpcScripting, LuaHost},
    },
    config::models::{
        Authentication, Cors, GatewayConfig, Headers, KeyLocation, LoadBalanceAlgorithm,
        RateLimit, RateLimitKey, Retry, Route, Service, ServiceKind, TemplateValue, Timeout,
        TransportProtocol,
    },
    core::{
        capability::Feature,
        diagnostics::{route_scope, service_scope},
        export_context::ExportContext,
        provider::ProviderId,
        weights,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::{nginx_header_var, route_name, snake_name},
};

pub const LISTEN_PORT: &str = "80";
pub const HTPASSWD_DIR: &str = "/etc/nginx/htpasswd";
pub const MIRROR_PREFIX: &str = "/_mirror/";
pub const REQUEST_ID_VAR: &str = "$request_id";
pub const TIMESTAMP_VAR: &str = "$msec";
pub const ZONE_SIZE: &str = "10m";
/// Status codes `proxy_next_upstream` can treat as failures.
pub const NEXT_UPSTREAM_CODES: [u16; 7] = [403, 404, 429, 500, 502, 503, 504];

/// Renders an nginx `http`-context include (e.g. `conf.d/gateway.conf`).
#[derive(Clone, Default)]
pub struct NginxExporter {
    grpc: GrpcScripting,
}

impl NginxExporter {
    pub fn new(grpc: GrpcScripting) -> Self {
        Self { grpc }
    }
}

fn runtime_value(value: &TemplateValue) -> Option<String> {
    match value {
        TemplateValue::Literal(text) => Some(text.clone()),
        TemplateValue::Uuid => Some(REQUEST_ID_VAR.to_string()),
        TemplateValue::Timestamp => Some(TIMESTAMP_VAR.to_string()),
    }
}

/// `if ( ... )` block around `children`.
fn condition(parts: &[&str], children: Vec<Directive>) -> Directive {
    let mut args = vec!["(".to_string()];
    args.extend(parts.iter().map(|p| p.to_string()));
    args.push(")".to_string());
    Directive::block("if", args, children)
}

/// Regex alternation matching every verb in `names`.
pub fn method_regex(names: &[String]) -> String {
    format!("^({})$", names.join("|"))
}

/// `proxy_next_upstream` conditions for a retry policy and passive codes.
fn next_upstream_conditions(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    retry: Option<&Retry>,
    passive_codes: &[u16],
) -> Vec<String> {
    let mut conditions = vec!["error".to_string(), "timeout".to_string()];
    let mut push = |condition: String| {
        if !conditions.contains(&condition) {
            conditions.push(condition);
        }
    };
    for on in retry.map(|r| r.retry_on.as_slice()).unwrap_or_default() {
        match on.as_str() {
            "5xx" => {
                for code in [500, 502, 503, 504] {
                    push(format!("http_{code}"));
                }
            }
            "gateway-error" => {
                for code in [502, 503, 504] {
                    push(format!("http_{code}"));
                }
            }
            "connect-failure" | "reset" | "error" => {}
            "timeout" | "non_idempotent" => push(on.clone()),
            other => match other.trim_start_matches("http_").parse::<u16>() {
                Ok(code) if NEXT_UPSTREAM_CODES.contains(&code) => push(format!("http_{code}")),
                _ => ctx.warn(
                    scope,
                    "route.retry.retryOn",
                    format!("'{other}' is not a proxy_next_upstream condition; dropped"),
                ),
            },
        }
    }
    for code in passive_codes {
        if NEXT_UPSTREAM_CODES.contains(code) {
            push(format!("http_{code}"));
        }
    }
    conditions
}

/// Everything rendered outside the `server` block.
#[derive(Default)]
struct HttpContext {
    zones: Vec<Directive>,
    maps: Vec<Directive>,
    upstreams: Vec<Directive>,
    split_upstreams: Vec<Directive>,
    http2: bool,
}

impl NginxExporter {
    fn upstream(ctx: &mut ExportContext<'_>, service: &Service) -> Directive {
        let upstream = &service.upstream;
        let scope = service_scope(&service.name);
        let mut children = Vec::new();
        match upstream.algorithm() {
            Some(LoadBalanceAlgorithm::LeastConn) => children.push(Directive::bare("least_conn")),
            Some(LoadBalanceAlgorithm::IpHash) => children.push(Directive::bare("ip_hash")),
            Some(LoadBalanceAlgorithm::RoundRobin | LoadBalanceAlgorithm::Weighted) | None => {}
        }

        let passive = upstream.health_check.as_ref().and_then(|h| h.passive.as_ref());
        let breaker = upstream.circuit_breaker.as_ref();
        if passive.is_some() && breaker.is_some() {
            ctx.info(
                &scope,
                Feature::CircuitBreaker.path().as_str(),
                "passive checks and the circuit breaker share max_fails; the breaker's threshold is used",
            );
        }
        let max_fails = breaker.map(|b| b.max_failures).or(passive.map(|p| p.max_failures));
        let weights_differ = upstream.targets.windows(2).any(|w| w[0].weight != w[1].weight);
        for target in &upstream.targets {
            let mut args = vec![target.authority()];
            if target.weight == 0 {
                args.push("down".to_string());
            } else if weights_differ || target.weight != 1 {
                args.push(format!("weight={}", target.weight));
            }
            if let Some(max_fails) = max_fails {
                args.push(format!("max_fails={max_fails}"));
            }
            if let Some(breaker) = breaker {
                args.push(format!("fail_timeout={}", go_duration(breaker.window)));
            }
            children.push(Directive::new("server", args));
        }
        if upstream.targets.iter().any(|t| t.weight == 0) {
            ctx.info(
                &scope,
                Feature::WeightedTargets.path().as_str(),
                "targets with weight 0 are rendered as 'down' servers",
            );
        }
        Directive::block("upstream", [service.name.clone()], children)
    }

    fn rate_limit(
        http: &mut HttpContext,
        zone: &str,
        limit: &RateLimit,
        location: &mut Vec<Directive>,
    ) {
        let key = match (limit.key_type, &limit.key_header) {
            (RateLimitKey::Header, Some(header)) => format!("${}", nginx_header_var(header)),
            _ => "$binary_remote_addr".to_string(),
        };
        http.zones.push(Directive::new(
            "limit_req_zone",
            [
                key,
                format!("zone={zone}:{ZONE_SIZE}"),
                format!("rate={}r/s", limit.requests_per_second),
            ],
        ));
        let mut args = vec![format!("zone={zone}")];
        let excess = limit.excess_burst();
        if excess > 0 {
            args.push(format!("burst={excess}"));
            args.push("nodelay".to_string());
        }
        location.push(Directive::new("limit_req", args));
        location.push(Directive::new(
            "limit_req_status",
            [limit.response_status.to_string()],
        ));
    }

    fn cors(
        http: &mut HttpContext,
        zone: &str,
        cors: &Cors,
        location: &mut Vec<Directive>,
    ) {
        let origin = match cors.allowed_origins.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many if many.iter().any(|o| o == "*") => Some("*".to_string()),
            many => {
                let variable = format!("$cors_origin_{zone}");
                let mut entries = vec![Directive::new("default", [""])];
                entries.extend(
                    many.iter()
                        .map(|origin| Directive::new(origin, ["$http_origin"])),
                );
                http.maps.push(Directive::block(
                    "map",
                    ["$http_origin".to_string(), variable.clone()],
                    entries,
                ));
                Some(variable)
            }
        };

        let mut headers = Vec::new();
        if let Some(origin) = origin {
            headers.push(("Access-Control-Allow-Origin", origin));
        }
        if !cors.allowed_methods.is_empty() {
            headers.push(("Access-Control-Allow-Methods", cors.allowed_methods.join(", ")));
        }
        if !cors.allowed_headers.is_empty() {
            headers.push(("Access-Control-Allow-Headers", cors.allowed_headers.join(", ")));
        }
        if !cors.expose_headers.is_empty() {
            headers.push(("Access-Control-Expose-Headers", cors.expose_headers.join(", ")));
        }
        if cors.allow_credentials {
            headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
        }
        let add = |(name, value): &(&str, String)| {
            Directive::new("add_header", [name.to_string(), value.clone(), "always".to_string()])
        };

        // add_header inside `if` replaces the outer ones, so the preflight
        // block repeats them
        let mut preflight: Vec<Directive> = headers.iter().map(add).collect();
        if let Some(max_age) = cors.max_age_seconds {
            preflight.push(add(&("Access-Control-Max-Age", max_age.to_string())));
        }
        preflight.push(Directive::new("return", ["204"]));
        location.push(condition(&["$request_method", "=", "OPTIONS"], preflight));
        location.extend(headers.iter().map(add));
    }

    fn headers(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        headers: &Headers,
        set_directive: &str,
        location: &mut Vec<Directive>,
    ) {
        for (name, value) in &headers.request_add {
            if let Some(value) = ctx.template(scope, name, value, runtime_value) {
                location.push(Directive::new(set_directive, [name.clone(), value]));
            }
        }
        for name in &headers.request_remove {
            location.push(Directive::new(set_directive, [name.clone(), String::new()]));
        }
        for (name, value) in &headers.response_add {
            if let Some(value) = ctx.template(scope, name, value, runtime_value) {
                location.push(Directive::new(
                    "add_header",
                    [name.clone(), value, "always".to_string()],
                ));
            }
        }
        for name in &headers.response_remove {
            let hide = if set_directive == "grpc_set_header" {
                "grpc_hide_header"
            } else {
                "proxy_hide_header"
            };
            location.push(Directive::new(hide, [name.clone()]));
        }
    }

    fn timeouts(prefix: &str, timeout: &Timeout, location: &mut Vec<Directive>) {
        if let Some(connect) = timeout.connect {
            location.push(Directive::new(
                &format!("{prefix}_connect_timeout"),
                [go_duration(connect)],
            ));
        }
        if let Some(read) = timeout.read {
            location.push(Directive::new(&format!("{prefix}_read_timeout"), [go_duration(read)]));
            location.push(Directive::new(&format!("{prefix}_send_timeout"), [go_duration(read)]));
        }
        if let Some(idle) = timeout.idle {
            location.push(Directive::new("keepalive_timeout", [go_duration(idle)]));
        }
    }

    fn authentication(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        name: &str,
        authentication: &Authentication,
        location: &mut Vec<Directive>,
    ) {
        match authentication {
            Authentication::Basic { users } => {
                let file = format!("{HTPASSWD_DIR}/{name}");
                location.push(Directive::new("auth_basic", [name.to_string()]));
                location.push(Directive::new("auth_basic_user_file", [file.clone()]));
                let lines: Vec<String> = users
                    .iter()
                    .map(|u| htpasswd_sha(&u.username, &u.password))
                    .collect();
                ctx.info(
                    scope,
                    Feature::BasicAuth.path().as_str(),
                    format!("provision {file} with: {}", lines.join(" ")),
                );
            }
            Authentication::ApiKey { key_name, location: key_location } => {
                let variable = match key_location {
                    KeyLocation::Header => format!("${}", nginx_header_var(key_name)),
                    KeyLocation::Query => format!("$arg_{key_name}"),
                };
                location.push(condition(
                    &[variable.as_str(), "=", ""],
                    vec![Directive::new("return", ["401"])],
                ));
            }
            Authentication::Jwt { .. } | Authentication::None => {}
        }
    }

    /// `mirror` directives plus their internal locations.
    fn mirrors(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        name: &str,
        scheme: &str,
        route: &Route,
        location: &mut Vec<Directive>,
        internal: &mut Vec<Directive>,
    ) {
        let Some(mirroring) = &route.mirroring else {
            return;
        };
        for destination in &mirroring.targets {
            let path = format!("{MIRROR_PREFIX}{name}/{}", destination.name);
            location.push(Directive::new("mirror", [path.clone()]));
            let mut children = vec![Directive::bare("internal")];
            for (header, value) in &destination.extra_headers {
                children.push(Directive::new("proxy_set_header", [header.clone(), value.clone()]));
            }
            children.push(Directive::new(
                "proxy_pass",
                [format!("{scheme}://{}$request_uri", destination.upstream.authority())],
            ));
            internal.push(Directive::block("location", ["=".to_string(), path], children));
            if destination.weight < 100 {
                ctx.info(
                    scope,
                    Feature::Mirroring.path().as_str(),
                    format!("mirror '{}' receives every request, not {}%", destination.name, destination.weight),
                );
            }
        }
    }

    /// `split_clients` over one upstream per destination; returns the
    /// variable to proxy to.
    fn split(
        ctx: &mut ExportContext<'_>,
        http: &mut HttpContext,
        scope: &str,
        name: &str,
        route: &Route,
    ) -> Option<String> {
        let split = route.traffic_split.as_ref().filter(|s| !s.targets.is_empty())?;
        let raw: Vec<u32> = split.targets.iter().map(|t| t.weight).collect();
        let normalized = weights::normalize(&raw, 100);
        if normalized.changed {
            ctx.info(
                scope,
                Feature::TrafficSplit.path().as_str(),
                format!("split_clients takes percentages: {}", weights::describe(&raw, &normalized.weights)),
            );
        }
        let variable = format!("$split_{}", snake_name(name));
        let mut entries = Vec::new();
        let last = split.targets.len() - 1;
        for (i, (destination, percent)) in split.targets.iter().zip(&normalized.weights).enumerate() {
            let upstream_name = format!("{name}-{}", destination.name);
            http.split_upstreams.push(Directive::block(
                "upstream",
                [upstream_name.clone()],
                vec![Directive::new("server", [destination.upstream.authority()])],
            ));
            if !destination.extra_headers.is_empty() {
                ctx.warn(
                    scope,
                    "route.trafficSplit.extraHeaders",
                    format!("extra headers of destination '{}' cannot follow the split; omitted", destination.name),
                );
            }
            let share = if i == last { "*".to_string() } else { format!("{percent}%") };
            entries.push(Directive::new(&share, [upstream_name]));
        }
        http.maps.push(Directive::block(
            "split_clients",
            ["${request_id}".to_string(), variable.clone()],
            entries,
        ));
        Some(variable)
    }

    async fn location(
        &self,
        ctx: &mut ExportContext<'_>,
        http: &mut HttpContext,
        service: &Service,
        index: usize,
        route: &Route,
        internal: &mut Vec<Directive>,
    ) -> TranslateResult<Directive> {
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let name = route_name(&service.name, index);
        let zone = snake_name(&name);
        let grpc = service.kind == ServiceKind::Grpc;
        let (prefix, scheme) = match (grpc, service.transport_protocol) {
            (true, TransportProtocol::Https) => ("grpc", "grpcs"),
            (true, _) => ("grpc", "grpc"),
            (false, TransportProtocol::Https) => ("proxy", "https"),
            (false, _) => ("proxy", "http"),
        };
        let mut location = Vec::new();

        if let Some(cors) = &route.cors {
            Self::cors(http, &zone, cors, &mut location);
        }
        if let Some(methods) = &route.methods {
            let names: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
            let pattern = method_regex(&names);
            location.push(condition(
                &["$request_method", "!~", pattern.as_str()],
                vec![Directive::new("return", ["405"])],
            ));
        }
        if let Some(authentication) = &route.authentication {
            Self::authentication(ctx, &scope, &name, authentication, &mut location);
        }
        if let Some(limit) = &route.rate_limit {
            Self::rate_limit(http, &zone, limit, &mut location);
        }
        if let Some(headers) = &route.headers {
            Self::headers(ctx, &scope, headers, &format!("{prefix}_set_header"), &mut location);
        }
        Self::mirrors(ctx, &scope, &name, scheme, route, &mut location, internal);
        if let Some(timeout) = &route.timeout {
            Self::timeouts(prefix, timeout, &mut location);
        }

        let passive_codes = service
            .upstream
            .health_check
            .as_ref()
            .and_then(|h| h.passive.as_ref())
            .map(|p| p.unhealthy_status_codes.clone())
            .unwrap_or_default();
        if route.retry.is_some() || !passive_codes.is_empty() {
            let conditions =
                next_upstream_conditions(ctx, &scope, route.retry.as_ref(), &passive_codes);
            location.push(Directive::new(&format!("{prefix}_next_upstream"), conditions));
        }
        if let Some(retry) = &route.retry {
            location.push(Directive::new(
                &format!("{prefix}_next_upstream_tries"),
                [(retry.attempts + 1).to_string()],
            ));
        }

        if let Some(transformation) = &route.grpc_transformation {
            if let Some(scripts) = self
                .grpc
                .generate(ctx, &scope, transformation, LuaHost::OpenResty)
                .await?
            {
                if let Some(request) = scripts.request {
                    location.push(Directive::lua("access_by_lua_block", request));
                }
                if let Some(response) = scripts.response {
                    location.push(Directive::lua("body_filter_by_lua_block", response));
                }
            }
        }

        if service.transport_protocol == TransportProtocol::Https && !grpc {
            location.push(Directive::new("proxy_ssl_server_name", ["on"]));
        }
        if service.transport_protocol == TransportProtocol::Http2 && !grpc {
            ctx.info(
                &scope,
                "service.transportProtocol",
                "nginx proxies to upstreams over HTTP/1.1",
            );
            location.push(Directive::new("proxy_http_version", ["1.1"]));
        }
        let target = match Self::split(ctx, http, &scope, &name, route) {
            Some(variable) => format!("{scheme}://{variable}"),
            None => format!("{scheme}://{}", service.name),
        };
        location.push(Directive::new(&format!("{prefix}_pass"), [target]));
        Ok(Directive::block("location", [route.path_prefix.clone()], location))
    }
}

#[async_trait]
impl Exporter for NginxExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Nginx
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "nginx"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::Nginx, config)?;
        let mut http = HttpContext::default();
        let mut locations = Vec::new();
        let mut internal = Vec::new();

        for service in ctx.services() {
            let upstream = Self::upstream(&mut ctx, service);
            http.upstreams.push(upstream);
            http.http2 |= service.kind == ServiceKind::Grpc;
            for (index, route) in ctx.routes(service) {
                let location = self
                    .location(&mut ctx, &mut http, service, index, route, &mut internal)
                    .await?;
                locations.push(location);
            }
        }

        let mut server = vec![
            Directive::new("listen", [LISTEN_PORT]),
            Directive::new("server_name", ["_"]),
        ];
        if http.http2 {
            server.push(Directive::new("http2", ["on"]));
        }
        server.extend(locations);
        server.extend(internal);

        let mut text = String::new();
        match ctx.global_config() {
            Some(serde_json::Value::String(raw)) => {
                text.push_str(raw.trim_end());
                text.push_str("\n\n");
            }
            Some(_) => ctx.warn(
                "document",
                "globalConfig.nginx",
                "expected raw directives as a string; ignored",
            ),
            None => {}
        }
        let mut top = Vec::new();
        top.extend(http.zones);
        top.extend(http.maps);
        if !top.is_empty() {
            text.push_str(&model::render(&top));
            text.push('\n');
        }
        let mut blocks = http.upstreams;
        blocks.extend(http.split_upstreams);
        blocks.push(Directive::section("server", server));
        text.push_str(&model::render(&blocks));
        Ok(ctx.finish(text))
    }
}
