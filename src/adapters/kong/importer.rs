use std::time::Duration;

use serde_json::Value;

use super::model::{KongConfig, KongPlugin, KongRoute, KongService, KongUpstream};
use crate::{
    adapters::{
        common::{
            DOCUMENT_SCOPE, from_yaml, parse_methods, round_robin_for, split_authority,
            strings_at, template_from,
        },
        lua::extract_embedded,
    },
    config::models::{
        ActiveHealthCheck, Authentication, BasicUser, Cors, GatewayConfig,
        HealthCheck, Headers, KeyLocation, LoadBalanceAlgorithm, LoadBalancer,
        PassiveHealthCheck, RateLimit, RateLimitKey, Retry, Route, Service, ServiceKind, Target,
        TemplateValue, Timeout, TransportProtocol, Upstream,
    },
    core::{
        diagnostics::{Diagnostics, route_scope, service_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateResult, Translation},
};

const IGNORED_KEYS: [&str; 4] = ["id", "tags", "created_at", "updated_at"];

/// Parses decK declarative configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct KongImporter;

struct ImportState<'a> {
    document: &'a KongConfig,
    config: GatewayConfig,
    diagnostics: Diagnostics,
}

impl ImportState<'_> {
    fn report_extra(&mut self, scope: &str, entity: &str, extra: &indexmap::IndexMap<String, Value>) {
        for key in extra.keys().filter(|k| !IGNORED_KEYS.contains(&k.as_str())) {
            self.diagnostics.warning(
                scope,
                format!("{entity}.{key}"),
                format!("{entity} field '{key}' has no canonical equivalent and was dropped"),
            );
        }
    }

    fn upstream(&mut self, service: &KongService, scope: &str) -> Upstream {
        let document = self.document;
        let Some(native) = document.upstreams.iter().find(|u| u.name == service.host) else {
            return Upstream::with_targets(vec![Target::new(&service.host, service.port, 1)]);
        };
        self.report_extra(scope, "upstream", &native.extra);

        let mut targets = Vec::new();
        for target in &native.targets {
            match split_authority(&target.target, service.port) {
                Some((host, port)) => targets.push(Target::new(host, port, target.weight)),
                None => self.diagnostics.warning(
                    scope,
                    "upstream.targets",
                    format!("target '{}' is not host:port and was dropped", target.target),
                ),
            }
        }

        let mut upstream = Upstream::with_targets(targets);
        upstream.load_balancer = self.algorithm(native, &upstream.targets, scope);
        self.health_checks(native, &mut upstream);
        upstream
    }

    fn algorithm(
        &mut self,
        native: &KongUpstream,
        targets: &[Target],
        scope: &str,
    ) -> Option<LoadBalancer> {
        let algorithm = match native.algorithm.as_deref()? {
            "round-robin" => return Some(round_robin_for(targets)),
            "least-connections" | "latency" => LoadBalanceAlgorithm::LeastConn,
            "consistent-hashing" => {
                let hash_on = native.hash_on.as_deref().unwrap_or("none");
                if hash_on != "ip" {
                    self.diagnostics.warning(
                        scope,
                        "upstream.loadBalancer.ip_hash",
                        format!("hashing on '{hash_on}' is approximated by hashing the client IP"),
                    );
                }
                LoadBalanceAlgorithm::IpHash
            }
            other => {
                self.diagnostics.warning(
                    scope,
                    "upstream.loadBalancer",
                    format!("unknown algorithm '{other}', the default is used"),
                );
                return None;
            }
        };
        Some(LoadBalancer { algorithm })
    }

    fn health_checks(&mut self, native: &KongUpstream, upstream: &mut Upstream) {
        let Some(checks) = &native.healthchecks else {
            return;
        };
        let defaults = ActiveHealthCheck::default();
        let active = checks.active.as_ref().filter(|a| !a.http_path.is_empty()).map(|a| {
            ActiveHealthCheck {
                path: a.http_path.clone(),
                interval: a
                    .healthy
                    .interval
                    .or(a.unhealthy.interval)
                    .filter(|i| *i > 0.0)
                    .map_or(defaults.interval, Duration::from_secs_f64),
                timeout: if a.timeout > 0.0 {
                    Duration::from_secs_f64(a.timeout)
                } else {
                    defaults.timeout
                },
                healthy_threshold: a.healthy.successes.unwrap_or(defaults.healthy_threshold),
                unhealthy_threshold: a
                    .unhealthy
                    .http_failures
                    .unwrap_or(defaults.unhealthy_threshold),
            }
        });
        let passive = checks.passive.as_ref().and_then(|p| {
            p.unhealthy.http_failures.map(|max_failures| PassiveHealthCheck {
                max_failures,
                unhealthy_status_codes: p.unhealthy.http_statuses.clone(),
            })
        });
        if active.is_some() || passive.is_some() {
            upstream.health_check = Some(HealthCheck { active, passive });
        }
    }

    fn service(&mut self, native: &KongService) -> Service {
        let scope = service_scope(&native.name);
        self.report_extra(&scope, "service", &native.extra);

        let mut service = Service::new(&native.name, self.upstream(native, &scope));
        match native.protocol.as_str() {
            "grpc" => {
                service.kind = ServiceKind::Grpc;
                service.transport_protocol = TransportProtocol::Http2;
            }
            "grpcs" => {
                service.kind = ServiceKind::Grpc;
                service.transport_protocol = TransportProtocol::Https;
            }
            "https" => service.transport_protocol = TransportProtocol::Https,
            "http" => {}
            other => self.diagnostics.warning(
                &scope,
                "service.transportProtocol",
                format!("protocol '{other}' is not an HTTP protocol; http is assumed"),
            ),
        }

        let timeout = Timeout {
            connect: native.connect_timeout.map(Duration::from_millis),
            read: native.read_timeout.map(Duration::from_millis),
            idle: None,
        };
        let timeout = (timeout != Timeout::default()).then_some(timeout);
        let retry = native.retries.filter(|r| *r > 0).map(|attempts| Retry {
            attempts,
            backoff: None,
            retry_on: Vec::new(),
        });

        for (index, route) in native.routes.iter().enumerate() {
            let mut imported = self.route(native, index, route, &mut service);
            imported.timeout = timeout.clone();
            imported.retry = retry.clone();
            service.routes.push(imported);
        }
        service
    }

    fn route(
        &mut self,
        service: &KongService,
        index: usize,
        native: &KongRoute,
        canonical: &mut Service,
    ) -> Route {
        let prefix = native.paths.first().cloned().unwrap_or_else(|| "/".to_string());
        let scope = route_scope(&service.name, index, &prefix);
        self.report_extra(&scope, "route", &native.extra);
        if native.paths.len() > 1 {
            self.diagnostics.warning(
                &scope,
                "route.pathPrefix",
                format!("only the first of {} paths is kept", native.paths.len()),
            );
        }
        if prefix.starts_with('~') {
            self.diagnostics.warning(
                &scope,
                "route.pathPrefix",
                "regex paths are kept verbatim but matched as prefixes",
            );
        }
        if native.strip_path {
            self.diagnostics.warning(
                &scope,
                "route.pathPrefix",
                "strip_path has no canonical equivalent; paths are forwarded unchanged",
            );
        }

        let mut route = Route::new(prefix);
        if let Some(methods) = &native.methods {
            let (parsed, unknown) = parse_methods(methods.iter().map(String::as_str));
            for method in unknown {
                self.diagnostics.warning(
                    &scope,
                    "route.methods",
                    format!("unknown method '{method}' was dropped"),
                );
            }
            route.methods = Some(parsed);
        }

        // route plugins take precedence over service and global ones
        let document = self.document;
        let plugins: Vec<&KongPlugin> = native
            .plugins
            .iter()
            .chain(&service.plugins)
            .chain(&document.plugins)
            .collect();
        let mut seen = std::collections::BTreeSet::new();
        for plugin in plugins {
            if !seen.insert(plugin.name.as_str()) {
                continue;
            }
            self.plugin(plugin, &scope, &mut route, canonical);
        }
        route
    }

    fn plugin(&mut self, plugin: &KongPlugin, scope: &str, route: &mut Route, service: &mut Service) {
        match plugin.name.as_str() {
            "rate-limiting" => {
                let (rps, window) = match (plugin.u64("second"), plugin.u64("minute")) {
                    (Some(second), _) => (second, None),
                    (None, Some(minute)) => (minute.div_ceil(60), Some("minute")),
                    (None, None) => match plugin.u64("hour") {
                        Some(hour) => (hour.div_ceil(3600), Some("hour")),
                        None => {
                            self.diagnostics.warning(
                                scope,
                                "route.rateLimit",
                                "rate-limiting without a second/minute/hour limit was dropped",
                            );
                            return;
                        }
                    },
                };
                if let Some(window) = window {
                    self.diagnostics.warning(
                        scope,
                        "route.rateLimit",
                        format!("per-{window} limit converted to {rps} requests per second"),
                    );
                }
                let rps = u32::try_from(rps).unwrap_or(u32::MAX);
                let mut limit = RateLimit::per_ip(rps, rps);
                if plugin.str("limit_by") == Some("header") {
                    limit.key_type = RateLimitKey::Header;
                    limit.key_header = plugin.str("header_name").map(str::to_string);
                }
                if let Some(code) = plugin.u64("error_code").and_then(|c| u16::try_from(c).ok()) {
                    limit.response_status = code;
                }
                route.rate_limit = Some(limit);
            }
            "cors" => {
                route.cors = Some(Cors {
                    allowed_origins: plugin.strings("origins"),
                    allowed_methods: plugin.strings("methods"),
                    allowed_headers: plugin.strings("headers"),
                    expose_headers: plugin.strings("exposed_headers"),
                    allow_credentials: plugin.bool("credentials").unwrap_or(false),
                    max_age_seconds: plugin.u64("max_age"),
                });
            }
            "key-auth" => {
                let key_name = plugin
                    .strings("key_names")
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "apikey".to_string());
                let in_header = plugin.bool("key_in_header").unwrap_or(true);
                let in_query = plugin.bool("key_in_query").unwrap_or(true);
                let location = if !in_header && in_query {
                    KeyLocation::Query
                } else {
                    KeyLocation::Header
                };
                route.authentication = Some(Authentication::ApiKey { key_name, location });
            }
            "basic-auth" => {
                let users = self
                    .document
                    .consumers
                    .iter()
                    .flat_map(|c| &c.basicauth_credentials)
                    .map(|c| BasicUser {
                        username: c.username.clone(),
                        password: c.password.clone(),
                    })
                    .collect();
                route.authentication = Some(Authentication::Basic { users });
            }
            "jwt" => {
                let issuer = self
                    .document
                    .consumers
                    .iter()
                    .flat_map(|c| &c.jwt_secrets)
                    .map(|s| s.key.clone())
                    .next()
                    .unwrap_or_default();
                let jwks_uri = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
                self.diagnostics.warning(
                    scope,
                    "route.authentication.jwt",
                    format!("jwksUri is not part of Kong configuration; derived as {jwks_uri}"),
                );
                route.authentication = Some(Authentication::Jwt {
                    issuer,
                    audiences: Vec::new(),
                    jwks_uri,
                });
            }
            "request-transformer" | "response-transformer" => {
                let response = plugin.name == "response-transformer";
                let headers = route.headers.get_or_insert_with(Headers::default);
                for section in ["add", "append", "replace"] {
                    let entries = plugin
                        .config
                        .get(section)
                        .map(|s| strings_at(s, "headers"))
                        .unwrap_or_default();
                    for entry in entries {
                        let Some((name, value)) = entry.split_once(':') else {
                            continue;
                        };
                        let value = template_from(value, &[], &[]);
                        if response {
                            headers.response_add.insert(name.trim().to_string(), value);
                        } else {
                            headers.request_add.insert(name.trim().to_string(), value);
                        }
                    }
                }
                let removed = plugin
                    .config
                    .get("remove")
                    .map(|s| strings_at(s, "headers"))
                    .unwrap_or_default();
                if response {
                    headers.response_remove.extend(removed);
                } else {
                    headers.request_remove.extend(removed);
                }
            }
            "correlation-id" => {
                let name = plugin.str("header_name").unwrap_or("Kong-Request-ID").to_string();
                let headers = route.headers.get_or_insert_with(Headers::default);
                headers.request_add.insert(name.clone(), TemplateValue::Uuid);
                if plugin.bool("echo_downstream").unwrap_or(false) {
                    headers.response_add.insert(name, TemplateValue::Uuid);
                }
            }
            "pre-function" | "post-function" => {
                let scripts = ["access", "body_filter", "header_filter", "rewrite"]
                    .into_iter()
                    .flat_map(|phase| plugin.strings(phase))
                    .collect::<Vec<_>>();
                match scripts.iter().find_map(|s| extract_embedded(s)) {
                    Some(embedded) => {
                        route.grpc_transformation = Some(embedded.adopt(&mut self.config));
                        service.kind = ServiceKind::Grpc;
                    }
                    None => self.diagnostics.warning(
                        scope,
                        "route.grpcTransformation",
                        format!("custom {} code cannot be represented and was dropped", plugin.name),
                    ),
                }
            }
            "ip-restriction" | "acl" | "bot-detection" | "request-size-limiting" => {
                self.diagnostics.warning(
                    scope,
                    format!("plugins.{}", plugin.name),
                    format!("plugin '{}' has no canonical equivalent and was dropped", plugin.name),
                );
            }
            other => self.diagnostics.warning(
                scope,
                format!("plugins.{other}"),
                format!("unknown plugin '{other}' was dropped"),
            ),
        }
    }
}

impl Importer for KongImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::Kong
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "kong"))]
    fn import(&self, native: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let document: KongConfig = from_yaml(ProviderId::Kong, native)?;
        let mut state = ImportState {
            document: &document,
            config: GatewayConfig::new(),
            diagnostics: Diagnostics::new(),
        };
        state.config.provider_hint = Some(ProviderId::Kong.to_string());

        if document.format_version.is_empty() {
            state.diagnostics.warning(
                DOCUMENT_SCOPE,
                "_format_version",
                "document has no _format_version; decK 3.0 semantics assumed",
            );
        }
        if !document.extra.is_empty() {
            let passthrough: serde_json::Map<String, Value> = document
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            state
                .config
                .global_config
                .insert(ProviderId::Kong.to_string(), Value::Object(passthrough));
            state.diagnostics.info(
                DOCUMENT_SCOPE,
                "globalConfig.kong",
                "unrecognized top-level sections kept in globalConfig.kong",
            );
        }

        for service in &document.services {
            let imported = state.service(service);
            state.config.services.push(imported);
        }
        let referenced: Vec<&str> = document.services.iter().map(|s| s.host.as_str()).collect();
        for upstream in document.upstreams.iter().filter(|u| !referenced.contains(&u.name.as_str())) {
            state.diagnostics.warning(
                DOCUMENT_SCOPE,
                "upstreams",
                format!("upstream '{}' is not used by any service and was dropped", upstream.name),
            );
        }

        for service in &mut state.config.services {
            for route in &mut service.routes {
                if route.headers.as_ref().is_some_and(Headers::is_empty) {
                    route.headers = None;
                }
            }
        }
        tracing::debug!(services = state.config.services.len(), "imported kong document");
        Ok(Translation::new(state.config, state.diagnostics))
    }
}
