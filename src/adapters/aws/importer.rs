use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::model::{
    ANY_METHOD, API_TYPE, AUTHORIZER, CORS, INTEGRATION, REQUEST_ID_EXPR, REQUEST_TIME_EXPR,
    STAGE_TYPE, discovered_jwks, prefix_of, route_key,
};
use crate::{
    adapters::common::{DOCUMENT_SCOPE, from_yaml, split_url, strings_at, template_from},
    config::models::{
        Authentication, Cors, GatewayConfig, Headers, HttpMethod, RateLimit, Route, Service,
        Target, TemplateValue, Timeout, TransportProtocol, Upstream,
    },
    core::{
        diagnostics::{Diagnostics, route_scope},
        provider::ProviderId,
    },
    ports::translator::{Importer, TranslateError, TranslateResult, Translation},
    utils::names::{parse_route_name, sanitize_name},
};

const KNOWN_OPERATION_KEYS: [&str; 7] = [
    "operationId",
    "tags",
    "security",
    "parameters",
    "responses",
    "summary",
    INTEGRATION,
];

/// Parses a CloudFormation template for an HTTP API, or a bare OpenAPI
/// document carrying API Gateway extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsImporter;

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn template_value(raw: &str) -> TemplateValue {
    template_from(raw, &[REQUEST_ID_EXPR], &[REQUEST_TIME_EXPR])
}

/// `(service, route name)` an operation belongs to.
fn owner(path: &str, operation: &Value, integration_host: Option<&str>) -> (String, Option<String>) {
    let route = str_at(operation, "/operationId")
        .and_then(|id| id.rsplit_once('-'))
        .map(|(route, _)| route.to_string())
        .filter(|route| parse_route_name(route).is_some());
    let service = str_at(operation, "/tags/0")
        .map(str::to_string)
        .or_else(|| route.as_deref().and_then(parse_route_name).map(|(s, _)| s.to_string()))
        .or_else(|| integration_host.map(sanitize_name))
        .unwrap_or_else(|| sanitize_name(path));
    (service, route)
}

struct ImportedRoute {
    /// Generated route name, or the path for hand-written documents.
    key: String,
    route: Route,
}

struct ImportedService {
    service: Service,
    routes: Vec<ImportedRoute>,
}

struct ImportState<'a> {
    schemes: Option<&'a Map<String, Value>>,
    route_settings: Option<&'a Map<String, Value>>,
    services: IndexMap<String, ImportedService>,
    diagnostics: Diagnostics,
}

impl<'a> ImportState<'a> {
    fn parameters(&mut self, scope: &str, mapping: &Map<String, Value>, headers: &mut Headers, response: bool) {
        for (key, value) in mapping {
            let (action, target) = key.split_once(':').unwrap_or(("", key.as_str()));
            let Some(name) = target.strip_prefix("header.") else {
                self.diagnostics.warning(
                    scope,
                    "integration.requestParameters",
                    format!("parameter mapping '{key}' does not target a header and was dropped"),
                );
                continue;
            };
            let value = value.as_str().unwrap_or_default();
            match (action, response) {
                ("remove", false) => headers.request_remove.push(name.to_string()),
                ("remove", true) => headers.response_remove.push(name.to_string()),
                ("overwrite" | "append", false) => {
                    headers.request_add.insert(name.to_string(), template_value(value));
                }
                ("overwrite" | "append", true) => {
                    headers.response_add.insert(name.to_string(), template_value(value));
                }
                _ => self.diagnostics.warning(
                    scope,
                    "integration.requestParameters",
                    format!("parameter mapping action in '{key}' is unknown and was dropped"),
                ),
            }
        }
    }

    fn authentication(&mut self, scope: &str, operation: &Value) -> Option<Authentication> {
        let requirement = operation.pointer("/security/0")?.as_object()?;
        let scheme_name = requirement.keys().next()?;
        let Some(authorizer) = self
            .schemes
            .and_then(|schemes| schemes.get(scheme_name))
            .and_then(|scheme| scheme.get(AUTHORIZER))
        else {
            self.diagnostics.warning(
                scope,
                "security",
                format!("security scheme '{scheme_name}' is not an API Gateway authorizer and was dropped"),
            );
            return None;
        };
        if str_at(authorizer, "/type") != Some("jwt") {
            self.diagnostics.warning(
                scope,
                "security",
                format!("authorizer '{scheme_name}' is not a JWT authorizer and was dropped"),
            );
            return None;
        }
        let issuer = str_at(authorizer, "/jwtConfiguration/issuer").unwrap_or_default();
        let audiences = authorizer
            .get("jwtConfiguration")
            .map(|c| strings_at(c, "audience"))
            .unwrap_or_default();
        Some(Authentication::Jwt {
            issuer: issuer.to_string(),
            audiences,
            jwks_uri: discovered_jwks(issuer),
        })
    }

    fn rate_limit(&self, key: &str) -> Option<RateLimit> {
        let settings = self.route_settings?.get(key)?;
        let rate = settings.get("ThrottlingRateLimit")?.as_f64()?.round().max(1.0) as u32;
        let burst = settings
            .get("ThrottlingBurstLimit")
            .and_then(Value::as_u64)
            .and_then(|b| u32::try_from(b).ok())
            .unwrap_or(rate);
        Some(RateLimit::per_ip(rate, burst))
    }

    fn operation(&mut self, path: &str, method_key: &str, operation: &Value) {
        let method = if method_key == ANY_METHOD {
            None
        } else {
            match method_key.parse::<HttpMethod>() {
                Ok(method) => Some(method),
                Err(_) => {
                    // OpenAPI path items also carry `parameters`, `summary` and friends
                    return;
                }
            }
        };
        let Some(integration) = operation.get(INTEGRATION) else {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "paths.integration",
                format!("{method_key} {path} has no API Gateway integration and was dropped"),
            );
            return;
        };
        let uri = str_at(integration, "/uri").unwrap_or_default();
        let kind = str_at(integration, "/type").unwrap_or("http_proxy");
        let endpoint = split_url(uri).filter(|_| kind.eq_ignore_ascii_case("http_proxy"));
        let Some((scheme, host, port)) = endpoint else {
            self.diagnostics.warning(
                DOCUMENT_SCOPE,
                "paths.integration",
                format!("{method_key} {path}: only HTTP proxy integrations can be represented"),
            );
            return;
        };

        let (service_name, route_name) = owner(path, operation, Some(host.as_str()));
        let prefix = prefix_of(path);
        let position = route_name
            .as_deref()
            .and_then(parse_route_name)
            .map(|(_, index)| index)
            .unwrap_or_default();
        let scope = route_scope(&service_name, position, &prefix);
        for key in operation
            .as_object()
            .into_iter()
            .flat_map(|o| o.keys())
            .filter(|k| !KNOWN_OPERATION_KEYS.contains(&k.as_str()))
        {
            self.diagnostics.warning(
                &scope,
                format!("operation.{key}"),
                format!("operation field '{key}' has no canonical equivalent and was dropped"),
            );
        }
        if !path.ends_with("{proxy+}") {
            self.diagnostics.warning(
                &scope,
                "paths",
                format!("path '{path}' is imported as a prefix"),
            );
        }

        let authentication = self.authentication(&scope, operation);
        let mut headers = Headers::default();
        if let Some(request) = integration.get("requestParameters").and_then(Value::as_object) {
            self.parameters(&scope, request, &mut headers, false);
        }
        if let Some(by_status) = integration.get("responseParameters").and_then(Value::as_object) {
            for (status, mapping) in by_status {
                if status != "200" {
                    self.diagnostics.warning(
                        &scope,
                        "integration.responseParameters",
                        format!("mappings for status {status} have no canonical equivalent"),
                    );
                    continue;
                }
                if let Some(mapping) = mapping.as_object() {
                    self.parameters(&scope, mapping, &mut headers, true);
                }
            }
        }
        let read = integration
            .get("timeoutInMillis")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        let rate_limit = self.rate_limit(&route_key(method.map(|m| m.as_str()), path));

        let imported = self
            .services
            .entry(service_name.clone())
            .or_insert_with(|| {
                let mut service = Service::new(
                    service_name.clone(),
                    Upstream::with_targets(vec![Target::new(host.clone(), port, 1)]),
                );
                if scheme == "https" {
                    service.transport_protocol = TransportProtocol::Https;
                }
                ImportedService {
                    service,
                    routes: Vec::new(),
                }
            });
        let key = route_name.unwrap_or_else(|| path.to_string());
        let existing = imported.routes.iter_mut().position(|r| r.key == key);
        let entry = match existing {
            Some(index) => &mut imported.routes[index],
            None => {
                let mut route = Route::new(prefix);
                route.authentication = authentication;
                route.rate_limit = rate_limit;
                if !headers.is_empty() {
                    route.headers = Some(headers);
                }
                if read.is_some() {
                    route.timeout = Some(Timeout {
                        read,
                        ..Timeout::default()
                    });
                }
                imported.routes.push(ImportedRoute { key, route });
                let last = imported.routes.len() - 1;
                &mut imported.routes[last]
            }
        };
        match method {
            Some(method) => {
                entry
                    .route
                    .methods
                    .get_or_insert_with(Default::default)
                    .insert(method);
            }
            None => entry.route.methods = None,
        }
    }
}

impl Importer for AwsImporter {
    fn provider(&self) -> ProviderId {
        ProviderId::AwsApiGateway
    }

    #[tracing::instrument(name = "import", skip_all, fields(provider = "aws-apigateway"))]
    fn import(&self, input: &str) -> TranslateResult<Translation<GatewayConfig>> {
        let document: Value = from_yaml(ProviderId::AwsApiGateway, input)?;
        let mut passthrough = Map::new();
        let mut body = None;
        let mut stage = None;
        if document.get("openapi").is_some() {
            body = Some(&document);
        } else if let Some(resources) = document.get("Resources").and_then(Value::as_object) {
            for (name, resource) in resources {
                match str_at(resource, "/Type") {
                    Some(API_TYPE) if body.is_none() => body = resource.pointer("/Properties/Body"),
                    Some(STAGE_TYPE) if stage.is_none() => stage = resource.get("Properties"),
                    _ => {
                        passthrough.insert(name.clone(), resource.clone());
                    }
                }
            }
        }
        let Some(body) = body else {
            return Err(TranslateError::parse(
                ProviderId::AwsApiGateway,
                "no OpenAPI body or AWS::ApiGatewayV2::Api resource with a Body found",
            ));
        };

        let mut state = ImportState {
            schemes: body
                .pointer("/components/securitySchemes")
                .and_then(Value::as_object),
            route_settings: stage
                .and_then(|s| s.get("RouteSettings"))
                .and_then(Value::as_object),
            services: IndexMap::new(),
            diagnostics: Diagnostics::new(),
        };
        if stage.is_some_and(|s| s.get("DefaultRouteSettings").is_some()) {
            state.diagnostics.warning(
                DOCUMENT_SCOPE,
                "Stage.DefaultRouteSettings",
                "stage-wide throttling has no canonical equivalent and was dropped",
            );
        }

        for (path, item) in body.get("paths").and_then(Value::as_object).into_iter().flatten() {
            for (method_key, operation) in item.as_object().into_iter().flatten() {
                state.operation(path, method_key, operation);
            }
        }

        let cors = body.get(CORS).map(|cors| Cors {
            allowed_origins: strings_at(cors, "allowOrigins"),
            allowed_methods: strings_at(cors, "allowMethods"),
            allowed_headers: strings_at(cors, "allowHeaders"),
            expose_headers: strings_at(cors, "exposeHeaders"),
            allow_credentials: cors
                .get("allowCredentials")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            max_age_seconds: cors.get("maxAge").and_then(Value::as_u64),
        });

        let mut config = GatewayConfig::new();
        config.provider_hint = Some(ProviderId::AwsApiGateway.to_string());
        let route_count: usize = state.services.values().map(|s| s.routes.len()).sum();
        for (_, mut imported) in state.services {
            if imported.routes.iter().all(|r| parse_route_name(&r.key).is_some()) {
                imported
                    .routes
                    .sort_by_key(|r| parse_route_name(&r.key).map(|(_, index)| index));
            }
            let mut service = imported.service;
            service.routes = imported.routes.into_iter().map(|r| r.route).collect();
            if let Some(cors) = &cors {
                for route in &mut service.routes {
                    route.cors = Some(cors.clone());
                }
            }
            config.services.push(service);
        }
        if cors.is_some() && route_count > 1 {
            state.diagnostics.info(
                DOCUMENT_SCOPE,
                "route.cors",
                "the API-wide CORS configuration is applied to every route",
            );
        }
        if !passthrough.is_empty() {
            config.global_config.insert(
                ProviderId::AwsApiGateway.as_str().to_string(),
                serde_json::json!({"Resources": passthrough}),
            );
        }
        if config.services.is_empty() {
            state.diagnostics.warning(
                DOCUMENT_SCOPE,
                "paths",
                "the API defines no HTTP proxy routes",
            );
        }
        tracing::debug!(services = config.services.len(), "api gateway template imported");
        Ok(Translation::new(config, state.diagnostics))
    }
}
