use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use super::model::{
    ANY_METHOD, API_RESOURCE, API_TYPE, AUTHORIZER, CORS, DEFAULT_STAGE, IDENTITY_SOURCE,
    INTEGRATION, MAX_INTEGRATION_MILLIS, OPENAPI_VERSION, REQUEST_ID_EXPR, REQUEST_TIME_EXPR,
    STAGE_PARAMETER, STAGE_RESOURCE, STAGE_TYPE, TEMPLATE_VERSION, discovered_jwks, operation_id,
    proxy_path, route_key,
};
use crate::{
    adapters::common::{merge_value, method_names, to_json},
    config::models::{
        Authentication, Cors, GatewayConfig, Route, Service, ServiceKind, TemplateValue,
        TransportProtocol,
    },
    core::{
        capability::Feature,
        diagnostics::{route_scope, service_scope},
        export_context::ExportContext,
        provider::ProviderId,
    },
    ports::translator::{Exporter, TranslateResult, Translation},
    utils::names::route_name,
};

/// Renders a CloudFormation template for one HTTP API: an OpenAPI body with
/// an HTTP proxy integration per route and a stage carrying throttling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsExporter;

fn parameter_value(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    name: &str,
    value: &TemplateValue,
) -> Option<String> {
    ctx.template(scope, name, value, |v| match v {
        TemplateValue::Uuid => Some(REQUEST_ID_EXPR.to_string()),
        TemplateValue::Timestamp => Some(REQUEST_TIME_EXPR.to_string()),
        TemplateValue::Literal(_) => None,
    })
}

fn cors_configuration(cors: &Cors) -> Value {
    let mut out = json!({"allowOrigins": cors.allowed_origins});
    if !cors.allowed_methods.is_empty() {
        out["allowMethods"] = json!(cors.allowed_methods);
    }
    if !cors.allowed_headers.is_empty() {
        out["allowHeaders"] = json!(cors.allowed_headers);
    }
    if !cors.expose_headers.is_empty() {
        out["exposeHeaders"] = json!(cors.expose_headers);
    }
    if cors.allow_credentials {
        out["allowCredentials"] = json!(true);
    }
    if let Some(max_age) = cors.max_age_seconds {
        out["maxAge"] = json!(max_age);
    }
    out
}

/// Accumulates the API-wide parts of the template.
#[derive(Default)]
struct Api {
    paths: IndexMap<String, Map<String, Value>>,
    security_schemes: Map<String, Value>,
    route_settings: Map<String, Value>,
    cors: Option<Cors>,
}

impl AwsExporter {
    fn integration(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        service: &Service,
        route: &Route,
        method: Option<&str>,
    ) -> Option<Value> {
        let target = service.upstream.targets.first()?;
        let base = route.path_prefix.trim_end_matches('/');
        let mut integration = json!({
            "type": "http_proxy",
            "httpMethod": method.unwrap_or("ANY"),
            "uri": format!(
                "{}://{}{base}/{{proxy}}",
                service.transport_protocol.scheme(),
                target.authority()
            ),
            "payloadFormatVersion": "1.0",
        });
        if let Some(read) = route.timeout.as_ref().and_then(|t| t.read) {
            let mut millis = read.as_millis();
            if millis > MAX_INTEGRATION_MILLIS {
                ctx.warn(
                    scope,
                    Feature::Timeout.path().as_str(),
                    format!("read timeout of {millis}ms exceeds the 30s integration limit and was capped"),
                );
                millis = MAX_INTEGRATION_MILLIS;
            }
            integration["timeoutInMillis"] = json!(millis as u64);
        }
        if let Some(headers) = &route.headers {
            let mut request = Map::new();
            for (name, value) in &headers.request_add {
                if let Some(resolved) = parameter_value(ctx, scope, name, value) {
                    request.insert(format!("overwrite:header.{name}"), json!(resolved));
                }
            }
            for name in &headers.request_remove {
                request.insert(format!("remove:header.{name}"), json!("''"));
            }
            if !request.is_empty() {
                integration["requestParameters"] = Value::Object(request);
            }
            let mut response = Map::new();
            for (name, value) in &headers.response_add {
                if let Some(resolved) = parameter_value(ctx, scope, name, value) {
                    response.insert(format!("overwrite:header.{name}"), json!(resolved));
                }
            }
            for name in &headers.response_remove {
                response.insert(format!("remove:header.{name}"), json!("''"));
            }
            if !response.is_empty() {
                integration["responseParameters"] = json!({"200": response});
            }
        }
        Some(integration)
    }

    fn authorizer(
        ctx: &mut ExportContext<'_>,
        scope: &str,
        issuer: &str,
        audiences: &[String],
        jwks_uri: &str,
    ) -> Value {
        if jwks_uri != discovered_jwks(issuer) {
            ctx.info(
                scope,
                Feature::JwtAuth.path().as_str(),
                format!("keys are discovered from the issuer; JWKS URI '{jwks_uri}' is not used"),
            );
        }
        if audiences.is_empty() {
            ctx.warn(
                scope,
                Feature::JwtAuth.path().as_str(),
                "JWT authorizers require an audience; none is configured",
            );
        }
        json!({
            "type": "oauth2",
            "flows": {},
            AUTHORIZER: {
                "type": "jwt",
                "identitySource": IDENTITY_SOURCE,
                "jwtConfiguration": {"issuer": issuer, "audience": audiences},
            },
        })
    }

    fn route(
        ctx: &mut ExportContext<'_>,
        api: &mut Api,
        service: &Service,
        index: usize,
        route: &Route,
    ) {
        let scope = route_scope(&service.name, index, &route.path_prefix);
        let name = route_name(&service.name, index);
        let path = proxy_path(&route.path_prefix);

        let mut security = None;
        if let Some(Authentication::Jwt {
            issuer,
            audiences,
            jwks_uri,
        }) = &route.authentication
        {
            let scheme = format!("{name}-jwt");
            let definition = Self::authorizer(ctx, &scope, issuer, audiences, jwks_uri);
            api.security_schemes.insert(scheme.clone(), definition);
            security = Some(json!([{scheme: []}]));
        }
        if let Some(cors) = &route.cors {
            if api.cors.is_none() {
                api.cors = Some(cors.clone());
            }
        }

        let methods: Vec<Option<String>> = match &route.methods {
            Some(methods) => method_names(methods).into_iter().map(Some).collect(),
            None => vec![None],
        };
        for method in methods {
            let method = method.as_deref();
            let Some(integration) = Self::integration(ctx, &scope, service, route, method) else {
                continue;
            };
            let key = method.map_or(ANY_METHOD.to_string(), str::to_ascii_lowercase);
            let operations = api.paths.entry(path.clone()).or_default();
            if operations.contains_key(&key) {
                ctx.warn(
                    &scope,
                    "route",
                    format!("{} {path} is already routed by another service; route omitted", method.unwrap_or("ANY")),
                );
                continue;
            }
            let mut operation = json!({
                "operationId": operation_id(&name, method),
                "tags": [service.name],
                INTEGRATION: integration,
            });
            if let Some(security) = &security {
                operation["security"] = security.clone();
            }
            operations.insert(key, operation);

            if let Some(limit) = &route.rate_limit {
                api.route_settings.insert(
                    route_key(method, &path),
                    json!({
                        "ThrottlingRateLimit": limit.requests_per_second,
                        "ThrottlingBurstLimit": limit.burst,
                    }),
                );
            }
        }
    }

    fn service(ctx: &mut ExportContext<'_>, api: &mut Api, service: &Service) {
        let scope = service_scope(&service.name);
        if let [first, rest @ ..] = service.upstream.targets.as_slice() {
            if !rest.is_empty() {
                let dropped: Vec<String> = rest.iter().map(|t| t.authority()).collect();
                ctx.warn(
                    &scope,
                    "upstream.targets",
                    format!(
                        "integrations address a single endpoint; {} is used and {} dropped",
                        first.authority(),
                        dropped.join(", ")
                    ),
                );
            }
        }
        if service.transport_protocol == TransportProtocol::Http2 || service.kind == ServiceKind::Grpc {
            ctx.warn(
                &scope,
                "transportProtocol",
                "HTTP proxy integrations connect over HTTP/1.1",
            );
        }
        for (index, route) in ctx.routes(service) {
            Self::route(ctx, api, service, index, route);
        }
    }
}

#[async_trait]
impl Exporter for AwsExporter {
    fn provider(&self) -> ProviderId {
        ProviderId::AwsApiGateway
    }

    #[tracing::instrument(name = "export", skip_all, fields(provider = "aws-apigateway"))]
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>> {
        let mut ctx = ExportContext::new(ProviderId::AwsApiGateway, config)?;
        let mut api = Api::default();
        for service in ctx.services() {
            Self::service(&mut ctx, &mut api, service);
        }

        let mut body = json!({
            "openapi": OPENAPI_VERSION,
            "info": {"title": "gatemorph", "version": config.schema_version},
            "paths": api.paths,
        });
        if !api.security_schemes.is_empty() {
            body["components"] = json!({"securitySchemes": api.security_schemes});
        }
        if let Some(cors) = &api.cors {
            body[CORS] = cors_configuration(cors);
        }

        let mut stage = json!({
            "ApiId": {"Ref": API_RESOURCE},
            "StageName": {"Ref": STAGE_PARAMETER},
            "AutoDeploy": true,
        });
        if !api.route_settings.is_empty() {
            stage["RouteSettings"] = Value::Object(api.route_settings);
        }
        let mut template = json!({
            "AWSTemplateFormatVersion": TEMPLATE_VERSION,
            "Description": "HTTP API generated by gatemorph",
            "Parameters": {
                STAGE_PARAMETER: {"Type": "String", "Default": DEFAULT_STAGE},
            },
            "Resources": {
                API_RESOURCE: {
                    "Type": API_TYPE,
                    "Properties": {"Body": body, "FailOnWarnings": true},
                },
                STAGE_RESOURCE: {"Type": STAGE_TYPE, "Properties": stage},
            },
            "Outputs": {
                "ApiEndpoint": {"Value": {"Fn::GetAtt": [API_RESOURCE, "ApiEndpoint"]}},
            },
        });
        if let Some(extra) = ctx.global_config() {
            merge_value(&mut template, extra);
        }
        let text = to_json(ProviderId::AwsApiGateway, &template)?;
        Ok(ctx.finish(text))
    }
}
