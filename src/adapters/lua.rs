//! gRPC field-transformation scripts in Lua.
//!
//! Envoy, OpenResty, Kong and APISIX all embed a Lua runtime; with the
//! `lua-protobuf` module loaded the same transformation logic runs on each of
//! them. Only the hook that reads and replaces the body differs per host.
//!
//! Each script embeds the compiled descriptor set, unframes the 5-byte gRPC
//! prefix, decodes the message, applies the configured operations (remove,
//! then rename, then add) and re-frames the result. Template values become
//! runtime calls of the host, so every request gets a fresh value.
use std::{fmt::Write as _, sync::Arc};

use prost_reflect::{Kind, MessageDescriptor};
use serde::{Deserialize, Serialize};

use crate::{
    config::models::{GatewayConfig, GrpcTransformation, ProtoDescriptor, TemplateValue},
    core::{
        export_context::ExportContext,
        proto_manager::{CompiledDescriptor, ProtoDescriptorManager},
    },
    ports::translator::{TranslateError, TranslateResult},
};

const FEATURE_PATH: &str = "route.grpcTransformation";
/// Prefix of the comment line carrying the canonical transformation, so
/// importers can recover it.
pub const MARKER: &str = "-- gatemorph:grpc ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaHost {
    Envoy,
    OpenResty,
    Kong,
    Apisix,
}

impl LuaHost {
    fn uuid(&self, side: Side) -> &'static str {
        match (self, side) {
            (LuaHost::Envoy, Side::Request) => r#"handle:headers():get("x-request-id")"#,
            (LuaHost::Envoy, Side::Response) => {
                r#"(handle:streamInfo():dynamicMetadata():get("gatemorph") or {})["request_id"]"#
            }
            (LuaHost::OpenResty | LuaHost::Apisix, _) => r#"require("resty.jit-uuid").generate_v4()"#,
            (LuaHost::Kong, _) => r#"require("kong.tools.uuid").uuid()"#,
        }
    }

    fn clock(&self) -> &'static str {
        match self {
            LuaHost::Envoy => "os.time()",
            LuaHost::OpenResty | LuaHost::Kong | LuaHost::Apisix => "ngx.time()",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Request,
    Response,
}

/// What to do when a descriptor cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtoFailurePolicy {
    /// Render the route without transformation and warn.
    #[default]
    Degrade,
    /// Abort the whole export.
    Abort,
}

/// Scripts for one route. For Envoy both handlers live in `request`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LuaScripts {
    pub request: Option<String>,
    pub response: Option<String>,
}

/// Canonical payload recorded in the marker comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedTransformation {
    pub descriptor: ProtoDescriptor,
    pub transformation: GrpcTransformation,
}

impl EmbeddedTransformation {
    /// Register the descriptor in `config` (first one of a name wins) and
    /// hand back the transformation.
    pub fn adopt(self, config: &mut GatewayConfig) -> GrpcTransformation {
        if config.find_descriptor(&self.descriptor.name).is_none() {
            config.proto_descriptors.push(self.descriptor);
        }
        self.transformation
    }
}

/// Descriptor resolution plus script generation, shared by the exporters of
/// Lua-capable dialects.
#[derive(Clone, Default)]
pub struct GrpcScripting {
    manager: Option<Arc<ProtoDescriptorManager>>,
    policy: ProtoFailurePolicy,
}

impl GrpcScripting {
    pub fn new(manager: Arc<ProtoDescriptorManager>, policy: ProtoFailurePolicy) -> Self {
        Self {
            manager: Some(manager),
            policy,
        }
    }

    /// Resolve the route's descriptor and render scripts for `host`.
    ///
    /// Returns `Ok(None)` when the route has to be rendered without
    /// transformation; the reason is recorded as a warning.
    pub async fn generate(
        &self,
        ctx: &mut ExportContext<'_>,
        scope: &str,
        grpc: &GrpcTransformation,
        host: LuaHost,
    ) -> TranslateResult<Option<LuaScripts>> {
        let Some(descriptor) = ctx.config().find_descriptor(&grpc.proto_descriptor_ref) else {
            return Err(TranslateError::MissingReference {
                referrer: scope.to_string(),
                name: grpc.proto_descriptor_ref.clone(),
            });
        };
        let Some(manager) = &self.manager else {
            ctx.warn(
                scope,
                FEATURE_PATH,
                "transformation skipped: no proto descriptor manager configured",
            );
            return Ok(None);
        };

        let compiled = match manager.resolve(descriptor).await {
            Ok(compiled) => compiled,
            Err(err) if self.policy == ProtoFailurePolicy::Abort => return Err(err.into()),
            Err(err) => {
                tracing::warn!(descriptor = %descriptor.name, error = %err, "proto descriptor unavailable");
                ctx.warn(scope, FEATURE_PATH, format!("transformation skipped: {err}"));
                return Ok(None);
            }
        };

        let embedded = EmbeddedTransformation {
            descriptor: descriptor.clone(),
            transformation: grpc.clone(),
        };
        let marker = serde_json::to_string(&embedded)
            .map_err(|e| TranslateError::render(ctx.provider(), e.to_string()))?;

        let request = if grpc.request_transform.is_empty() {
            None
        } else {
            lookup(ctx, scope, &compiled, grpc, &grpc.request_type)
        };
        let response = if grpc.response_transform.filter_fields.is_empty()
            && grpc.response_transform.add_fields.is_empty()
        {
            None
        } else {
            lookup(ctx, scope, &compiled, grpc, &grpc.response_type)
        };
        if request.is_none() && response.is_none() {
            return Ok(None);
        }

        let generator = ScriptGenerator {
            host,
            grpc,
            compiled: &compiled,
            marker,
        };
        let request_body = request
            .as_ref()
            .map(|message| generator.request_function(ctx, scope, message));
        let response_body = response
            .as_ref()
            .map(|message| generator.response_function(ctx, scope, message));
        Ok(Some(generator.wrap(request_body, response_body)))
    }
}

fn lookup(
    ctx: &mut ExportContext<'_>,
    scope: &str,
    compiled: &CompiledDescriptor,
    grpc: &GrpcTransformation,
    type_name: &str,
) -> Option<MessageDescriptor> {
    let full_name = grpc.qualified(type_name);
    let message = compiled.message(&full_name);
    if message.is_none() {
        ctx.warn(
            scope,
            FEATURE_PATH,
            format!("message type '{full_name}' is not defined by the descriptor; its transformation is skipped"),
        );
    }
    message
}

struct ScriptGenerator<'a> {
    host: LuaHost,
    grpc: &'a GrpcTransformation,
    compiled: &'a CompiledDescriptor,
    marker: String,
}

impl ScriptGenerator<'_> {
    fn prelude(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{MARKER}{}", self.marker);
        out.push_str("local pb = require(\"pb\")\n");
        let _ = writeln!(out, "assert(pb.load({}))", lua_string(&self.compiled.bytes));
        out.push_str(
            r#"local function unframe(body)
  if body == nil or #body < 5 or string.byte(body, 1) ~= 0 then
    return nil
  end
  local b2, b3, b4, b5 = string.byte(body, 2, 5)
  local len = ((b2 * 256 + b3) * 256 + b4) * 256 + b5
  return string.sub(body, 6, 5 + len)
end
local function frame(payload)
  local len = #payload
  return string.char(0, math.floor(len / 16777216) % 256, math.floor(len / 65536) % 256,
    math.floor(len / 256) % 256, len % 256) .. payload
end
"#,
        );
        out
    }

    fn request_function(
        &self,
        ctx: &mut ExportContext<'_>,
        scope: &str,
        message: &MessageDescriptor,
    ) -> String {
        let transform = &self.grpc.request_transform;
        let name = lua_string(message.full_name().as_bytes());
        let mut out = String::new();
        out.push_str("local function transform_request(body, handle)\n");
        out.push_str("  local payload = unframe(body)\n  if payload == nil then return nil end\n");
        let _ = writeln!(out, "  local msg = pb.decode({name}, payload)");
        out.push_str("  if msg == nil then return nil end\n");

        for field in &transform.remove_fields {
            let _ = writeln!(out, "  msg[{}] = nil", lua_string(field.as_bytes()));
        }
        for (from, to) in &transform.rename_fields {
            if message.get_field_by_name(to).is_none() {
                ctx.warn(
                    scope,
                    FEATURE_PATH,
                    format!("rename target '{to}' is not a field of {}; rename skipped", message.full_name()),
                );
                continue;
            }
            let (from, to) = (lua_string(from.as_bytes()), lua_string(to.as_bytes()));
            let _ = writeln!(out, "  msg[{to}] = msg[{from}]\n  msg[{from}] = nil");
        }
        for (field, value) in &transform.add_fields {
            if let Some(expr) = self.field_value(ctx, scope, message, field, value, Side::Request) {
                let _ = writeln!(out, "  msg[{}] = {expr}", lua_string(field.as_bytes()));
            }
        }

        let _ = writeln!(out, "  return frame(pb.encode({name}, msg))\nend");
        out
    }

    fn response_function(
        &self,
        ctx: &mut ExportContext<'_>,
        scope: &str,
        message: &MessageDescriptor,
    ) -> String {
        let transform = &self.grpc.response_transform;
        let name = lua_string(message.full_name().as_bytes());
        let mut out = String::new();
        out.push_str("local function transform_response(body, handle)\n");
        out.push_str("  local payload = unframe(body)\n  if payload == nil then return nil end\n");
        let _ = writeln!(out, "  local msg = pb.decode({name}, payload)");
        out.push_str("  if msg == nil then return nil end\n");

        if !transform.filter_fields.is_empty() {
            let keep: Vec<String> = transform
                .filter_fields
                .iter()
                .map(|f| format!("[{}] = true", lua_string(f.as_bytes())))
                .collect();
            let _ = writeln!(out, "  local keep = {{ {} }}", keep.join(", "));
            out.push_str("  for key in pairs(msg) do\n    if not keep[key] then msg[key] = nil end\n  end\n");
        }
        for (field, value) in &transform.add_fields {
            if let Some(expr) = self.field_value(ctx, scope, message, field, value, Side::Response) {
                let _ = writeln!(out, "  msg[{}] = {expr}", lua_string(field.as_bytes()));
            }
        }

        let _ = writeln!(out, "  return frame(pb.encode({name}, msg))\nend");
        out
    }

    /// Lua expression assigning `value` to `field`, typed after the field.
    fn field_value(
        &self,
        ctx: &mut ExportContext<'_>,
        scope: &str,
        message: &MessageDescriptor,
        field: &str,
        value: &TemplateValue,
        side: Side,
    ) -> Option<String> {
        let Some(descriptor) = message.get_field_by_name(field) else {
            ctx.warn(
                scope,
                FEATURE_PATH,
                format!("'{field}' is not a field of {}; it is not added", message.full_name()),
            );
            return None;
        };
        let kind = descriptor.kind();
        let numeric = matches!(
            kind,
            Kind::Int32
                | Kind::Int64
                | Kind::Uint32
                | Kind::Uint64
                | Kind::Sint32
                | Kind::Sint64
                | Kind::Fixed32
                | Kind::Fixed64
                | Kind::Sfixed32
                | Kind::Sfixed64
                | Kind::Float
                | Kind::Double
        );

        match value {
            TemplateValue::Uuid => Some(format!("tostring({})", self.host.uuid(side))),
            TemplateValue::Timestamp if numeric => Some(format!("math.floor({})", self.host.clock())),
            TemplateValue::Timestamp => Some(format!("tostring({})", self.host.clock())),
            TemplateValue::Literal(text) if numeric => match text.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => Some(text.trim().to_string()),
                _ => {
                    ctx.warn(
                        scope,
                        FEATURE_PATH,
                        format!("'{text}' is not a number but {field} is numeric; it is not added"),
                    );
                    None
                }
            },
            TemplateValue::Literal(text) if kind == Kind::Bool => {
                Some(if text.trim().eq_ignore_ascii_case("true") { "true" } else { "false" }.to_string())
            }
            TemplateValue::Literal(text) => Some(lua_string(text.as_bytes())),
        }
    }

    fn wrap(&self, request: Option<String>, response: Option<String>) -> LuaScripts {
        let mut functions = self.prelude();
        if let Some(request) = &request {
            functions.push_str(request);
        }
        if let Some(response) = &response {
            functions.push_str(response);
        }

        match self.host {
            LuaHost::Envoy => {
                let mut script = functions;
                script.push_str("function envoy_on_request(handle)\n");
                if response.is_some() {
                    script.push_str("  handle:streamInfo():dynamicMetadata():set(\"gatemorph\", \"request_id\", handle:headers():get(\"x-request-id\") or \"\")\n");
                }
                if request.is_some() {
                    script.push_str(
                        r#"  local body = handle:body()
  if body == nil then return end
  local out = transform_request(body:getBytes(0, body:length()), handle)
  if out ~= nil then body:setBytes(out) end
"#,
                    );
                }
                script.push_str("end\n");
                if response.is_some() {
                    script.push_str(
                        r#"function envoy_on_response(handle)
  local body = handle:body()
  if body == nil then return end
  local out = transform_response(body:getBytes(0, body:length()), handle)
  if out ~= nil then body:setBytes(out) end
end
"#,
                    );
                }
                LuaScripts {
                    request: Some(script),
                    response: None,
                }
            }
            LuaHost::OpenResty => LuaScripts {
                request: request.map(|_| {
                    format!(
                        "{functions}ngx.req.read_body()\nlocal out = transform_request(ngx.req.get_body_data(), nil)\nif out ~= nil then ngx.req.set_body_data(out) end\n"
                    )
                }),
                response: response.map(|_| {
                    format!(
                        "{functions}local chunk, eof = ngx.arg[1], ngx.arg[2]\nngx.ctx.grpc_body = (ngx.ctx.grpc_body or \"\") .. (chunk or \"\")\nif not eof then\n  ngx.arg[1] = nil\n  return\nend\nngx.arg[1] = transform_response(ngx.ctx.grpc_body, nil) or ngx.ctx.grpc_body\n"
                    )
                }),
            },
            LuaHost::Kong => LuaScripts {
                request: request.map(|_| {
                    format!(
                        "{functions}local out = transform_request(kong.request.get_raw_body(), nil)\nif out ~= nil then kong.service.request.set_raw_body(out) end\n"
                    )
                }),
                response: response.map(|_| {
                    format!(
                        "{functions}local body = kong.response.get_raw_body()\nif body == nil then return end\nlocal out = transform_response(body, nil)\nif out ~= nil then kong.response.set_raw_body(out) end\n"
                    )
                }),
            },
            LuaHost::Apisix => LuaScripts {
                request: request.map(|_| {
                    format!(
                        "{functions}return function(conf, ctx)\n  local core = require(\"apisix.core\")\n  local out = transform_request(core.request.get_body(), nil)\n  if out ~= nil then ngx.req.set_body_data(out) end\nend\n"
                    )
                }),
                response: response.map(|_| {
                    format!(
                        "{functions}return function(conf, ctx)\n  local core = require(\"apisix.core\")\n  local body = core.response.hold_body_chunk(ctx)\n  if not body then return end\n  ngx.arg[1] = transform_response(body, nil) or body\nend\n"
                    )
                }),
            },
        }
    }
}

/// Quote bytes as a Lua string literal. Anything outside a safe printable
/// set is written as a three-digit decimal escape.
pub fn lua_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b' ' | b'_' | b'.' | b'-' | b'/' | b':') {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{b:03}");
        }
    }
    out.push('"');
    out
}

/// Recover the canonical transformation embedded in a generated script.
pub fn extract_embedded(script: &str) -> Option<EmbeddedTransformation> {
    script
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(MARKER))
        .and_then(|json| serde_json::from_str(json.trim()).ok())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::models::{
            GatewayConfig, ProtoSource, RequestTransform, ResponseTransform, Route, Service,
            ServiceKind, Target, TransportProtocol, Upstream,
        },
        core::{
            diagnostics::Severity,
            proto_manager::test_support::{CountingCompiler, StaticFetcher, AUTH_PROTO},
            provider::ProviderId,
        },
        ports::descriptor_compiler::ProtoError,
    };

    fn transformation() -> GrpcTransformation {
        let mut add_fields = IndexMap::new();
        add_fields.insert("trace_id".to_string(), TemplateValue::Uuid);
        add_fields.insert("issued_at".to_string(), TemplateValue::Timestamp);
        let mut rename_fields = IndexMap::new();
        rename_fields.insert("client".to_string(), "client_name".to_string());
        GrpcTransformation {
            proto_descriptor_ref: "auth".to_string(),
            package: "auth.v1".to_string(),
            service: "AuthService".to_string(),
            request_type: "LoginRequest".to_string(),
            response_type: "LoginResponse".to_string(),
            request_transform: RequestTransform {
                add_fields,
                remove_fields: vec!["password".to_string()],
                rename_fields,
            },
            response_transform: ResponseTransform {
                filter_fields: vec!["token".to_string()],
                add_fields: IndexMap::new(),
            },
        }
    }

    fn config() -> GatewayConfig {
        let mut service = Service::new(
            "auth",
            Upstream::with_targets(vec![Target::new("auth-svc", 50051, 1)]),
        );
        service.kind = ServiceKind::Grpc;
        service.transport_protocol = TransportProtocol::Http2;
        let mut route = Route::new("/auth.v1.AuthService/Login");
        route.grpc_transformation = Some(transformation());
        service.routes.push(route);

        let mut config = GatewayConfig::new();
        config.proto_descriptors.push(ProtoDescriptor {
            name: "auth".to_string(),
            source: ProtoSource::Inline {
                content: AUTH_PROTO.to_string(),
            },
            resolved: None,
        });
        config.services.push(service);
        config
    }

    fn scripting(dir: &TempDir, compiler: CountingCompiler) -> GrpcScripting {
        let manager = ProtoDescriptorManager::new(
            Arc::new(compiler),
            Arc::new(StaticFetcher::unreachable()),
            dir.path(),
        );
        GrpcScripting::new(Arc::new(manager), ProtoFailurePolicy::Degrade)
    }

    #[tokio::test]
    async fn request_script_removes_renames_and_adds_in_order() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut ctx = ExportContext::new(ProviderId::Kong, &config).unwrap();
        let grpc = transformation();
        let scripts = scripting(&dir, CountingCompiler::new())
            .generate(&mut ctx, "scope", &grpc, LuaHost::Kong)
            .await
            .unwrap()
            .unwrap();

        let request = scripts.request.unwrap();
        let remove = request.find("msg[\"password\"] = nil").unwrap();
        let rename = request.find("msg[\"client_name\"] = msg[\"client\"]").unwrap();
        let add = request.find("msg[\"trace_id\"] = tostring(require(\"kong.tools.uuid\").uuid())").unwrap();
        assert!(remove < rename && rename < add);
        assert!(request.contains("msg[\"issued_at\"] = math.floor(ngx.time())"));
        assert!(!request.contains("= \"{{uuid}}\""));
        assert!(request.contains("kong.service.request.set_raw_body"));

        let response = scripts.response.unwrap();
        assert!(response.contains("local keep = { [\"token\"] = true }"));
    }

    #[tokio::test]
    async fn envoy_script_has_both_handlers() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut ctx = ExportContext::new(ProviderId::Envoy, &config).unwrap();
        let grpc = transformation();
        let scripts = scripting(&dir, CountingCompiler::new())
            .generate(&mut ctx, "scope", &grpc, LuaHost::Envoy)
            .await
            .unwrap()
            .unwrap();
        let script = scripts.request.unwrap();
        assert!(script.contains("function envoy_on_request(handle)"));
        assert!(script.contains("function envoy_on_response(handle)"));
        assert!(script.contains("handle:headers():get(\"x-request-id\")"));
        assert!(scripts.response.is_none());
    }

    #[tokio::test]
    async fn response_only_transformations_leave_requests_untouched() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut grpc = transformation();
        grpc.request_transform = RequestTransform::default();

        let mut ctx = ExportContext::new(ProviderId::Kong, &config).unwrap();
        let scripts = scripting(&dir, CountingCompiler::new())
            .generate(&mut ctx, "scope", &grpc, LuaHost::Kong)
            .await
            .unwrap()
            .unwrap();
        assert!(scripts.request.is_none());
        let response = scripts.response.unwrap();
        assert!(response.contains("local keep = { [\"token\"] = true }"));
        assert!(!response.contains("function transform_request"));

        let mut ctx = ExportContext::new(ProviderId::Envoy, &config).unwrap();
        let script = scripting(&dir, CountingCompiler::new())
            .generate(&mut ctx, "scope", &grpc, LuaHost::Envoy)
            .await
            .unwrap()
            .unwrap()
            .request
            .unwrap();
        assert!(script.contains("function envoy_on_response(handle)"));
        assert!(!script.contains("transform_request("));
    }

    #[tokio::test]
    async fn descriptor_failures_degrade_to_warnings() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut ctx = ExportContext::new(ProviderId::Apisix, &config).unwrap();
        let grpc = transformation();
        let scripts = scripting(
            &dir,
            CountingCompiler::failing(ProtoError::ExternalTool("protoc not found".to_string())),
        )
        .generate(&mut ctx, "scope", &grpc, LuaHost::Apisix)
        .await
        .unwrap();
        assert!(scripts.is_none());
        assert!(
            ctx.diagnostics()
                .mentions("route.grpcTransformation", Severity::Warning)
        );
    }

    #[tokio::test]
    async fn abort_policy_propagates_descriptor_failures() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut ctx = ExportContext::new(ProviderId::Apisix, &config).unwrap();
        let manager = ProtoDescriptorManager::new(
            Arc::new(CountingCompiler::failing(ProtoError::Parse("bad".to_string()))),
            Arc::new(StaticFetcher::unreachable()),
            dir.path(),
        );
        let scripting = GrpcScripting::new(Arc::new(manager), ProtoFailurePolicy::Abort);
        let result = scripting
            .generate(&mut ctx, "scope", &transformation(), LuaHost::Apisix)
            .await;
        assert!(matches!(result, Err(TranslateError::Proto(ProtoError::Parse(_)))));
    }

    #[tokio::test]
    async fn embedded_transformation_round_trips() {
        let dir = TempDir::new().unwrap();
        let config = config();
        let mut ctx = ExportContext::new(ProviderId::Nginx, &config).unwrap();
        let grpc = transformation();
        let scripts = scripting(&dir, CountingCompiler::new())
            .generate(&mut ctx, "scope", &grpc, LuaHost::OpenResty)
            .await
            .unwrap()
            .unwrap();
        let embedded = extract_embedded(scripts.request.as_deref().unwrap()).unwrap();
        assert_eq!(embedded.transformation, grpc);
        assert_eq!(embedded.descriptor.name, "auth");
    }

    #[test]
    fn lua_strings_escape_control_bytes() {
        assert_eq!(lua_string(b"a\n\"b"), "\"a\\010\\034b\"");
        assert_eq!(lua_string(&[0, 1]), "\"\\000\\001\"");
    }
}
