//! Names and type URLs of the Envoy v3 bootstrap pieces the adapter emits.
use serde_json::Value;

pub const LISTENER_NAME: &str = "listener_0";
pub const LISTENER_PORT: u16 = 10000;
pub const ROUTE_CONFIG_NAME: &str = "local_route";
pub const VIRTUAL_HOST_NAME: &str = "gateway";

pub const HCM_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const HCM_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";

pub const RATELIMIT_FILTER: &str = "envoy.filters.http.local_ratelimit";
pub const RATELIMIT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";

pub const CORS_FILTER: &str = "envoy.filters.http.cors";
pub const CORS_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.http.cors.v3.Cors";
pub const CORS_POLICY_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.cors.v3.CorsPolicy";

pub const BASIC_AUTH_FILTER: &str = "envoy.filters.http.basic_auth";
pub const BASIC_AUTH_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.basic_auth.v3.BasicAuth";
pub const BASIC_AUTH_ROUTE_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.basic_auth.v3.BasicAuthPerRoute";

pub const JWT_FILTER: &str = "envoy.filters.http.jwt_authn";
pub const JWT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.JwtAuthentication";
pub const JWT_ROUTE_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.PerRouteConfig";

pub const LUA_FILTER: &str = "envoy.filters.http.lua";
pub const LUA_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.http.lua.v3.Lua";
pub const LUA_ROUTE_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.lua.v3.LuaPerRoute";

pub const ROUTER_FILTER: &str = "envoy.filters.http.router";
pub const ROUTER_TYPE: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

pub const HTTP_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const HTTP_OPTIONS_TYPE: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";
pub const TLS_SOCKET: &str = "envoy.transport_sockets.tls";
pub const TLS_TYPE: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext";

/// Runtime header expressions of the access-log formatter.
pub const REQUEST_ID_EXPR: &str = "%REQ(x-request-id)%";
pub const START_TIME_EXPR: &str = "%START_TIME(%s)%";

/// Per-filter config at `key` whose name ends with `filter`'s last segment.
pub fn per_filter<'a>(configs: &'a Value, filter: &str) -> Option<&'a Value> {
    let suffix = filter.rsplit('.').next().unwrap_or(filter);
    configs
        .as_object()?
        .iter()
        .find(|(name, _)| name.rsplit('.').next() == Some(suffix))
        .map(|(_, value)| value)
}

/// The first socket address of a cluster's load assignment.
pub fn socket_addresses(cluster: &Value) -> Vec<(String, u16, Option<u32>, Option<String>)> {
    let mut out = Vec::new();
    let groups = cluster
        .pointer("/load_assignment/endpoints")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for group in &groups {
        for lb_endpoint in group
            .get("lb_endpoints")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(address) = lb_endpoint.pointer("/endpoint/address/socket_address") else {
                continue;
            };
            let Some(host) = address.get("address").and_then(Value::as_str) else {
                continue;
            };
            let port = address
                .get("port_value")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(80);
            let weight = lb_endpoint
                .get("load_balancing_weight")
                .and_then(Value::as_u64)
                .map(|w| w as u32);
            let status = lb_endpoint
                .get("health_status")
                .and_then(Value::as_str)
                .map(str::to_string);
            out.push((host.to_string(), port, weight, status));
        }
    }
    out
}
