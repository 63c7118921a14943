//! CloudFormation template embedding an OpenAPI 3 body for an API Gateway
//! HTTP API.
pub const TEMPLATE_VERSION: &str = "2010-09-09";
pub const OPENAPI_VERSION: &str = "3.0.1";

pub const API_RESOURCE: &str = "HttpApi";
pub const STAGE_RESOURCE: &str = "HttpApiStage";
pub const API_TYPE: &str = "AWS::ApiGatewayV2::Api";
pub const STAGE_TYPE: &str = "AWS::ApiGatewayV2::Stage";
pub const STAGE_PARAMETER: &str = "StageName";
pub const DEFAULT_STAGE: &str = "prod";

pub const INTEGRATION: &str = "x-amazon-apigateway-integration";
pub const ANY_METHOD: &str = "x-amazon-apigateway-any-method";
pub const AUTHORIZER: &str = "x-amazon-apigateway-authorizer";
pub const CORS: &str = "x-amazon-apigateway-cors";

pub const PROXY_SEGMENT: &str = "{proxy+}";
pub const IDENTITY_SOURCE: &str = "$request.header.Authorization";
pub const REQUEST_ID_EXPR: &str = "$context.requestId";
pub const REQUEST_TIME_EXPR: &str = "$context.requestTimeEpoch";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Integration timeout ceiling of HTTP APIs.
pub const MAX_INTEGRATION_MILLIS: u128 = 30_000;

/// OpenAPI path capturing everything below a prefix.
pub fn proxy_path(prefix: &str) -> String {
    format!("{}/{PROXY_SEGMENT}", prefix.trim_end_matches('/'))
}

/// Prefix a greedy OpenAPI path was generated from.
pub fn prefix_of(path: &str) -> String {
    match path.strip_suffix(PROXY_SEGMENT) {
        Some(rest) => {
            let prefix = rest.trim_end_matches('/');
            if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            }
        }
        None => path.to_string(),
    }
}

/// Stage route key, e.g. `GET /api/{proxy+}`.
pub fn route_key(method: Option<&str>, path: &str) -> String {
    format!("{} {path}", method.unwrap_or("ANY"))
}

/// Operation id `<route>-<verb>` used to regroup operations into routes.
pub fn operation_id(route: &str, method: Option<&str>) -> String {
    format!("{route}-{}", method.unwrap_or("any").to_ascii_lowercase())
}

/// JWKS document HTTP APIs discover from an issuer.
pub fn discovered_jwks(issuer: &str) -> String {
    format!("{}{JWKS_PATH}", issuer.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_paths_map_back_to_prefixes() {
        assert_eq!(proxy_path("/api"), "/api/{proxy+}");
        assert_eq!(proxy_path("/"), "/{proxy+}");
        assert_eq!(prefix_of("/api/{proxy+}"), "/api");
        assert_eq!(prefix_of("/{proxy+}"), "/");
        assert_eq!(prefix_of("/exact"), "/exact");
    }

    #[test]
    fn keys_and_ids() {
        assert_eq!(route_key(Some("GET"), "/api/{proxy+}"), "GET /api/{proxy+}");
        assert_eq!(route_key(None, "/{proxy+}"), "ANY /{proxy+}");
        assert_eq!(operation_id("users-0", Some("GET")), "users-0-get");
        assert_eq!(operation_id("users-0", None), "users-0-any");
        assert_eq!(
            discovered_jwks("https://auth.example.com/"),
            "https://auth.example.com/.well-known/jwks.json"
        );
    }
}
