use std::time::Duration;

use tempfile::TempDir;

use super::{NginxExporter, NginxImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load, scripting},
    config::models::{
        Authentication, KeyLocation, LoadBalanceAlgorithm, LoadBalancer, RateLimitKey, ServiceKind,
        TemplateValue, TransportProtocol,
    },
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn renders_upstreams_and_locations() {
    let config = load(REST);
    let out = NginxExporter::default().export(&config).await.unwrap();
    let warnings: Vec<_> = out.diagnostics.at_least(Severity::Warning).collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_eq!(warnings[0].feature_path, "route.cors");

    let text = out.output;
    assert!(text.contains("upstream users {"));
    assert!(text.contains("server users-a:8080 weight=2;"));
    assert!(text.contains("location /api {"));
    assert!(text.contains("$request_method !~ ^(GET|POST)$"));
    assert!(text.contains("proxy_set_header X-Internal \"\";"));
    assert!(text.contains("add_header X-Served-By gatemorph always;"));
    assert!(text.contains("add_header Access-Control-Max-Age 600 always;"));
    assert!(text.contains("proxy_pass http://users;"));
}

#[tokio::test]
async fn rest_document_round_trips() {
    let config = load(REST);
    let out = NginxExporter::default().export(&config).await.unwrap();
    let back = NginxImporter.import(&out.output).unwrap();
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
    assert_eq!(back.output.provider_hint.as_deref(), Some("nginx"));

    // uneven weights without a balancing directive read back as weighted
    let mut expected = config.services.clone();
    expected[0].upstream.load_balancer = Some(LoadBalancer {
        algorithm: LoadBalanceAlgorithm::Weighted,
    });
    assert_eq!(back.output.services, expected);
}

#[tokio::test]
async fn rate_limit_uses_a_zone_per_route() {
    let config = load(RATE_LIMITED);
    let out = NginxExporter::default().export(&config).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);
    let text = &out.output;
    assert!(text.contains("limit_req_zone $binary_remote_addr zone=api_0:10m rate=100r/s;"));
    assert!(text.contains("limit_req zone=api_0 burst=100 nodelay;"));
    assert!(text.contains("limit_req_status 429;"));

    let back = NginxImporter.import(text).unwrap();
    assert_eq!(back.output.services, config.services);
}

#[tokio::test]
async fn renders_split_mirror_and_resilience_settings() {
    let config = load(FEATURES);
    let out = NginxExporter::default().export(&config).await.unwrap();
    let diags = &out.diagnostics;
    assert!(diags.mentions("upstream.healthCheck.active", Severity::Warning));
    assert!(diags.mentions("route.authentication.jwt", Severity::Warning));
    assert!(diags.mentions("route.mirroring", Severity::Warning));
    assert!(!diags.mentions("route.headers.templates", Severity::Warning));

    let text = &out.output;
    assert!(text.contains("server orders-a:9000 weight=100 max_fails=5 fail_timeout=30s;"));
    assert!(text.contains("limit_req_zone $http_x_api_key zone=orders_0:10m rate=10r/s;"));
    assert!(text.contains("proxy_set_header X-Request-Id $request_id;"));
    assert!(text.contains("proxy_set_header X-Started $msec;"));
    assert!(text.contains("auth_basic_user_file /etc/nginx/htpasswd/orders-0;"));
    assert!(text.contains("mirror /_mirror/orders-0/shadow;"));
    assert!(text.contains("proxy_next_upstream error timeout http_500 http_502 http_503 http_504;"));
    assert!(text.contains("proxy_next_upstream_tries 4;"));
    assert!(text.contains("split_clients \"${request_id}\" $split_orders_1 {"));
    assert!(text.contains("67% orders-1-stable;"));
    assert!(text.contains("* orders-1-canary;"));
    assert!(text.contains("proxy_pass http://$split_orders_1;"));
    assert!(text.contains("if ( $http_x_api_key = \"\" ) {"));
}

#[tokio::test]
async fn imports_features_back() {
    let config = load(FEATURES);
    let out = NginxExporter::default().export(&config).await.unwrap();
    let back = NginxImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services.len(), 1, "{:?}", back.output.services);
    let service = &back.output.services[0];
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    let breaker = service.upstream.circuit_breaker.as_ref().unwrap();
    assert_eq!(breaker.max_failures, 5);
    assert_eq!(breaker.window, Duration::from_secs(30));
    assert_eq!(service.routes.len(), 3);

    let first = &service.routes[0];
    let limit = first.rate_limit.as_ref().unwrap();
    assert_eq!((limit.requests_per_second, limit.burst), (10, 20));
    assert_eq!(limit.key_type, RateLimitKey::Header);
    assert_eq!(limit.key_header.as_deref(), Some("X-Api-Key"));
    let headers = first.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Request-Id"], TemplateValue::Uuid);
    assert_eq!(headers.request_add["X-Started"], TemplateValue::Timestamp);
    assert_eq!(headers.response_remove, ["Server"]);
    let mirror = &first.mirroring.as_ref().unwrap().targets[0];
    assert_eq!(mirror.name, "shadow");
    assert_eq!(mirror.upstream.authority(), "orders-shadow:9000");
    let retry = first.retry.as_ref().unwrap();
    assert_eq!(retry.attempts, 3);
    assert_eq!(retry.retry_on, ["5xx"]);
    assert_eq!(first.timeout, config.services[0].routes[0].timeout);
    assert!(matches!(first.authentication, Some(Authentication::Basic { .. })));
    assert!(back.diagnostics.mentions("route.authentication.basic", Severity::Warning));

    let second = &service.routes[1];
    assert_eq!(
        second.authentication,
        Some(Authentication::ApiKey {
            key_name: "X-Api-Key".to_string(),
            location: KeyLocation::Header,
        })
    );
    let split = &second.traffic_split.as_ref().unwrap().targets;
    let shares: Vec<_> = split.iter().map(|d| (d.name.as_str(), d.weight)).collect();
    assert_eq!(shares, [("stable", 67), ("canary", 33)]);

    assert_eq!(service.routes[2].path_prefix, "/orders/admin");
    assert_eq!(service.routes[2].authentication, None);
}

#[tokio::test]
async fn several_origins_go_through_a_map() {
    let config = load(
        r#"
services:
  - name: web
    upstream: { targets: [{ host: web, port: 80 }] }
    routes:
      - pathPrefix: /
        cors:
          allowedOrigins: ["https://a.example.com", "https://b.example.com"]
          allowedMethods: [GET]
"#,
    );
    let out = NginxExporter::default().export(&config).await.unwrap();
    assert!(out.output.contains("map $http_origin $cors_origin_web_0 {"));
    assert!(out.output.contains("add_header Access-Control-Allow-Origin $cors_origin_web_0 always;"));

    let back = NginxImporter.import(&out.output).unwrap();
    let cors = back.output.services[0].routes[0].cors.as_ref().unwrap();
    assert_eq!(cors.allowed_origins, ["https://a.example.com", "https://b.example.com"]);
    assert_eq!(cors.allowed_methods, ["GET"]);
}

#[tokio::test]
async fn grpc_transformation_round_trips_through_lua_blocks() {
    let dir = TempDir::new().unwrap();
    let config = load(GRPC);
    let out = NginxExporter::new(scripting(&dir)).export(&config).await.unwrap();
    assert!(!out.diagnostics.has_errors());
    let text = &out.output;
    assert!(text.contains("http2 on;"));
    assert!(text.contains("access_by_lua_block {"));
    assert!(text.contains("body_filter_by_lua_block {"));
    assert!(text.contains("grpc_pass grpc://auth;"));

    let back = NginxImporter.import(text).unwrap();
    let service = &back.output.services[0];
    assert_eq!(service.kind, ServiceKind::Grpc);
    assert_eq!(service.transport_protocol, TransportProtocol::Http2);
    assert_eq!(
        service.routes[0].grpc_transformation,
        config.services[0].routes[0].grpc_transformation
    );
    assert_eq!(back.output.proto_descriptors.len(), 1);
}

#[test]
fn imports_hand_written_configuration() {
    let native = r#"
log_format main '$remote_addr - $request';

upstream backend {
    least_conn;
    server 10.0.0.1:8080 weight=3;
    server 10.0.0.2:8080 down;
    keepalive 16;
}

server {
    listen 80;
    root /var/www;

    location / {
        proxy_pass http://backend;
    }
    location ~ \.php$ {
        fastcgi_pass 127.0.0.1:9000;
    }
    location /static {
        gzip on;
        proxy_pass http://cdn.internal:8081;
    }
    location /legacy {
        return 301 /new;
    }
}
"#;
    let back = NginxImporter.import(native).unwrap();
    let config = &back.output;
    let names: Vec<_> = config.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["backend", "cdn-internal-8081"]);

    let backend = &config.services[0];
    assert_eq!(backend.upstream.algorithm(), Some(LoadBalanceAlgorithm::LeastConn));
    let weights: Vec<_> = backend.upstream.targets.iter().map(|t| t.weight).collect();
    assert_eq!(weights, [3, 0]);
    assert_eq!(backend.routes[0].path_prefix, "/");
    assert_eq!(config.services[1].routes[0].path_prefix, "/static");

    let diags = &back.diagnostics;
    assert!(diags.mentions("route.match", Severity::Warning));
    assert!(diags.mentions("location.gzip", Severity::Warning));
    assert!(diags.mentions("location.return", Severity::Warning));
    assert!(diags.mentions("server.root", Severity::Warning));
    assert!(diags.mentions("upstream.keepalive", Severity::Warning));
    let passthrough = config.global_config["nginx"].as_str().unwrap();
    assert!(passthrough.contains("log_format main"));
}

#[test]
fn documents_without_servers_are_rejected() {
    assert!(NginxImporter.import("").is_err());
    assert!(NginxImporter.import("events { worker_connections 64; }").is_err());
    assert!(NginxImporter.import("server { listen 80;").is_err());
}

#[tokio::test]
async fn global_passthrough_is_prepended() {
    let mut config = load(REST);
    config.global_config.insert(
        "nginx".to_string(),
        serde_json::Value::String("client_max_body_size 10m;".to_string()),
    );
    let out = NginxExporter::default().export(&config).await.unwrap();
    assert!(out.output.starts_with("client_max_body_size 10m;"));
}
