use tempfile::TempDir;

use super::{ApisixExporter, ApisixImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load, scripting},
    config::models::{Authentication, LoadBalanceAlgorithm, TemplateValue},
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn output_ends_with_end_marker() {
    let out = ApisixExporter::default().export(&load(REST)).await.unwrap();
    assert!(out.output.trim_end().ends_with("#END"));
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);
    assert!(out.output.contains("/api/*"));
    assert!(out.output.contains("allow_origins"));
    assert!(out.output.contains("https://app.example.com"));
}

#[tokio::test]
async fn weighted_rate_limited_route_renders_without_warnings() {
    let config = load(RATE_LIMITED);
    let out = ApisixExporter::default().export(&config).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);
    assert!(out.output.contains("limit-req"));
    assert!(out.output.contains("rate: 100"));
    assert!(out.output.contains("burst: 100"));

    let back = ApisixImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
}

#[tokio::test]
async fn rest_document_round_trips() {
    let config = load(REST);
    let out = ApisixExporter::default().export(&config).await.unwrap();
    let back = ApisixImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
}

#[tokio::test]
async fn renders_split_mirror_breaker_and_templates() {
    let config = load(FEATURES);
    let out = ApisixExporter::default().export(&config).await.unwrap();
    let text = &out.output;
    assert!(text.contains("traffic-split"));
    assert!(text.contains("orders-canary:9000"));
    assert!(text.contains("proxy-mirror"));
    assert!(text.contains("sample_ratio: 0.1"));
    assert!(text.contains("api-breaker"));
    assert!(text.contains("request-id"));
    assert!(text.contains("$msec"));
    assert!(text.contains("key: http_x_api_key"));
    assert!(text.contains("openid-connect"));
    assert!(text.contains("type: roundrobin"));
    // burst 20 over 10 rps leaves 10 excess requests
    assert!(text.contains("burst: 10"));
    assert!(out.diagnostics.mentions("upstream.circuitBreaker", Severity::Warning));
    assert!(out.diagnostics.mentions("route.timeout", Severity::Warning));
}

#[tokio::test]
async fn feature_document_keeps_weights_and_burst_on_import() {
    let config = load(FEATURES);
    let out = ApisixExporter::default().export(&config).await.unwrap();
    let back = ApisixImporter.import(&out.output).unwrap();
    let service = &back.output.services[0];
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    assert_eq!(service.upstream.targets[1].weight, 200);

    let route = &service.routes[0];
    let limit = route.rate_limit.as_ref().unwrap();
    assert_eq!((limit.requests_per_second, limit.burst), (10, 20));
    assert_eq!(limit.key_header.as_deref(), Some("X-Api-Key"));
    assert!(matches!(route.authentication, Some(Authentication::Basic { ref users }) if users[0].username == "alice"));
    let headers = route.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Request-Id"], TemplateValue::Uuid);
    assert_eq!(headers.request_add["X-Started"], TemplateValue::Timestamp);

    let split = service.routes[1].traffic_split.as_ref().unwrap();
    assert_eq!(split.targets.len(), 2);
    assert_eq!(split.targets[1].upstream.host, "orders-canary");
    assert_eq!(split.targets[0].weight, 2);
    assert!(service.upstream.circuit_breaker.is_some());
}

#[test]
fn imports_map_nodes_and_legacy_header_maps() {
    let native = r#"
routes:
  - id: legacy
    uri: /legacy/*
    upstream:
      type: chash
      hash_on: vars
      key: remote_addr
      nodes:
        "legacy-a:80": 1
        "legacy-b:80": 1
    plugins:
      proxy-rewrite:
        headers:
          X-Env: prod
          X-Debug: ""
      ip-restriction:
        whitelist: [10.0.0.0/8]
#END
"#;
    let imported = ApisixImporter.import(native).unwrap();
    let service = &imported.output.services[0];
    assert_eq!(service.name, "legacy");
    assert_eq!(service.upstream.targets.len(), 2);
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::IpHash));
    let route = &service.routes[0];
    assert_eq!(route.path_prefix, "/legacy");
    let headers = route.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Env"], TemplateValue::literal("prod"));
    assert_eq!(headers.request_remove, vec!["X-Debug".to_string()]);
    assert!(imported.diagnostics.mentions("plugins.ip-restriction", Severity::Warning));
}

#[tokio::test]
async fn grpc_scripts_use_serverless_plugins() {
    let dir = TempDir::new().unwrap();
    let config = load(GRPC);
    let out = ApisixExporter::new(scripting(&dir)).export(&config).await.unwrap();
    assert!(out.output.contains("serverless-pre-function"));
    assert!(out.output.contains("serverless-post-function"));
    assert!(out.output.contains("scheme: grpc"));
    assert!(out.output.contains("resty.jit-uuid"));
    assert!(out.output.contains("[\\\"password\\\"] = nil") || out.output.contains("[\"password\"] = nil"));

    let back = ApisixImporter.import(&out.output).unwrap();
    assert_eq!(
        back.output.services[0].routes[0].grpc_transformation,
        config.services[0].routes[0].grpc_transformation
    );
}
