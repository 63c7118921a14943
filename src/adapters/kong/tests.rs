use tempfile::TempDir;

use super::{KongExporter, KongImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load, scripting},
    config::models::{Authentication, LoadBalanceAlgorithm, TemplateValue},
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn renders_upstream_targets_and_route_plugins() {
    let config = load(REST);
    let out = KongExporter::default().export(&config).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);

    let text = out.output;
    assert!(text.contains("_format_version: '3.0'") || text.contains("_format_version: \"3.0\""));
    assert!(text.contains("name: users-upstream"));
    assert!(text.contains("target: users-a:8080"));
    assert!(text.contains("host: users-upstream"));
    assert!(text.contains("name: cors"));
    assert!(text.contains("X-Gateway:gatemorph"));
    // no algorithm in the model, none in the output
    assert!(!text.contains("algorithm:"));
}

#[tokio::test]
async fn rate_limit_keeps_the_rate_but_reports_the_burst() {
    let out = KongExporter::default().export(&load(RATE_LIMITED)).await.unwrap();
    assert!(out.output.contains("name: rate-limiting"));
    assert!(out.output.contains("second: 100"));
    assert!(out.output.contains("weight: 2"));
    let warnings: Vec<_> = out.diagnostics.at_least(Severity::Warning).collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_eq!(warnings[0].feature_path, "route.rateLimit.burst");
}

#[tokio::test]
async fn rest_document_round_trips() {
    let config = load(REST);
    let out = KongExporter::default().export(&config).await.unwrap();
    let back = KongImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
}

#[tokio::test]
async fn unsupported_features_are_reported_not_dropped_silently() {
    let config = load(FEATURES);
    let out = KongExporter::default().export(&config).await.unwrap();
    let diags = &out.diagnostics;
    for path in [
        "route.rateLimit.burst",
        "route.mirroring",
        "route.trafficSplit",
        "upstream.circuitBreaker",
        "route.headers.templates",
    ] {
        assert!(diags.mentions(path, Severity::Warning), "missing warning for {path}");
    }
    let text = out.output;
    assert!(text.contains("name: correlation-id"));
    assert!(text.contains("name: basic-auth"));
    assert!(text.contains("username: alice"));
    assert!(text.contains("name: key-auth"));
    assert!(text.contains("algorithm: round-robin"));
    assert!(text.contains("connect_timeout: 2000"));
    assert!(text.contains("retries: 3"));
    assert!(!text.contains("{{timestamp}}"));
}

#[tokio::test]
async fn imports_weighted_round_robin_and_plugins() {
    let native = r#"
_format_version: "3.0"
services:
  - name: catalog
    host: catalog-upstream
    port: 8080
    read_timeout: 15000
    routes:
      - name: catalog-0
        paths: [/catalog]
        methods: [GET]
        plugins:
          - name: key-auth
            config: { key_names: [apikey], key_in_header: false, key_in_query: true }
          - name: correlation-id
            config: { header_name: X-Correlation-Id, generator: uuid, echo_downstream: true }
          - name: ip-restriction
            config: { allow: [10.0.0.0/8] }
upstreams:
  - name: catalog-upstream
    algorithm: round-robin
    targets:
      - { target: "catalog-a:8080", weight: 300 }
      - { target: "catalog-b:8080", weight: 100 }
"#;
    let imported = KongImporter.import(native).unwrap();
    let service = &imported.output.services[0];
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    assert_eq!(service.upstream.targets[0].weight, 300);

    let route = &service.routes[0];
    assert!(matches!(
        route.authentication,
        Some(Authentication::ApiKey { ref key_name, location: crate::config::models::KeyLocation::Query }) if key_name == "apikey"
    ));
    let headers = route.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Correlation-Id"], TemplateValue::Uuid);
    assert_eq!(headers.response_add["X-Correlation-Id"], TemplateValue::Uuid);
    assert_eq!(
        route.timeout.as_ref().unwrap().read,
        Some(std::time::Duration::from_secs(15))
    );
    assert!(imported.diagnostics.mentions("plugins.ip-restriction", Severity::Warning));
}

#[test]
fn jwt_import_derives_jwks_uri_with_warning() {
    let native = r#"
_format_version: "3.0"
consumers:
  - username: issuer
    jwt_secrets:
      - { key: "https://auth.example.com", algorithm: RS256 }
services:
  - name: admin
    host: admin.internal
    routes:
      - name: admin-0
        paths: [/admin]
        plugins:
          - name: jwt
"#;
    let imported = KongImporter.import(native).unwrap();
    let route = &imported.output.services[0].routes[0];
    match route.authentication.as_ref().unwrap() {
        Authentication::Jwt { issuer, jwks_uri, .. } => {
            assert_eq!(issuer, "https://auth.example.com");
            assert_eq!(jwks_uri, "https://auth.example.com/.well-known/jwks.json");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(imported.diagnostics.mentions("route.authentication.jwt", Severity::Warning));
    // plain host services get a single target on the service port
    assert_eq!(imported.output.services[0].upstream.targets[0].port, 80);
}

#[test]
fn unknown_top_level_sections_become_global_config() {
    let native = "_format_version: \"3.0\"\ncertificates: []\nservices: []\n";
    let imported = KongImporter.import(native).unwrap();
    assert!(imported.output.global_config.contains_key("kong"));
}

#[test]
fn empty_input_is_a_parse_error() {
    assert!(KongImporter.import("   ").is_err());
}

#[tokio::test]
async fn grpc_transformation_survives_export_and_import() {
    let dir = TempDir::new().unwrap();
    let config = load(GRPC);
    let out = KongExporter::new(scripting(&dir)).export(&config).await.unwrap();
    assert!(!out.diagnostics.has_errors());
    assert!(out.output.contains("name: pre-function"));
    assert!(out.output.contains("protocol: grpc"));

    let back = KongImporter.import(&out.output).unwrap();
    let route = &back.output.services[0].routes[0];
    assert_eq!(
        route.grpc_transformation,
        config.services[0].routes[0].grpc_transformation
    );
    assert_eq!(back.output.proto_descriptors[0].name, "auth");
}
