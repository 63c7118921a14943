use tempfile::TempDir;

use super::{EnvoyExporter, EnvoyImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load, scripting},
    config::models::{Authentication, LoadBalanceAlgorithm, ServiceKind, TemplateValue, TransportProtocol},
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn renders_listener_routes_and_clusters() {
    let config = load(REST);
    let out = EnvoyExporter::default().export(&config).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);

    let text = out.output;
    assert!(text.contains("name: listener_0"));
    assert!(text.contains("prefix: /api"));
    assert!(text.contains("^(GET|POST)$"));
    assert!(text.contains("cluster: users"));
    assert!(text.contains("load_balancing_weight: 2"));
    assert!(text.contains("https://app.example.com"));
    assert!(text.contains("envoy.filters.http.router"));
    assert!(!text.contains("lb_policy"));
}

#[tokio::test]
async fn local_rate_limit_shares_one_bucket_per_route() {
    let config = load(RATE_LIMITED);
    let out = EnvoyExporter::default().export(&config).await.unwrap();
    let warnings: Vec<_> = out.diagnostics.at_least(Severity::Warning).collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert_eq!(warnings[0].feature_path, "route.rateLimit.keyType");
    assert!(out.output.contains("envoy.filters.http.local_ratelimit"));
    assert!(out.output.contains("max_tokens: 200"));
    assert!(out.output.contains("tokens_per_fill: 100"));
    assert!(out.output.contains("lb_policy: ROUND_ROBIN"));

    let back = EnvoyImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
}

#[tokio::test]
async fn rest_document_round_trips() {
    let config = load(REST);
    let out = EnvoyExporter::default().export(&config).await.unwrap();
    let back = EnvoyImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
}

#[tokio::test]
async fn renders_split_mirror_and_resilience_settings() {
    let config = load(FEATURES);
    let out = EnvoyExporter::default().export(&config).await.unwrap();
    let diags = &out.diagnostics;
    assert!(diags.mentions("route.authentication.apiKey", Severity::Warning));
    assert!(diags.mentions("upstream.circuitBreaker", Severity::Warning));
    assert!(!diags.mentions("route.headers.templates", Severity::Warning));

    let text = &out.output;
    assert!(text.contains("lb_policy: ROUND_ROBIN"));
    assert!(text.contains("connect_timeout: 2s"));
    assert!(text.contains("consecutive_5xx: 5"));
    assert!(text.contains("path: /healthz"));
    assert!(text.contains("cluster: orders-0-mirror-shadow"));
    assert!(text.contains("numerator: 10"));
    assert!(text.contains("name: orders-1-canary"));
    assert!(text.contains("value: '%REQ(x-request-id)%'") || text.contains("value: \"%REQ(x-request-id)%\""));
    assert!(text.contains("num_retries: 3"));
    assert!(text.contains("base_interval: 0.25s"));
    assert!(text.contains("issuer: https://auth.example.com"));
    assert!(text.contains("cluster: jwks-auth-example-com") || text.contains("jwks-auth"));

    // longest prefix first
    let admin = text.find("prefix: /orders/admin").unwrap();
    let plain = text.find("prefix: /orders\n").unwrap();
    assert!(admin < plain);
}

#[tokio::test]
async fn imports_features_back_in_route_order() {
    let config = load(FEATURES);
    let out = EnvoyExporter::default().export(&config).await.unwrap();
    let back = EnvoyImporter.import(&out.output).unwrap();
    let service = &back.output.services[0];
    assert_eq!(back.output.services.len(), 1);
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    assert!(service.upstream.circuit_breaker.is_some());
    assert_eq!(
        service.upstream.health_check.as_ref().unwrap().active.as_ref().unwrap().path,
        "/healthz"
    );

    let prefixes: Vec<_> = service.routes.iter().map(|r| r.path_prefix.as_str()).collect();
    assert_eq!(prefixes, ["/orders", "/orders/v2", "/orders/admin"]);

    let first = &service.routes[0];
    let headers = first.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Request-Id"], TemplateValue::Uuid);
    assert_eq!(headers.request_add["X-Started"], TemplateValue::Timestamp);
    assert_eq!(first.mirroring.as_ref().unwrap().targets[0].name, "shadow");
    assert_eq!(first.mirroring.as_ref().unwrap().targets[0].weight, 10);
    assert_eq!(first.retry, config.services[0].routes[0].retry);
    assert_eq!(first.rate_limit.as_ref().unwrap().burst, 20);

    let split = service.routes[1].traffic_split.as_ref().unwrap();
    let names: Vec<_> = split.targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["stable", "canary"]);

    assert_eq!(
        service.routes[2].authentication,
        config.services[0].routes[2].authentication
    );
    assert!(matches!(
        first.authentication,
        Some(Authentication::Basic { ref users }) if users[0].username == "alice"
    ));
}

#[test]
fn imports_hand_written_bootstrap() {
    let native = r#"
admin:
  address: { socket_address: { address: 127.0.0.1, port_value: 9901 } }
static_resources:
  listeners:
    - name: main
      filter_chains:
        - filters:
            - name: envoy.filters.network.http_connection_manager
              typed_config:
                "@type": type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager
                route_config:
                  virtual_hosts:
                    - name: all
                      domains: ["*"]
                      routes:
                        - match: { prefix: /catalog, headers: [{ name: ":method", string_match: { exact: GET } }] }
                          route: { cluster: catalog, timeout: 15s }
                          request_headers_to_add:
                            - header: { key: X-Discount, value: "10%%" }
                        - match: { safe_regex: { regex: "^/legacy/.*" } }
                          route: { cluster: catalog }
                http_filters:
                  - name: envoy.filters.http.gzip
                  - name: envoy.filters.http.router
  clusters:
    - name: catalog
      lb_policy: LEAST_REQUEST
      transport_socket: { name: envoy.transport_sockets.tls }
      load_assignment:
        cluster_name: catalog
        endpoints:
          - lb_endpoints:
              - endpoint: { address: { socket_address: { address: catalog-a, port_value: 443 } } }
              - endpoint: { address: { socket_address: { address: catalog-b, port_value: 443 } } }
                health_status: DRAINING
    - name: orphan
      load_assignment: { cluster_name: orphan, endpoints: [] }
"#;
    let imported = EnvoyImporter.import(native).unwrap();
    let config = &imported.output;
    let service = &config.services[0];
    assert_eq!(service.name, "catalog");
    assert_eq!(service.transport_protocol, TransportProtocol::Https);
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::LeastConn));
    assert_eq!(service.upstream.targets[1].weight, 0);
    assert_eq!(service.routes.len(), 1);

    let route = &service.routes[0];
    assert_eq!(route.methods.as_ref().unwrap().len(), 1);
    assert_eq!(
        route.headers.as_ref().unwrap().request_add["X-Discount"],
        TemplateValue::literal("10%")
    );
    assert_eq!(
        route.timeout.as_ref().unwrap().read,
        Some(std::time::Duration::from_secs(15))
    );

    let diags = &imported.diagnostics;
    assert!(diags.mentions("http_filters.envoy.filters.http.gzip", Severity::Warning));
    assert!(diags.mentions("route.match", Severity::Warning));
    assert!(diags.mentions("cluster", Severity::Warning));
    assert!(config.global_config["envoy"].get("admin").is_some());
}

#[test]
fn document_without_static_resources_is_rejected() {
    assert!(EnvoyImporter.import("admin: {}\n").is_err());
    assert!(EnvoyImporter.import("").is_err());
}

#[tokio::test]
async fn grpc_transformation_round_trips_through_lua_filter() {
    let dir = TempDir::new().unwrap();
    let config = load(GRPC);
    let out = EnvoyExporter::new(scripting(&dir)).export(&config).await.unwrap();
    assert!(!out.diagnostics.has_errors());
    let text = &out.output;
    assert!(text.contains("envoy.filters.http.lua"));
    assert!(text.contains("http2_protocol_options"));
    assert!(text.contains("grpc: {}"));

    let back = EnvoyImporter.import(text).unwrap();
    let service = &back.output.services[0];
    assert_eq!(service.kind, ServiceKind::Grpc);
    assert_eq!(service.transport_protocol, TransportProtocol::Http2);
    assert_eq!(
        service.routes[0].grpc_transformation,
        config.services[0].routes[0].grpc_transformation
    );
    assert_eq!(back.output.proto_descriptors.len(), 1);
}
