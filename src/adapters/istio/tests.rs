use std::time::Duration;

use super::{IstioExporter, IstioImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load},
    config::models::{
        Authentication, CircuitBreaker, LoadBalanceAlgorithm, ServiceKind, Timeout,
        TransportProtocol,
    },
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn weights_are_normalized_to_percentages() {
    let config = load(RATE_LIMITED);
    let out = IstioExporter.export(&config).await.unwrap();
    let diags = &out.diagnostics;
    assert!(diags.mentions("upstream.targets.weight", Severity::Warning));
    assert!(
        diags
            .iter()
            .any(|d| d.message.contains("weights [2, 1] normalized to [67, 33]")),
        "{diags:?}"
    );
    assert!(diags.mentions("route.rateLimit", Severity::Warning));

    let text = &out.output;
    assert!(text.contains("weight: 67"));
    assert!(text.contains("weight: 33"));
    assert!(text.contains("simple: ROUND_ROBIN"));
    assert!(text.contains("exact: GET"));
    assert!(!text.contains("rateLimit"));

    let back = IstioImporter.import(text).unwrap();
    let weights: Vec<u32> = back.output.services[0]
        .upstream
        .targets
        .iter()
        .map(|t| t.weight)
        .collect();
    assert_eq!(weights, [67, 33]);
    assert_eq!(weights.iter().sum::<u32>(), 100);
}

#[tokio::test]
async fn rest_document_round_trips_with_percent_weights() {
    let config = load(REST);
    let out = IstioExporter.export(&config).await.unwrap();
    assert!(out.output.contains("kind: VirtualService"));
    assert!(out.output.contains("^(GET|POST)$"));
    assert!(out.output.contains("maxAge: 600s"));
    assert!(!out.output.contains("kind: DestinationRule"));

    let back = IstioImporter.import(&out.output).unwrap();
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
    let mut expected = config.services.clone();
    expected[0].upstream.targets[0].weight = 67;
    expected[0].upstream.targets[1].weight = 33;
    assert_eq!(back.output.services, expected);
}

#[tokio::test]
async fn renders_destination_rules_and_jwt_resources() {
    let config = load(FEATURES);
    let out = IstioExporter.export(&config).await.unwrap();
    let diags = &out.diagnostics;
    assert!(diags.mentions("upstream.healthCheck.active", Severity::Warning));
    assert!(diags.mentions("route.authentication.basic", Severity::Warning));
    assert!(diags.mentions("route.authentication.apiKey", Severity::Warning));
    assert!(diags.mentions("route.headers.templates", Severity::Warning));
    assert!(diags.mentions("route.trafficSplit", Severity::Warning));

    let text = &out.output;
    assert!(text.contains("kind: DestinationRule"));
    assert!(text.contains("host: orders-a"));
    assert!(text.contains("host: orders-b"));
    assert!(text.contains("consecutive5xxErrors: 5"));
    assert!(text.contains("baseEjectionTime: 30s"));
    assert!(text.contains("connectTimeout: 2s"));
    assert!(text.contains("idleTimeout: 60s"));
    assert!(text.contains("timeout: 10s"));
    assert!(text.contains("retryOn: 5xx"));
    assert!(text.contains("host: orders-shadow"));
    assert!(text.contains("value: 10.0"));
    assert!(text.contains("kind: RequestAuthentication"));
    assert!(text.contains("name: orders-2-jwt"));
    assert!(text.contains("jwksUri: https://auth.example.com/.well-known/jwks.json"));
    assert!(text.contains("notRequestPrincipals"));
    assert!(!text.contains("X-Request-Id"));

    // longest prefix first
    let admin = text.find("prefix: /orders/admin").unwrap();
    let plain = text.find("prefix: /orders\n").unwrap();
    assert!(admin < plain);
}

#[tokio::test]
async fn split_weights_closed_to_100_are_warned() {
    let config = load(FEATURES);
    let out = IstioExporter.export(&config).await.unwrap();
    let split = out
        .diagnostics
        .iter()
        .find(|d| d.feature_path == "route.trafficSplit")
        .expect("split normalization is reported");
    assert_eq!(split.severity, Severity::Warning);
    assert!(split.message.contains("weights [2, 1] normalized to [67, 33]"), "{split:?}");
    assert!(out.output.contains("host: orders-canary"));

    let mut exact = config.clone();
    let targets = &mut exact.services[0].routes[1].traffic_split.as_mut().unwrap().targets;
    targets[0].weight = 90;
    targets[1].weight = 10;
    let out = IstioExporter.export(&exact).await.unwrap();
    assert!(!out.diagnostics.mentions("route.trafficSplit", Severity::Info));
    assert!(out.output.contains("weight: 90"));
}

#[tokio::test]
async fn imports_features_back() {
    let config = load(FEATURES);
    let out = IstioExporter.export(&config).await.unwrap();
    let back = IstioImporter.import(&out.output).unwrap();
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);

    let service = &back.output.services[0];
    assert_eq!(back.output.services.len(), 1);
    let weights: Vec<u32> = service.upstream.targets.iter().map(|t| t.weight).collect();
    assert_eq!(weights, [33, 67]);
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    assert_eq!(
        service.upstream.circuit_breaker,
        Some(CircuitBreaker {
            max_failures: 5,
            window: Duration::from_secs(30),
            unhealthy_status_codes: Vec::new(),
        })
    );

    let prefixes: Vec<_> = service.routes.iter().map(|r| r.path_prefix.as_str()).collect();
    assert_eq!(prefixes, ["/orders", "/orders/v2", "/orders/admin"]);

    let first = &service.routes[0];
    assert_eq!(
        first.timeout,
        Some(Timeout {
            connect: Some(Duration::from_secs(2)),
            read: Some(Duration::from_secs(10)),
            idle: Some(Duration::from_secs(60)),
        })
    );
    assert_eq!(first.retry.as_ref().unwrap().attempts, 3);
    assert_eq!(first.retry.as_ref().unwrap().retry_on, ["5xx"]);
    let mirror = &first.mirroring.as_ref().unwrap().targets[0];
    assert_eq!((mirror.upstream.host.as_str(), mirror.weight), ("orders-shadow", 10));
    assert_eq!(first.headers.as_ref().unwrap().response_remove, ["Server"]);
    assert!(first.authentication.is_none());

    let split = service.routes[1].traffic_split.as_ref().unwrap();
    let shares: Vec<_> = split
        .targets
        .iter()
        .map(|t| (t.upstream.host.as_str(), t.weight))
        .collect();
    assert_eq!(shares, [("orders-a", 67), ("orders-canary", 33)]);
    assert!(service.routes[1].timeout.is_none());

    assert_eq!(
        service.routes[2].authentication,
        config.services[0].routes[2].authentication
    );
}

#[tokio::test]
async fn grpc_services_keep_their_kind() {
    let config = load(GRPC);
    let out = IstioExporter.export(&config).await.unwrap();
    assert!(out.diagnostics.mentions("route.grpcTransformation", Severity::Warning));
    assert!(out.output.contains("gatemorph.io/service-kind: grpc"));
    assert!(out.output.contains("h2UpgradePolicy: UPGRADE"));

    let back = IstioImporter.import(&out.output).unwrap();
    let service = &back.output.services[0];
    assert_eq!(service.kind, ServiceKind::Grpc);
    assert_eq!(service.transport_protocol, TransportProtocol::Http2);
    assert!(service.routes[0].grpc_transformation.is_none());
}

#[test]
fn imports_hand_written_resources() {
    let native = r#"
apiVersion: networking.istio.io/v1
kind: Gateway
metadata: { name: public }
spec: { selector: { istio: ingressgateway } }
---
apiVersion: networking.istio.io/v1
kind: VirtualService
metadata: { name: reviews }
spec:
  hosts: [reviews.example.com]
  gateways: [public]
  http:
    - match: [{ uri: { prefix: /reviews }, headers: { x-canary: { exact: "1" } } }]
      route:
        - destination: { host: reviews-v2, port: { number: 9080 } }
      fault: { delay: { fixedDelay: 5s } }
    - match: [{ uri: { regex: "^/legacy/.*" } }]
      route: [{ destination: { host: reviews-v1 } }]
    - route:
        - destination: { host: reviews-v1, port: { number: 9080 } }
          weight: 90
        - destination: { host: reviews-v2, port: { number: 9080 } }
          weight: 10
      retries: { attempts: 2, perTryTimeout: 2s }
---
apiVersion: networking.istio.io/v1
kind: DestinationRule
metadata: { name: reviews }
spec:
  host: reviews-v2
  trafficPolicy:
    loadBalancer: { simple: LEAST_REQUEST }
    tls: { mode: ISTIO_MUTUAL }
---
apiVersion: security.istio.io/v1
kind: RequestAuthentication
metadata: { name: reviews-auth }
spec:
  selector: { matchLabels: { app: reviews } }
  jwtRules:
    - issuer: https://issuer.example.com
      jwksUri: https://issuer.example.com/jwks
"#;
    let imported = IstioImporter.import(native).unwrap();
    let config = &imported.output;
    let service = &config.services[0];
    assert_eq!(service.name, "reviews");
    assert_eq!(service.upstream.targets.len(), 1);
    assert_eq!(service.upstream.targets[0].host, "reviews-v2");
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::LeastConn));
    assert_eq!(service.transport_protocol, TransportProtocol::Http);

    let prefixes: Vec<_> = service.routes.iter().map(|r| r.path_prefix.as_str()).collect();
    assert_eq!(prefixes, ["/reviews", "/"]);
    let split = service.routes[1].traffic_split.as_ref().unwrap();
    let weights: Vec<u32> = split.targets.iter().map(|t| t.weight).collect();
    assert_eq!(weights, [90, 10]);
    assert_eq!(service.routes[1].retry.as_ref().unwrap().attempts, 2);
    for route in &service.routes {
        assert!(matches!(route.authentication, Some(Authentication::Jwt { .. })));
    }

    let diags = &imported.diagnostics;
    assert!(diags.mentions("http.match.headers", Severity::Warning));
    assert!(diags.mentions("http.fault", Severity::Warning));
    assert!(diags.mentions("http.match.uri", Severity::Warning));
    assert!(diags.mentions("http.retries.perTryTimeout", Severity::Warning));
    assert!(diags.mentions("trafficPolicy.tls.mode", Severity::Warning));
    assert!(diags.mentions("route.authentication.jwt", Severity::Info));
    assert_eq!(config.global_config["istio"].as_array().unwrap().len(), 1);
}

#[test]
fn streams_without_virtual_services_are_rejected() {
    assert!(IstioImporter.import("").is_err());
    assert!(IstioImporter.import("kind: Gateway\nmetadata: { name: public }\n").is_err());
}

#[tokio::test]
async fn global_resources_are_appended() {
    let mut config = load(REST);
    config.global_config.insert(
        "istio".to_string(),
        serde_json::json!([{
            "apiVersion": "networking.istio.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "public"},
            "spec": {"selector": {"istio": "ingressgateway"}},
        }]),
    );
    let out = IstioExporter.export(&config).await.unwrap();
    assert!(out.output.contains("kind: Gateway"));

    let back = IstioImporter.import(&out.output).unwrap();
    assert_eq!(back.output.global_config["istio"], config.global_config["istio"]);
}
