use super::{TraefikExporter, TraefikImporter};
use crate::{
    adapters::fixtures::{FEATURES, GRPC, RATE_LIMITED, REST, load},
    config::models::{Authentication, LoadBalanceAlgorithm},
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn renders_routers_services_and_middlewares() {
    let out = TraefikExporter.export(&load(REST)).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);
    let text = &out.output;
    assert!(text.contains("PathPrefix(`/api`) && (Method(`GET`) || Method(`POST`))"));
    assert!(text.contains("url: http://users-a:8080"));
    assert!(text.contains("weight: 2"));
    assert!(text.contains("accessControlAllowOriginList"));
    assert!(text.contains("customRequestHeaders"));
}

#[tokio::test]
async fn weighted_rate_limited_route_renders_without_warnings() {
    let config = load(RATE_LIMITED);
    let out = TraefikExporter.export(&config).await.unwrap();
    assert_eq!(out.diagnostics.count(Severity::Warning), 0, "{:?}", out.diagnostics);
    assert!(out.output.contains("api-0-ratelimit"));
    assert!(out.output.contains("average: 100"));
    assert!(out.output.contains("burst: 200"));

    let back = TraefikImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
}

#[tokio::test]
async fn rest_document_round_trips() {
    let config = load(REST);
    let out = TraefikExporter.export(&config).await.unwrap();
    let back = TraefikImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services, config.services);
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
}

#[tokio::test]
async fn split_and_mirror_become_nested_services() {
    let config = load(FEATURES);
    let out = TraefikExporter.export(&config).await.unwrap();
    let text = &out.output;
    assert!(text.contains("orders-1-split"));
    assert!(text.contains("orders-0-mirror"));
    assert!(text.contains("percent: 10"));
    assert!(text.contains("orders-circuitbreaker"));
    assert!(text.contains("dialTimeout: 2s"));
    assert!(text.contains("basicAuth"));
    assert!(text.contains("{SHA}"));

    let diags = &out.diagnostics;
    assert!(diags.mentions("route.authentication.apiKey", Severity::Warning));
    assert!(diags.mentions("route.authentication.jwt", Severity::Warning));
    assert!(diags.mentions("route.headers.templates", Severity::Warning));
    assert!(diags.mentions("upstream.healthCheck.passive", Severity::Warning));
    assert!(!text.contains("{{uuid}}"));

    let back = TraefikImporter.import(&out.output).unwrap();
    assert_eq!(back.output.services.len(), 1);
    let service = &back.output.services[0];
    assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
    assert_eq!(service.routes.len(), 3);
    let split = service.routes[1].traffic_split.as_ref().unwrap();
    assert_eq!(split.targets[0].name, "stable");
    assert_eq!(split.targets[1].weight, 1);
    let mirror = service.routes[0].mirroring.as_ref().unwrap();
    assert_eq!(mirror.targets[0].weight, 10);
    assert!(matches!(service.routes[0].authentication, Some(Authentication::Basic { .. })));
    assert!(service.upstream.circuit_breaker.is_some());
}

#[tokio::test]
async fn grpc_transformation_is_reported_as_omitted() {
    let out = TraefikExporter.export(&load(GRPC)).await.unwrap();
    assert!(out.diagnostics.mentions("route.grpcTransformation", Severity::Warning));
    assert!(out.output.contains("h2c://auth-svc:50051"));
}

#[test]
fn foreign_matchers_and_middlewares_warn() {
    let native = r#"
http:
  routers:
    web:
      rule: "Host(`example.com`) && PathPrefix(`/web`)"
      service: web
      middlewares: [compress, strip]
  middlewares:
    strip:
      stripPrefix: { prefixes: [/web] }
  services:
    web:
      loadBalancer:
        servers:
          - url: http://web-a:80
"#;
    let imported = TraefikImporter.import(native).unwrap();
    let route = &imported.output.services[0].routes[0];
    assert_eq!(route.path_prefix, "/web");
    let diags = &imported.diagnostics;
    assert!(diags.mentions("router.rule.Host", Severity::Warning));
    assert!(diags.mentions("router.middlewares", Severity::Warning));
    assert!(diags.mentions("middlewares.stripPrefix", Severity::Warning));
}
