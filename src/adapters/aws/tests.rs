use std::time::Duration;

use super::{AwsExporter, AwsImporter};
use crate::{
    adapters::fixtures::{FEATURES, RATE_LIMITED, REST, load},
    config::models::{Target, TemplateValue, TransportProtocol},
    core::diagnostics::Severity,
    ports::translator::{Exporter, Importer},
};

#[tokio::test]
async fn rate_limits_become_stage_throttling() {
    let config = load(RATE_LIMITED);
    let out = AwsExporter.export(&config).await.unwrap();
    let diags = &out.diagnostics;
    assert!(diags.mentions("upstream.targets", Severity::Warning));
    assert!(diags.mentions("upstream.loadBalancer.weighted", Severity::Warning));
    assert!(diags.mentions("route.rateLimit.keyType", Severity::Warning));

    let text = &out.output;
    assert!(text.contains("\"AWS::ApiGatewayV2::Api\""));
    assert!(text.contains("\"GET /api/{proxy+}\""));
    assert!(text.contains("\"ThrottlingRateLimit\": 100"));
    assert!(text.contains("\"ThrottlingBurstLimit\": 200"));
    assert!(text.contains("\"uri\": \"http://a:8080/api/{proxy}\""));
    assert!(!text.contains("b:8080"));

    let back = AwsImporter.import(text).unwrap();
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
    let service = &back.output.services[0];
    assert_eq!(service.name, "api");
    assert_eq!(service.upstream.targets, [Target::new("a", 8080, 1)]);
    assert_eq!(service.routes, config.services[0].routes);
}

#[tokio::test]
async fn rest_document_round_trips_through_one_integration() {
    let config = load(REST);
    let out = AwsExporter.export(&config).await.unwrap();
    assert!(out.diagnostics.mentions("route.headers.response", Severity::Warning));
    let text = &out.output;
    assert!(text.contains("\"x-amazon-apigateway-cors\""));
    assert!(text.contains("\"overwrite:header.X-Gateway\": \"gatemorph\""));
    assert!(text.contains("\"remove:header.X-Internal\""));
    assert!(text.contains("\"operationId\": \"users-0-post\""));

    let back = AwsImporter.import(text).unwrap();
    assert_eq!(back.diagnostics.count(Severity::Warning), 0, "{:?}", back.diagnostics);
    let mut expected = config.services.clone();
    expected[0].upstream.targets.truncate(1);
    expected[0].upstream.targets[0].weight = 1;
    assert_eq!(back.output.services, expected);
}

#[tokio::test]
async fn features_keep_templates_jwt_and_timeouts() {
    let config = load(FEATURES);
    let out = AwsExporter.export(&config).await.unwrap();
    let diags = &out.diagnostics;
    for path in [
        "route.mirroring",
        "route.trafficSplit",
        "route.retry",
        "route.authentication.basic",
        "route.authentication.apiKey",
        "upstream.circuitBreaker",
    ] {
        assert!(diags.mentions(path, Severity::Warning), "{path}");
    }
    assert!(!diags.mentions("route.authentication.jwt", Severity::Info));

    let text = &out.output;
    assert!(text.contains("$context.requestId"));
    assert!(text.contains("$context.requestTimeEpoch"));
    assert!(text.contains("\"timeoutInMillis\": 10000"));
    assert!(text.contains("\"orders-2-jwt\""));
    assert!(text.contains("\"x-amazon-apigateway-any-method\""));

    let back = AwsImporter.import(text).unwrap();
    let service = &back.output.services[0];
    let prefixes: Vec<_> = service.routes.iter().map(|r| r.path_prefix.as_str()).collect();
    assert_eq!(prefixes, ["/orders", "/orders/v2", "/orders/admin"]);

    let first = &service.routes[0];
    let headers = first.headers.as_ref().unwrap();
    assert_eq!(headers.request_add["X-Request-Id"], TemplateValue::Uuid);
    assert_eq!(headers.request_add["X-Started"], TemplateValue::Timestamp);
    assert_eq!(headers.response_remove, ["Server"]);
    assert_eq!(first.timeout.as_ref().unwrap().read, Some(Duration::from_secs(10)));
    let limit = first.rate_limit.as_ref().unwrap();
    assert_eq!((limit.requests_per_second, limit.burst), (10, 20));

    assert!(service.routes[1].methods.is_none());
    assert_eq!(
        service.routes[2].authentication,
        config.services[0].routes[2].authentication
    );
}

#[test]
fn imports_a_bare_openapi_document() {
    let native = r#"{
  "openapi": "3.0.1",
  "info": { "title": "pets", "version": "1" },
  "paths": {
    "/pets": {
      "get": {
        "operationId": "listPets",
        "x-amazon-apigateway-integration": {
          "type": "http_proxy",
          "httpMethod": "GET",
          "uri": "https://petstore.example.com/pets",
          "timeoutInMillis": 5000
        }
      },
      "post": {
        "x-amazon-apigateway-integration": {
          "type": "aws_proxy",
          "uri": "arn:aws:lambda:us-east-1:123456789012:function:create-pet"
        }
      }
    },
    "/pets/{id}": {
      "parameters": [{ "name": "id", "in": "path", "required": true }],
      "get": {
        "operationId": "getPet",
        "x-amazon-apigateway-request-validator": "all",
        "x-amazon-apigateway-integration": {
          "type": "http_proxy",
          "uri": "https://petstore.example.com/pets/{id}",
          "requestParameters": { "overwrite:querystring.source": "gateway" }
        }
      }
    }
  }
}"#;
    let imported = AwsImporter.import(native).unwrap();
    let config = &imported.output;
    assert_eq!(config.services.len(), 1);
    let service = &config.services[0];
    assert_eq!(service.name, "petstore-example-com");
    assert_eq!(service.transport_protocol, TransportProtocol::Https);
    assert_eq!(service.upstream.targets, [Target::new("petstore.example.com", 443, 1)]);
    let prefixes: Vec<_> = service.routes.iter().map(|r| r.path_prefix.as_str()).collect();
    assert_eq!(prefixes, ["/pets", "/pets/{id}"]);
    assert_eq!(
        service.routes[0].timeout.as_ref().unwrap().read,
        Some(Duration::from_secs(5))
    );

    let diags = &imported.diagnostics;
    assert!(diags.mentions("paths.integration", Severity::Warning));
    assert!(diags.mentions("paths", Severity::Warning));
    assert!(diags.mentions("integration.requestParameters", Severity::Warning));
    assert!(diags.mentions("operation.x-amazon-apigateway-request-validator", Severity::Warning));
}

#[tokio::test]
async fn extra_resources_pass_through() {
    let mut config = load(REST);
    let extra = serde_json::json!({
        "Resources": {"AccessLogs": {"Type": "AWS::Logs::LogGroup", "Properties": {"RetentionInDays": 7}}},
    });
    config
        .global_config
        .insert("aws-apigateway".to_string(), extra.clone());
    let out = AwsExporter.export(&config).await.unwrap();
    assert!(out.output.contains("AWS::Logs::LogGroup"));

    let back = AwsImporter.import(&out.output).unwrap();
    assert_eq!(back.output.global_config["aws-apigateway"], extra);
}

#[test]
fn templates_without_an_api_are_rejected() {
    assert!(AwsImporter.import("").is_err());
    assert!(AwsImporter.import("{\"Resources\": {}}").is_err());
}
