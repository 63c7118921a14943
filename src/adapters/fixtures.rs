//! Canonical documents shared by the adapter tests.
use std::sync::Arc;

use tempfile::TempDir;

use crate::{
    adapters::lua::{GrpcScripting, ProtoFailurePolicy},
    config::models::GatewayConfig,
    core::proto_manager::test_support::{CountingCompiler, StaticFetcher, manager},
};

pub const REST: &str = r#"
schemaVersion: "1.0"
services:
  - name: users
    upstream:
      targets:
        - { host: users-a, port: 8080, weight: 2 }
        - { host: users-b, port: 8080, weight: 1 }
    routes:
      - pathPrefix: /api
        methods: [GET, POST]
        cors:
          allowedOrigins: ["https://app.example.com"]
          allowedMethods: [GET, POST]
          allowedHeaders: [Authorization]
          allowCredentials: true
          maxAgeSeconds: 600
        headers:
          requestAdd: { X-Gateway: gatemorph }
          requestRemove: [X-Internal]
          responseAdd: { X-Served-By: gatemorph }
"#;

/// Weighted upstream plus a per-client rate limit with headroom for bursts.
pub const RATE_LIMITED: &str = r#"
schemaVersion: "1.0"
services:
  - name: api
    upstream:
      targets:
        - { host: a, port: 8080, weight: 2 }
        - { host: b, port: 8080, weight: 1 }
      loadBalancer: { algorithm: weighted }
    routes:
      - pathPrefix: /api
        methods: [GET]
        rateLimit: { requestsPerSecond: 100, burst: 200, keyType: ipAddress }
"#;

pub const FEATURES: &str = r#"
schemaVersion: "1.0"
services:
  - name: orders
    transportProtocol: http
    upstream:
      targets:
        - { host: orders-a, port: 9000, weight: 100 }
        - { host: orders-b, port: 9000, weight: 200 }
      loadBalancer: { algorithm: weighted }
      healthCheck:
        active: { path: /healthz, interval: 5s, timeout: 1s, healthyThreshold: 2, unhealthyThreshold: 3 }
        passive: { maxFailures: 5, unhealthyStatusCodes: [502, 503] }
      circuitBreaker: { maxFailures: 5, window: 30s, unhealthyStatusCodes: [500, 502] }
    routes:
      - pathPrefix: /orders
        methods: [GET]
        authentication: { type: basic, users: [{ username: alice, password: secret }] }
        rateLimit: { requestsPerSecond: 10, burst: 20, keyType: header, keyHeader: X-Api-Key }
        headers:
          requestAdd: { X-Request-Id: "{{uuid}}", X-Started: "{{timestamp}}" }
          responseRemove: [Server]
        mirroring:
          targets:
            - { name: shadow, weight: 10, upstream: { host: orders-shadow, port: 9000 } }
        timeout: { connect: 2s, read: 10s, idle: 60s }
        retry: { attempts: 3, backoff: 250ms, retryOn: [5xx] }
      - pathPrefix: /orders/v2
        authentication: { type: apiKey, keyName: X-Api-Key }
        trafficSplit:
          targets:
            - { name: stable, weight: 2, upstream: { host: orders-a, port: 9000 } }
            - { name: canary, weight: 1, upstream: { host: orders-canary, port: 9000 } }
      - pathPrefix: /orders/admin
        authentication: { type: jwt, issuer: "https://auth.example.com", audiences: [orders], jwksUri: "https://auth.example.com/.well-known/jwks.json" }
"#;

pub const GRPC: &str = r#"
schemaVersion: "1.0"
protoDescriptors:
  - name: auth
    source:
      type: inline
      content: |
        syntax = "proto3";
        package auth.v1;
services:
  - name: auth
    kind: grpc
    transportProtocol: http2
    upstream:
      targets:
        - { host: auth-svc, port: 50051 }
    routes:
      - pathPrefix: /auth.v1.AuthService/Login
        grpcTransformation:
          protoDescriptorRef: auth
          package: auth.v1
          service: AuthService
          requestType: LoginRequest
          responseType: LoginResponse
          requestTransform:
            removeFields: [password]
            renameFields: { client: client_name }
            addFields: { trace_id: "{{uuid}}" }
          responseTransform:
            filterFields: [token, user_id]
"#;

pub fn load(yaml: &str) -> GatewayConfig {
    serde_yaml::from_str(yaml).expect("fixture parses")
}

/// Scripting backed by the in-memory compiler double.
pub fn scripting(dir: &TempDir) -> GrpcScripting {
    let manager = manager(
        Arc::new(CountingCompiler::new()),
        Arc::new(StaticFetcher::unreachable()),
        dir.path(),
    );
    GrpcScripting::new(Arc::new(manager), ProtoFailurePolicy::Degrade)
}
