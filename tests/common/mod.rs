//! Shared documents and test doubles for the integration tests.
#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use gatemorph::{
    adapters::{GrpcScripting, ProtoFailurePolicy},
    config::{GatewayConfig, parse_canonical},
    core::{AdapterRegistry, ProtoDescriptorManager, Translator},
    ports::{
        DescriptorCompiler, ProtoError, ProtoFetcher, descriptor_compiler::ProtoResult,
    },
};
use prost::Message;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    field_descriptor_proto::{Label, Type},
};

/// One weighted REST service with a per-client rate limit.
pub const WEIGHTED_RATE_LIMITED: &str = r#"
schemaVersion: "1.0"
services:
  - name: api
    kind: rest
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

/// Exercises most optional features at once.
pub const EVERYTHING: &str = r#"
schemaVersion: "1.0"
services:
  - name: orders
    upstream:
      targets:
        - { host: orders-a, port: 9000, weight: 100 }
        - { host: orders-b, port: 9000, weight: 200 }
      loadBalancer: { algorithm: least_conn }
      healthCheck:
        active: { path: /healthz, interval: 5s, timeout: 1s, healthyThreshold: 2, unhealthyThreshold: 3 }
        passive: { maxFailures: 5, unhealthyStatusCodes: [502, 503] }
      circuitBreaker: { maxFailures: 5, window: 30s, unhealthyStatusCodes: [500, 502] }
    routes:
      - pathPrefix: /orders
        methods: [GET, POST]
        authentication: { type: basic, users: [{ username: alice, password: secret }] }
        rateLimit: { requestsPerSecond: 10, burst: 20, keyType: header, keyHeader: X-Api-Key }
        cors:
          allowedOrigins: ["https://app.example.com"]
          allowedMethods: [GET]
          maxAgeSeconds: 600
        headers:
          requestAdd: { X-Request-Id: "{{uuid}}", X-Started: "{{timestamp}}" }
          responseAdd: { X-Served-By: gatemorph }
          responseRemove: [Server]
        mirroring:
          targets:
            - { name: shadow, weight: 10, upstream: { host: orders-shadow, port: 9000 } }
        timeout: { connect: 2s, read: 45s, idle: 60s }
        retry: { attempts: 3, backoff: 250ms, retryOn: [5xx] }
      - pathPrefix: /orders/v2
        authentication: { type: apiKey, keyName: X-Api-Key }
        trafficSplit:
          targets:
            - { name: stable, weight: 2, upstream: { host: orders-a, port: 9000 } }
            - { name: canary, weight: 1, upstream: { host: orders-canary, port: 9000 } }
      - pathPrefix: /orders/admin
        authentication: { type: jwt, issuer: "https://auth.example.com", audiences: [orders], jwksUri: "https://keys.example.com/jwks.json" }
"#;

/// A gRPC service whose login route rewrites request and response fields.
pub const GRPC_LOGIN: &str = r#"
schemaVersion: "1.0"
protoDescriptors:
  - name: auth
    source:
      type: inline
      content: |
        syntax = "proto3";
        package auth.v1;
        message LoginRequest { string username = 1; string password = 2; string trace_id = 3; }
        message LoginResponse { string token = 1; }
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
            addFields: { trace_id: "{{uuid}}" }
          responseTransform:
            filterFields: [token]
"#;

pub fn load(yaml: &str) -> GatewayConfig {
    parse_canonical(yaml).expect("document parses")
}

fn field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::String as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn message(name: &str, fields: &[&str]) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields
            .iter()
            .zip(1..)
            .map(|(name, number)| field(name, number))
            .collect(),
        ..Default::default()
    }
}

/// What `protoc` would produce for the login proto.
pub fn login_descriptor_set() -> Vec<u8> {
    let file = FileDescriptorProto {
        name: Some("auth.proto".to_string()),
        package: Some("auth.v1".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![
            message("LoginRequest", &["username", "password", "trace_id"]),
            message("LoginResponse", &["token"]),
        ],
        ..Default::default()
    };
    FileDescriptorSet { file: vec![file] }.encode_to_vec()
}

/// Compiler double counting invocations.
pub struct CountingCompiler {
    calls: AtomicUsize,
    fail_with: Option<ProtoError>,
}

impl CountingCompiler {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub fn failing(error: ProtoError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(error),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorCompiler for CountingCompiler {
    async fn compile(&self, proto_file: &Path, _include_dirs: &[PathBuf]) -> ProtoResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        assert!(proto_file.exists(), "{} was not written", proto_file.display());
        Ok(login_descriptor_set())
    }
}

pub struct NoNetwork;

#[async_trait]
impl ProtoFetcher for NoNetwork {
    async fn fetch(&self, url: &str, _timeout: Duration) -> ProtoResult<String> {
        Err(ProtoError::Network {
            url: url.to_string(),
            message: "network disabled in tests".to_string(),
        })
    }
}

/// Translator whose Lua-capable exporters share one descriptor manager.
pub fn translator(
    compiler: Arc<CountingCompiler>,
    work_dir: &Path,
    policy: ProtoFailurePolicy,
) -> Translator {
    let manager = ProtoDescriptorManager::new(compiler, Arc::new(NoNetwork), work_dir);
    let scripting = GrpcScripting::new(Arc::new(manager), policy);
    Translator::new(Arc::new(AdapterRegistry::with_defaults(scripting)))
}

/// Every string scalar in a YAML or JSON document, depth first.
pub fn strings(value: &serde_yaml::Value, out: &mut Vec<String>) {
    match value {
        serde_yaml::Value::String(s) => out.push(s.clone()),
        serde_yaml::Value::Sequence(items) => items.iter().for_each(|v| strings(v, out)),
        serde_yaml::Value::Mapping(map) => map.values().for_each(|v| strings(v, out)),
        serde_yaml::Value::Tagged(tagged) => strings(&tagged.value, out),
        _ => {}
    }
}
