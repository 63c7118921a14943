mod common;

use std::sync::Arc;

use common::{CountingCompiler, GRPC_LOGIN, load, strings, translator};
use gatemorph::{
    adapters::ProtoFailurePolicy,
    core::{Mode, ProviderId, Severity},
    ports::{ProtoError, TranslateError},
};
use tempfile::TempDir;

fn scripts(output: &str) -> Vec<String> {
    let mut found = Vec::new();
    for document in serde_yaml::Deserializer::from_str(output) {
        let value: serde_yaml::Value = serde::Deserialize::deserialize(document).unwrap();
        strings(&value, &mut found);
    }
    found.retain(|s| s.contains("pb.decode"));
    found
}

#[tokio::test]
async fn kong_script_removes_password_and_generates_trace_ids_at_runtime() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(CountingCompiler::new());
    let translator = translator(compiler.clone(), dir.path(), ProtoFailurePolicy::Degrade);

    let outcome = translator
        .translate(Mode::Generate, ProviderId::Kong, GRPC_LOGIN)
        .await
        .unwrap();
    assert!(
        !outcome.diagnostics.mentions("route.grpcTransformation", Severity::Warning),
        "{:?}",
        outcome.diagnostics
    );
    let scripts = scripts(&outcome.output);
    let request = scripts
        .iter()
        .find(|s| s.contains("msg[\"password\"] = nil"))
        .expect("request script");
    assert!(request.contains("msg[\"trace_id\"] = tostring(require(\"kong.tools.uuid\").uuid())"));
    assert!(!request.contains("msg[\"trace_id\"] = \"{{uuid}}\""));
    assert_eq!(compiler.calls(), 1);
}

#[tokio::test]
async fn envoy_script_reads_the_request_id_per_request() {
    let dir = TempDir::new().unwrap();
    let translator = translator(Arc::new(CountingCompiler::new()), dir.path(), ProtoFailurePolicy::Degrade);
    let outcome = translator
        .translate(Mode::Generate, ProviderId::Envoy, GRPC_LOGIN)
        .await
        .unwrap();
    let scripts = scripts(&outcome.output);
    let script = scripts
        .iter()
        .find(|s| s.contains("function envoy_on_request(handle)"))
        .expect("lua filter");
    assert!(script.contains("function envoy_on_response(handle)"));
    assert!(script.contains("msg[\"password\"] = nil"));
    assert!(script.contains("handle:headers():get(\"x-request-id\")"));
}

#[tokio::test]
async fn concurrent_exports_compile_the_descriptor_once() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(CountingCompiler::new());
    let translator = translator(compiler.clone(), dir.path(), ProtoFailurePolicy::Degrade);
    let config = Arc::new(load(GRPC_LOGIN));

    let lua_hosts = [ProviderId::Nginx, ProviderId::Envoy, ProviderId::Kong, ProviderId::Apisix];
    let results = translator.generate_all(config, &lua_hosts).await;
    for (provider, outcome) in results {
        let outcome = outcome.unwrap();
        assert!(outcome.output.contains("pb.decode"), "{provider}");
    }
    assert_eq!(compiler.calls(), 1);
}

#[tokio::test]
async fn compiler_failures_degrade_the_route() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(CountingCompiler::failing(ProtoError::ExternalTool(
        "protoc not found".to_string(),
    )));
    let translator = translator(compiler, dir.path(), ProtoFailurePolicy::Degrade);
    let outcome = translator
        .translate(Mode::Generate, ProviderId::Apisix, GRPC_LOGIN)
        .await
        .unwrap();
    assert!(outcome.diagnostics.iter().any(|d| d.severity == Severity::Warning
        && d.feature_path == "route.grpcTransformation"
        && d.message.contains("protoc not found")));
    assert!(!outcome.output.contains("pb.decode"));
    assert!(outcome.output.contains("/auth.v1.AuthService/Login"));
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn abort_policy_fails_the_export() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(CountingCompiler::failing(ProtoError::Parse("syntax error".to_string())));
    let translator = translator(compiler, dir.path(), ProtoFailurePolicy::Abort);
    let err = translator
        .translate(Mode::Generate, ProviderId::Kong, GRPC_LOGIN)
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::Proto(ProtoError::Parse(_))));
}

#[tokio::test]
async fn dangling_descriptor_references_fail_hard() {
    let dir = TempDir::new().unwrap();
    let translator = translator(Arc::new(CountingCompiler::new()), dir.path(), ProtoFailurePolicy::Degrade);
    let dangling = GRPC_LOGIN.replace("protoDescriptorRef: auth", "protoDescriptorRef: billing");
    let err = translator
        .translate(Mode::Generate, ProviderId::Envoy, &dangling)
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::MissingReference { ref name, .. } if name == "billing"));
}

#[tokio::test]
async fn transformations_survive_a_kong_round_trip() {
    let dir = TempDir::new().unwrap();
    let translator = translator(Arc::new(CountingCompiler::new()), dir.path(), ProtoFailurePolicy::Degrade);
    let config = load(GRPC_LOGIN);
    let exported = translator.generate(ProviderId::Kong, &config).await.unwrap();
    let back = translator.import(ProviderId::Kong, &exported.output).unwrap();
    assert_eq!(
        back.output.services[0].routes[0].grpc_transformation,
        config.services[0].routes[0].grpc_transformation
    );
    assert_eq!(back.output.proto_descriptors[0].name, "auth");
}
