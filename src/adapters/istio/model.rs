//! Istio networking and security resources, handled as multi-document YAML.
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    core::provider::ProviderId,
    ports::translator::{TranslateError, TranslateResult},
};

pub const NETWORKING_API: &str = "networking.istio.io/v1";
pub const SECURITY_API: &str = "security.istio.io/v1";

pub const VIRTUAL_SERVICE: &str = "VirtualService";
pub const DESTINATION_RULE: &str = "DestinationRule";
pub const REQUEST_AUTHENTICATION: &str = "RequestAuthentication";
pub const AUTHORIZATION_POLICY: &str = "AuthorizationPolicy";

/// Workload label the security resources select on.
pub const APP_LABEL: &str = "app";
/// Marks virtual services whose backends speak gRPC.
pub const KIND_LABEL: &str = "gatemorph.io/service-kind";

pub const JWT_SUFFIX: &str = "-jwt";
pub const REQUIRE_JWT_SUFFIX: &str = "-require-jwt";

pub fn resource(api_version: &str, kind: &str, name: &str, spec: Value) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {"name": name},
        "spec": spec,
    })
}

pub fn kind(document: &Value) -> Option<&str> {
    document.get("kind").and_then(Value::as_str)
}

pub fn name(document: &Value) -> Option<&str> {
    document.pointer("/metadata/name").and_then(Value::as_str)
}

/// Split a `---` separated stream into documents, skipping empty ones.
pub fn parse_documents(text: &str) -> TranslateResult<Vec<Value>> {
    if text.trim().is_empty() {
        return Err(TranslateError::parse(ProviderId::Istio, "document is empty"));
    }
    let mut documents = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document).map_err(|e| {
            TranslateError::parse(ProviderId::Istio, format!("document {}: {e}", index + 1))
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

pub fn render_documents(documents: &[Value]) -> TranslateResult<String> {
    let mut out = String::new();
    for document in documents {
        let text = serde_yaml::to_string(document)
            .map_err(|e| TranslateError::render(ProviderId::Istio, e.to_string()))?;
        out.push_str("---\n");
        out.push_str(&text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_document_streams() {
        let text = "---\nkind: VirtualService\nmetadata: {name: a}\n---\n---\nkind: DestinationRule\n";
        let documents = parse_documents(text).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(kind(&documents[0]), Some(VIRTUAL_SERVICE));
        assert_eq!(name(&documents[0]), Some("a"));
        assert_eq!(kind(&documents[1]), Some(DESTINATION_RULE));
    }

    #[test]
    fn rendered_streams_parse_back() {
        let documents = vec![
            resource(NETWORKING_API, VIRTUAL_SERVICE, "users", json!({"hosts": ["users"]})),
            resource(NETWORKING_API, DESTINATION_RULE, "users", json!({"host": "users-a"})),
        ];
        let text = render_documents(&documents).unwrap();
        assert_eq!(parse_documents(&text).unwrap(), documents);
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        assert!(parse_documents("").is_err());
        assert!(parse_documents("kind: [unclosed").is_err());
    }
}
