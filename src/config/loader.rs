use std::path::Path;

use eyre::{Result, WrapErr};

use crate::{
    config::models::{CURRENT_SCHEMA_VERSION, GatewayConfig},
    ports::translator::{TranslateError, TranslateResult},
};

const CANONICAL: &str = "canonical";

/// Parse a canonical document. YAML and JSON are both accepted.
pub fn parse_canonical(text: &str) -> TranslateResult<GatewayConfig> {
    let parse_error = |message: String| TranslateError::Parse {
        provider: CANONICAL.to_string(),
        message,
    };
    if text.trim().is_empty() {
        return Err(parse_error("document is empty".to_string()));
    }
    let config: GatewayConfig =
        serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?;
    if config.schema_version != CURRENT_SCHEMA_VERSION {
        tracing::warn!(
            schema_version = %config.schema_version,
            supported = CURRENT_SCHEMA_VERSION,
            "canonical document declares an unknown schema version"
        );
    }
    Ok(config)
}

/// Render a canonical document as YAML.
pub fn render_canonical(config: &GatewayConfig) -> TranslateResult<String> {
    serde_yaml::to_string(config).map_err(|e| TranslateError::Render {
        provider: CANONICAL.to_string(),
        message: e.to_string(),
    })
}

/// Read and parse a canonical document from disk.
pub async fn load_config(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let config = parse_canonical(&text)
        .wrap_err_with(|| format!("Failed to parse canonical document {}", path.display()))?;
    tracing::debug!(path = %path.display(), services = config.services.len(), "canonical document loaded");
    Ok(config)
}

/// Write a canonical document to disk.
pub async fn save_config(path: impl AsRef<Path>, config: &GatewayConfig) -> Result<()> {
    let path = path.as_ref();
    let text = render_canonical(config)?;
    tokio::fs::write(path, text)
        .await
        .wrap_err_with(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::LoadBalanceAlgorithm;

    const DOCUMENT: &str = r#"
schemaVersion: "1.0"
provider: kong
services:
  - name: api
    upstream:
      targets:
        - { host: a, port: 8080, weight: 2 }
        - { host: b, port: 8080 }
      loadBalancer: { algorithm: weighted }
    routes:
      - pathPrefix: /api
        methods: [GET]
        timeout: { read: 1m }
"#;

    #[tokio::test]
    async fn test_load_yaml_config() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{DOCUMENT}").unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.provider_hint.as_deref(), Some("kong"));
        let service = &config.services[0];
        assert_eq!(service.upstream.targets[1].weight, 1);
        assert_eq!(service.upstream.algorithm(), Some(LoadBalanceAlgorithm::Weighted));
        assert_eq!(
            service.routes[0].timeout.as_ref().unwrap().read,
            Some(std::time::Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json = r#"{
  "schemaVersion": "1.0",
  "services": [
    {
      "name": "api",
      "upstream": { "targets": [{ "host": "a", "port": 8080 }] },
      "routes": [{ "pathPrefix": "/" }]
    }
  ]
}"#;
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, "{json}").unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.services[0].routes[0].path_prefix, "/");
    }

    #[tokio::test]
    async fn saved_documents_load_back() {
        let config = parse_canonical(DOCUMENT).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        save_config(&path, &config).await.unwrap();
        assert_eq!(load_config(&path).await.unwrap(), config);
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(matches!(parse_canonical("  \n"), Err(TranslateError::Parse { .. })));
        assert!(parse_canonical("services: 3").is_err());
    }

    #[tokio::test]
    async fn missing_files_carry_context() {
        let err = load_config("/nonexistent/gateway.yaml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gateway.yaml"));
    }
}
