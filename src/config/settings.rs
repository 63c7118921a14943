//! Runtime settings of the translator, separate from the canonical documents
//! it translates.
use std::{path::PathBuf, sync::Arc, time::Duration};

use config::{Config, Environment, File};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::{
    adapters::{GrpcScripting, HttpProtoFetcher, ProtoFailurePolicy, ProtocCompiler},
    core::{
        proto_manager::{DEFAULT_FETCH_TIMEOUT, ProtoDescriptorManager},
        registry::AdapterRegistry,
    },
};

pub const ENV_PREFIX: &str = "GATEMORPH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Explicit `protoc` binary; otherwise `PROTOC` or the `PATH` is used
    pub protoc: Option<PathBuf>,
    /// Where inline and fetched protos and compiled sets are written
    pub proto_work_dir: Option<PathBuf>,
    /// Bound on remote proto fetches, e.g. "30s"
    pub fetch_timeout: String,
    pub proto_failure_policy: ProtoFailurePolicy,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protoc: None,
            proto_work_dir: None,
            fetch_timeout: humantime::format_duration(DEFAULT_FETCH_TIMEOUT).to_string(),
            proto_failure_policy: ProtoFailurePolicy::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Load settings from an optional file (any format the `config` crate
    /// recognizes by extension) overlaid with `GATEMORPH_*` variables.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .wrap_err("Failed to build settings")?
            .try_deserialize()
            .wrap_err("Failed to deserialize settings")?;
        settings.fetch_timeout()?;
        Ok(settings)
    }

    pub fn fetch_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(self.fetch_timeout.trim())
            .wrap_err_with(|| format!("Invalid fetch_timeout '{}'", self.fetch_timeout))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.proto_work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("gatemorph-protos"))
    }

    /// Descriptor manager wired to `protoc` and the HTTP fetcher.
    pub fn proto_manager(&self) -> Result<ProtoDescriptorManager> {
        let compiler = match &self.protoc {
            Some(binary) => ProtocCompiler::with_binary(binary),
            None => ProtocCompiler::new(),
        };
        let manager = ProtoDescriptorManager::new(
            Arc::new(compiler),
            Arc::new(HttpProtoFetcher::new()),
            self.work_dir(),
        )
        .with_fetch_timeout(self.fetch_timeout()?);
        Ok(manager)
    }

    /// Registry with every dialect, sharing one descriptor cache.
    pub fn registry(&self) -> Result<AdapterRegistry> {
        let scripting =
            GrpcScripting::new(Arc::new(self.proto_manager()?), self.proto_failure_policy);
        Ok(AdapterRegistry::with_defaults(scripting))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.fetch_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(settings.proto_failure_policy, ProtoFailurePolicy::Degrade);
        assert!(settings.work_dir().ends_with("gatemorph-protos"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            file,
            "fetch_timeout = \"5s\"\nproto_failure_policy = \"abort\"\nproto_work_dir = \"/tmp/protos\"\nlog_json = true\n"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.fetch_timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(settings.proto_failure_policy, ProtoFailurePolicy::Abort);
        assert_eq!(settings.work_dir(), PathBuf::from("/tmp/protos"));
        assert!(settings.log_json);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn rejects_bad_timeouts() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(file, "fetch_timeout = \"soon\"\n").unwrap();
        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn registry_is_complete() {
        let registry = Settings::default().registry().unwrap();
        assert_eq!(registry.providers().len(), 7);
    }
}
