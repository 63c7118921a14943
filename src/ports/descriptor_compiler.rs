use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while resolving a proto descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtoError {
    /// The compiler toolchain is missing or failed to run
    #[error("proto compiler error: {0}")]
    ExternalTool(String),

    /// Fetching a remote proto failed or timed out
    #[error("failed to fetch proto from {url}: {message}")]
    Network { url: String, message: String },

    /// The proto source or compiled descriptor set is malformed
    #[error("invalid proto definition: {0}")]
    Parse(String),

    /// Reading or writing the content-addressed work area failed
    #[error("proto cache I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl ProtoError {
    pub fn io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        ProtoError::Io {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Result type for descriptor operations
pub type ProtoResult<T> = Result<T, ProtoError>;

/// DescriptorCompiler defines the port for turning `.proto` sources into a
/// binary `FileDescriptorSet`
#[async_trait]
pub trait DescriptorCompiler: Send + Sync + 'static {
    /// Compile `proto_file`, resolving imports from `include_dirs`.
    ///
    /// # Returns
    /// The encoded descriptor set, including imported files
    async fn compile(&self, proto_file: &Path, include_dirs: &[PathBuf]) -> ProtoResult<Vec<u8>>;
}

/// ProtoFetcher defines the port for downloading remote proto sources
#[async_trait]
pub trait ProtoFetcher: Send + Sync + 'static {
    /// Fetch the text at `url`, failing with [`ProtoError::Network`] after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> ProtoResult<String>;
}
