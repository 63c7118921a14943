use async_trait::async_trait;
use thiserror::Error;

use crate::{
    config::models::GatewayConfig,
    core::{diagnostics::Diagnostics, provider::ProviderId},
    ports::descriptor_compiler::ProtoError,
};

/// Unrecoverable translation failures. Everything recoverable is reported as
/// a diagnostic instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TranslateError {
    /// Native or canonical input could not be parsed at all
    #[error("failed to parse {provider} input: {message}")]
    Parse { provider: String, message: String },

    /// A required cross reference names something that does not exist
    #[error("{referrer} references unknown proto descriptor '{name}'")]
    MissingReference { referrer: String, name: String },

    /// No adapter registered for the provider
    #[error("no {kind} registered for provider '{provider}'")]
    NotFound { kind: &'static str, provider: String },

    /// Output document could not be serialized
    #[error("failed to render {provider} output: {message}")]
    Render { provider: String, message: String },

    /// Descriptor resolution failed under an abort policy
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl TranslateError {
    pub fn parse(provider: ProviderId, message: impl Into<String>) -> Self {
        TranslateError::Parse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn render(provider: ProviderId, message: impl Into<String>) -> Self {
        TranslateError::Render {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for translation operations
pub type TranslateResult<T> = Result<T, TranslateError>;

/// A translation result paired with the diagnostics gathered producing it.
#[derive(Debug, Clone)]
pub struct Translation<T> {
    pub output: T,
    pub diagnostics: Diagnostics,
}

impl<T> Translation<T> {
    pub fn new(output: T, diagnostics: Diagnostics) -> Self {
        Self {
            output,
            diagnostics,
        }
    }
}

/// Importer parses one dialect's native syntax into the canonical model.
pub trait Importer: Send + Sync + 'static {
    fn provider(&self) -> ProviderId;

    /// Parse `native` into a [`GatewayConfig`].
    ///
    /// Constructs without a canonical equivalent are dropped with a
    /// diagnostic; only unparseable input fails.
    fn import(&self, native: &str) -> TranslateResult<Translation<GatewayConfig>>;
}

/// Exporter renders the canonical model into one dialect's native syntax.
#[async_trait]
pub trait Exporter: Send + Sync + 'static {
    fn provider(&self) -> ProviderId;

    /// Render `config`. The model is only borrowed; unsupported features are
    /// omitted or approximated with a warning diagnostic.
    async fn export(&self, config: &GatewayConfig) -> TranslateResult<Translation<String>>;
}
