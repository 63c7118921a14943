//! Translation driver: composes registry lookups, the canonical document
//! codec and the validator into the operations the CLI exposes.
use std::{fmt, sync::Arc};

use tokio::task::JoinSet;
use tracing::Instrument;

use crate::{
    config::{
        loader::{parse_canonical, render_canonical},
        models::GatewayConfig,
        validation::ConfigValidator,
    },
    core::{diagnostics::Diagnostics, provider::ProviderId, registry::AdapterRegistry},
    ports::translator::{TranslateResult, Translation},
    tracing_setup::translation_span,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Native document of a provider to canonical YAML
    Import,
    /// Canonical document to a provider's native document
    Generate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Import => write!(f, "import"),
            Mode::Generate => write!(f, "generate"),
        }
    }
}

/// Rendered text plus everything reported while producing it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub output: String,
    pub diagnostics: Diagnostics,
}

impl Outcome {
    /// 0 unless an `error` diagnostic is present.
    pub fn exit_code(&self) -> i32 {
        self.diagnostics.exit_code()
    }
}

impl From<Translation<String>> for Outcome {
    fn from(translation: Translation<String>) -> Self {
        Self {
            output: translation.output,
            diagnostics: translation.diagnostics,
        }
    }
}

#[derive(Clone)]
pub struct Translator {
    registry: Arc<AdapterRegistry>,
}

impl Translator {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Import `native` and validate the resulting model.
    pub fn import(
        &self,
        provider: ProviderId,
        native: &str,
    ) -> TranslateResult<Translation<GatewayConfig>> {
        let _span = translation_span("import", provider).entered();
        let importer = self.registry.importer(provider)?;
        let mut translation = importer.import(native)?;
        translation
            .diagnostics
            .extend(ConfigValidator::validate(&translation.output));
        Ok(translation)
    }

    pub async fn generate(
        &self,
        provider: ProviderId,
        config: &GatewayConfig,
    ) -> TranslateResult<Translation<String>> {
        let exporter = self.registry.exporter(provider)?;
        exporter
            .export(config)
            .instrument(translation_span("generate", provider))
            .await
    }

    /// Single entry point: import renders canonical YAML, generate parses a
    /// canonical document and renders the provider's syntax.
    pub async fn translate(
        &self,
        mode: Mode,
        provider: ProviderId,
        input: &str,
    ) -> TranslateResult<Outcome> {
        match mode {
            Mode::Import => {
                let translation = self.import(provider, input)?;
                Ok(Outcome {
                    output: render_canonical(&translation.output)?,
                    diagnostics: translation.diagnostics,
                })
            }
            Mode::Generate => {
                let config = parse_canonical(input)?;
                Ok(self.generate(provider, &config).await?.into())
            }
        }
    }

    /// Import from one provider and export to another through the canonical
    /// model. Diagnostics of both halves are kept in order; the model is
    /// validated once, by the export half.
    pub async fn migrate(
        &self,
        from: ProviderId,
        to: ProviderId,
        native: &str,
    ) -> TranslateResult<Outcome> {
        let imported = {
            let _span = translation_span("import", from).entered();
            self.registry.importer(from)?.import(native)?
        };
        let mut diagnostics = imported.diagnostics;
        let exported = self.generate(to, &imported.output).await?;
        diagnostics.extend(exported.diagnostics);
        tracing::info!(%from, %to, diagnostics = diagnostics.len(), "migration finished");
        Ok(Outcome {
            output: exported.output,
            diagnostics,
        })
    }

    /// Export to several providers concurrently. Results come back in the
    /// order of `providers`; each export fails or succeeds on its own.
    pub async fn generate_all(
        &self,
        config: Arc<GatewayConfig>,
        providers: &[ProviderId],
    ) -> Vec<(ProviderId, TranslateResult<Outcome>)> {
        let mut tasks = JoinSet::new();
        for (position, provider) in providers.iter().copied().enumerate() {
            let translator = self.clone();
            let config = Arc::clone(&config);
            tasks.spawn(async move {
                let outcome = translator.generate(provider, &config).await.map(Outcome::from);
                (position, provider, outcome)
            });
        }

        let mut results = Vec::with_capacity(providers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("export task failed: {e}"),
            }
        }
        results.sort_by_key(|(position, _, _)| *position);
        results
            .into_iter()
            .map(|(_, provider, outcome)| (provider, outcome))
            .collect()
    }
}
