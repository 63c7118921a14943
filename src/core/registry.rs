//! Lookup table from provider id to importer and exporter.
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    adapters::{
        ApisixExporter, ApisixImporter, AwsExporter, AwsImporter, EnvoyExporter, EnvoyImporter,
        GrpcScripting, IstioExporter, IstioImporter, KongExporter, KongImporter, NginxExporter,
        NginxImporter, TraefikExporter, TraefikImporter,
    },
    core::provider::ProviderId,
    ports::translator::{Exporter, Importer, TranslateError, TranslateResult},
};

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    importers: BTreeMap<ProviderId, Arc<dyn Importer>>,
    exporters: BTreeMap<ProviderId, Arc<dyn Exporter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding one importer and one exporter for every supported
    /// dialect. Lua-capable exporters share `grpc` for descriptor resolution.
    pub fn with_defaults(grpc: GrpcScripting) -> Self {
        let mut registry = Self::new();
        registry.register_importer(ProviderId::Nginx, Arc::new(NginxImporter));
        registry.register_importer(ProviderId::Envoy, Arc::new(EnvoyImporter));
        registry.register_importer(ProviderId::Kong, Arc::new(KongImporter));
        registry.register_importer(ProviderId::Traefik, Arc::new(TraefikImporter));
        registry.register_importer(ProviderId::Apisix, Arc::new(ApisixImporter));
        registry.register_importer(ProviderId::Istio, Arc::new(IstioImporter));
        registry.register_importer(ProviderId::AwsApiGateway, Arc::new(AwsImporter));

        registry.register_exporter(ProviderId::Nginx, Arc::new(NginxExporter::new(grpc.clone())));
        registry.register_exporter(ProviderId::Envoy, Arc::new(EnvoyExporter::new(grpc.clone())));
        registry.register_exporter(ProviderId::Kong, Arc::new(KongExporter::new(grpc.clone())));
        registry.register_exporter(ProviderId::Traefik, Arc::new(TraefikExporter));
        registry.register_exporter(ProviderId::Apisix, Arc::new(ApisixExporter::new(grpc)));
        registry.register_exporter(ProviderId::Istio, Arc::new(IstioExporter));
        registry.register_exporter(ProviderId::AwsApiGateway, Arc::new(AwsExporter));
        registry
    }

    /// Register `importer` for `provider`, returning the one it replaces.
    pub fn register_importer(
        &mut self,
        provider: ProviderId,
        importer: Arc<dyn Importer>,
    ) -> Option<Arc<dyn Importer>> {
        tracing::debug!(%provider, "importer registered");
        self.importers.insert(provider, importer)
    }

    /// Register `exporter` for `provider`, returning the one it replaces.
    pub fn register_exporter(
        &mut self,
        provider: ProviderId,
        exporter: Arc<dyn Exporter>,
    ) -> Option<Arc<dyn Exporter>> {
        tracing::debug!(%provider, "exporter registered");
        self.exporters.insert(provider, exporter)
    }

    pub fn importer(&self, provider: ProviderId) -> TranslateResult<Arc<dyn Importer>> {
        self.importers
            .get(&provider)
            .cloned()
            .ok_or_else(|| TranslateError::NotFound {
                kind: "importer",
                provider: provider.to_string(),
            })
    }

    pub fn exporter(&self, provider: ProviderId) -> TranslateResult<Arc<dyn Exporter>> {
        self.exporters
            .get(&provider)
            .cloned()
            .ok_or_else(|| TranslateError::NotFound {
                kind: "exporter",
                provider: provider.to_string(),
            })
    }

    /// Providers with at least one registered adapter, in declaration order.
    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self
            .importers
            .keys()
            .chain(self.exporters.keys())
            .copied()
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }

    pub fn has_importer(&self, provider: ProviderId) -> bool {
        self.importers.contains_key(&provider)
    }

    pub fn has_exporter(&self, provider: ProviderId) -> bool {
        self.exporters.contains_key(&provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_provider() {
        let registry = AdapterRegistry::with_defaults(GrpcScripting::default());
        assert_eq!(registry.providers(), ProviderId::ALL);
        for provider in ProviderId::ALL {
            assert_eq!(registry.importer(provider).unwrap().provider(), provider);
            assert_eq!(registry.exporter(provider).unwrap().provider(), provider);
        }
    }

    #[test]
    fn missing_adapters_are_not_found() {
        let mut registry = AdapterRegistry::new();
        registry.register_importer(ProviderId::Istio, Arc::new(IstioImporter));
        assert!(registry.has_importer(ProviderId::Istio));
        assert!(!registry.has_exporter(ProviderId::Istio));

        let err = registry.exporter(ProviderId::Istio).err().unwrap();
        assert!(matches!(err, TranslateError::NotFound { kind: "exporter", .. }));
        assert_eq!(err.to_string(), "no exporter registered for provider 'istio'");
        assert!(registry.importer(ProviderId::Kong).is_err());
    }

    #[test]
    fn registering_twice_replaces() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.register_exporter(ProviderId::Istio, Arc::new(IstioExporter)).is_none());
        assert!(registry.register_exporter(ProviderId::Istio, Arc::new(IstioExporter)).is_some());
        assert_eq!(registry.providers(), [ProviderId::Istio]);
    }
}
