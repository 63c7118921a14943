//! Envoy v3 static bootstrap.
mod exporter;
mod importer;
pub mod model;

pub use exporter::EnvoyExporter;
pub use importer::EnvoyImporter;

#[cfg(test)]
mod tests;
