//! Kong decK declarative configuration.
mod exporter;
mod importer;
pub mod model;

pub use exporter::KongExporter;
pub use importer::KongImporter;

#[cfg(test)]
mod tests;
