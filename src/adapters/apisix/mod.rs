//! APISIX standalone (`apisix.yaml`) configuration.
mod exporter;
mod importer;
pub mod model;

pub use exporter::ApisixExporter;
pub use importer::ApisixImporter;

#[cfg(test)]
mod tests;
