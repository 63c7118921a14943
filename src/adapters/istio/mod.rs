//! Istio VirtualService / DestinationRule resources.
mod exporter;
mod importer;
pub mod model;

pub use exporter::IstioExporter;
pub use importer::IstioImporter;

#[cfg(test)]
mod tests;
