//! nginx `http`-context configuration (OpenResty for gRPC transformation).
mod exporter;
mod importer;
pub mod model;

pub use exporter::NginxExporter;
pub use importer::NginxImporter;

#[cfg(test)]
mod tests;
