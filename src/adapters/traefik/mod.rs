//! Traefik dynamic configuration for the file provider.
mod exporter;
mod importer;
pub mod model;

pub use exporter::{TraefikExporter, router_rule};
pub use importer::{TraefikImporter, parse_rule};

#[cfg(test)]
mod tests;
