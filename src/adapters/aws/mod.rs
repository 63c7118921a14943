//! AWS API Gateway HTTP APIs as CloudFormation templates.
mod exporter;
mod importer;
pub mod model;

pub use exporter::AwsExporter;
pub use importer::AwsImporter;

#[cfg(test)]
mod tests;
