//! Dialect adapters plus the toolchain adapters behind the proto ports.
pub mod common;
pub mod lua;
pub mod proto;

pub mod apisix;
pub mod aws;
pub mod envoy;
pub mod istio;
pub mod kong;
pub mod nginx;
pub mod traefik;

#[cfg(test)]
mod fixtures;

pub use apisix::{ApisixExporter, ApisixImporter};
pub use aws::{AwsExporter, AwsImporter};
pub use envoy::{EnvoyExporter, EnvoyImporter};
pub use istio::{IstioExporter, IstioImporter};
pub use kong::{KongExporter, KongImporter};
pub use lua::{GrpcScripting, ProtoFailurePolicy};
pub use nginx::{NginxExporter, NginxImporter};
pub use proto::{HttpProtoFetcher, ProtocCompiler};
pub use traefik::{TraefikExporter, TraefikImporter};
