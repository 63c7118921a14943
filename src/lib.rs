//! Gatemorph - a provider-agnostic API gateway configuration translator.
//!
//! Gatemorph reads the native configuration of one gateway product, lifts it
//! into a single canonical model and renders that model for another product.
//! Like its gateway ancestor it follows a **hexagonal architecture**: traits
//! live in `ports`, implementations in `adapters`, and provider-independent
//! logic in `core`.
//!
//! # Features
//! - Canonical model with a validator that never mutates its input
//! - Static capability matrix: what each dialect renders fully, approximates
//!   or omits, with a caveat for everything that is not full
//! - Importers and exporters for nginx, Envoy, Kong, Traefik, APISIX, Istio and
//!   AWS API Gateway HTTP APIs
//! - gRPC field transformations generated as Lua for hosts that embed it,
//!   driven by compiled protobuf descriptor sets
//! - Proto descriptor cache that coalesces concurrent compilations of the same
//!   content into one `protoc` run
//! - Diagnostics instead of failures for anything recoverable
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gatemorph::{
//!     adapters::GrpcScripting,
//!     core::{AdapterRegistry, Mode, ProviderId, Translator},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let translator = Translator::new(Arc::new(AdapterRegistry::with_defaults(
//!     GrpcScripting::default(),
//! )));
//! let canonical = std::fs::read_to_string("gateway.yaml")?;
//! let outcome = translator
//!     .translate(Mode::Generate, ProviderId::Envoy, &canonical)
//!     .await?;
//! for diagnostic in &outcome.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! print!("{}", outcome.output);
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Library operations return [`ports::TranslateError`] for unrecoverable
//! conditions only (unparseable input, dangling descriptor references, missing
//! adapters, descriptor failures under the abort policy). Everything else is a
//! [`core::Diagnostic`]. Application code uses `eyre::Result` with `WrapErr`
//! context.
//!
//! # Concurrency & Data Structures
//! Translations own their model and may run in parallel. The only shared
//! mutable state is the descriptor cache, an `scc::HashMap` of
//! `tokio::sync::OnceCell` slots.
//!
//! # License
//! Licensed under Apache-2.0.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    config::{GatewayConfig, Settings},
    core::{AdapterRegistry, Diagnostics, Mode, Outcome, ProviderId, Translator},
    ports::{Exporter, Importer, TranslateError},
};
