pub mod capability;
pub mod diagnostics;
pub mod export_context;
pub mod proto_manager;
pub mod provider;
pub mod registry;
pub mod translator;
pub mod weights;

pub use capability::{Capability, CapabilityMatrix, Feature, SupportLevel};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use proto_manager::{CompiledDescriptor, ProtoDescriptorManager};
pub use provider::ProviderId;
pub use registry::AdapterRegistry;
pub use translator::{Mode, Outcome, Translator};
