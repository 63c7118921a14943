pub mod descriptor_compiler;
pub mod translator;

pub use descriptor_compiler::{DescriptorCompiler, ProtoError, ProtoFetcher};
pub use translator::{Exporter, Importer, TranslateError, Translation};
