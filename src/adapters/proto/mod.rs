//! Proto toolchain adapters: the `protoc` compiler and the remote fetcher.
pub mod fetcher;
pub mod protoc;

pub use fetcher::HttpProtoFetcher;
pub use protoc::ProtocCompiler;
