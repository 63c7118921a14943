//! Proto descriptor resolution with a coalescing, content-addressed cache.
//!
//! A [`ProtoDescriptorManager`] turns a [`ProtoSource`] into a compiled
//! [`CompiledDescriptor`]. Entries are keyed by source kind and content hash;
//! concurrent lookups of the same key share one in-flight compilation (or
//! fetch) through a `tokio::sync::OnceCell`, while different keys proceed
//! independently. Failures are not cached, so a later call retries.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use prost_reflect::{DescriptorPool, MessageDescriptor};
use scc::HashMap;
use tokio::sync::OnceCell;

use crate::{
    config::models::{ProtoDescriptor, ProtoSource, ResolvedDescriptor},
    ports::descriptor_compiler::{DescriptorCompiler, ProtoError, ProtoFetcher, ProtoResult},
    utils::hash::sha256_bytes,
};

/// Default bound on remote proto fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A compiled descriptor set ready for code generation.
#[derive(Debug, Clone)]
pub struct CompiledDescriptor {
    /// Hash of the source text (or of the descriptor bytes for `.desc` inputs)
    pub content_hash: String,
    /// Location of the binary descriptor set in the work area
    pub compiled_path: PathBuf,
    /// Encoded `FileDescriptorSet`
    pub bytes: Arc<Vec<u8>>,
    pool: DescriptorPool,
}

impl CompiledDescriptor {
    /// Decode `bytes` and wrap them, failing with [`ProtoError::Parse`] when the
    /// set is malformed.
    pub fn from_bytes(
        content_hash: impl Into<String>,
        compiled_path: impl Into<PathBuf>,
        bytes: Vec<u8>,
    ) -> ProtoResult<Self> {
        let pool = DescriptorPool::decode(bytes.as_slice())
            .map_err(|e| ProtoError::Parse(format!("malformed descriptor set: {e}")))?;
        Ok(Self {
            content_hash: content_hash.into(),
            compiled_path: compiled_path.into(),
            bytes: Arc::new(bytes),
            pool,
        })
    }

    pub fn message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn resolved(&self) -> ResolvedDescriptor {
        ResolvedDescriptor {
            compiled_path: self.compiled_path.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

type Slot<T> = Arc<OnceCell<T>>;

pub struct ProtoDescriptorManager {
    compiler: Arc<dyn DescriptorCompiler>,
    fetcher: Arc<dyn ProtoFetcher>,
    work_dir: PathBuf,
    fetch_timeout: Duration,
    compiled: HashMap<String, Slot<Arc<CompiledDescriptor>>>,
    fetched: HashMap<String, Slot<Arc<String>>>,
}

impl ProtoDescriptorManager {
    /// Create a manager writing inline sources and compiled sets under `work_dir`.
    pub fn new(
        compiler: Arc<dyn DescriptorCompiler>,
        fetcher: Arc<dyn ProtoFetcher>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler,
            fetcher,
            work_dir: work_dir.into(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            compiled: HashMap::new(),
            fetched: HashMap::new(),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Resolve a descriptor's source to a compiled descriptor set.
    #[tracing::instrument(skip_all, fields(descriptor = %descriptor.name, source = descriptor.source.kind()))]
    pub async fn resolve(&self, descriptor: &ProtoDescriptor) -> ProtoResult<Arc<CompiledDescriptor>> {
        match &descriptor.source {
            ProtoSource::File { path } => self.resolve_file(Path::new(path)).await,
            ProtoSource::Inline { content } => {
                self.resolve_inline(&descriptor.name, content).await
            }
            ProtoSource::Url { address } => {
                let content = self.fetch(address).await?;
                self.resolve_inline(&descriptor.name, &content).await
            }
        }
    }

    /// Resolve and record the result on the descriptor itself.
    pub async fn resolve_in_place(
        &self,
        descriptor: &mut ProtoDescriptor,
    ) -> ProtoResult<Arc<CompiledDescriptor>> {
        let compiled = self.resolve(descriptor).await?;
        descriptor.resolved = Some(compiled.resolved());
        Ok(compiled)
    }

    async fn resolve_file(&self, path: &Path) -> ProtoResult<Arc<CompiledDescriptor>> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| ProtoError::io(path, e))?;
        let hash = sha256_bytes(&content);

        if is_compiled_set(path) {
            let key = format!("desc:{hash}");
            let compiled_path = path.to_path_buf();
            return self
                .cached(key, || async move {
                    CompiledDescriptor::from_bytes(hash, compiled_path, content).map(Arc::new)
                })
                .await;
        }

        let key = format!("file:{hash}");
        let include_dirs: Vec<PathBuf> = path.parent().map(Path::to_path_buf).into_iter().collect();
        let source = path.to_path_buf();
        self.cached(key, || async move {
            self.compile_to_work_dir(&hash, &source, &include_dirs).await
        })
        .await
    }

    async fn resolve_inline(&self, name: &str, content: &str) -> ProtoResult<Arc<CompiledDescriptor>> {
        let hash = sha256_bytes(content.as_bytes());
        let key = format!("inline:{hash}");
        self.cached(key, || async move {
            let dir = self.work_dir.join(&hash);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ProtoError::io(&dir, e))?;
            let source = dir.join(format!("{}.proto", proto_file_stem(name)));
            tokio::fs::write(&source, content)
                .await
                .map_err(|e| ProtoError::io(&source, e))?;
            self.compile_to_work_dir(&hash, &source, &[dir.clone()]).await
        })
        .await
    }

    async fn compile_to_work_dir(
        &self,
        hash: &str,
        source: &Path,
        include_dirs: &[PathBuf],
    ) -> ProtoResult<Arc<CompiledDescriptor>> {
        tracing::info!(source = %source.display(), "compiling proto descriptor");
        let bytes = self.compiler.compile(source, include_dirs).await?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ProtoError::io(&self.work_dir, e))?;
        let compiled_path = self.work_dir.join(format!("{hash}.desc"));
        tokio::fs::write(&compiled_path, &bytes)
            .await
            .map_err(|e| ProtoError::io(&compiled_path, e))?;

        CompiledDescriptor::from_bytes(hash, compiled_path, bytes).map(Arc::new)
    }

    async fn fetch(&self, url: &str) -> ProtoResult<Arc<String>> {
        let slot = slot_for(&self.fetched, url.to_string()).await;
        let text = slot
            .get_or_try_init(|| async {
                tracing::info!(url, "fetching remote proto");
                self.fetcher
                    .fetch(url, self.fetch_timeout)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(text.clone())
    }

    async fn cached<F, Fut>(&self, key: String, init: F) -> ProtoResult<Arc<CompiledDescriptor>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ProtoResult<Arc<CompiledDescriptor>>>,
    {
        let slot = slot_for(&self.compiled, key.clone()).await;
        if slot.initialized() {
            tracing::debug!(%key, "proto descriptor cache hit");
        }
        let compiled = slot.get_or_try_init(init).await?;
        Ok(compiled.clone())
    }
}

/// Fetch or create the shared slot for `key`. The map is only touched for the
/// insertion itself; waiting happens on the slot.
async fn slot_for<T>(map: &HashMap<String, Slot<T>>, key: String) -> Slot<T> {
    map.entry_async(key)
        .await
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .get()
        .clone()
}

fn is_compiled_set(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("desc" | "pb" | "protoset" | "binpb")
    )
}

fn proto_file_stem(name: &str) -> String {
    let stem = crate::utils::names::snake_name(name);
    if stem.is_empty() { "inline".to_string() } else { stem }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic compiler/fetcher doubles shared by unit and adapter tests.
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use prost::Message;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        field_descriptor_proto::{Label, Type},
    };

    use super::*;

    fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(kind as i32),
            json_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Descriptor set for `package auth.v1` with `LoginRequest`/`LoginResponse`.
    pub fn auth_descriptor_set() -> Vec<u8> {
        let file = FileDescriptorProto {
            name: Some("auth.proto".to_string()),
            package: Some("auth.v1".to_string()),
            syntax: Some("proto3".to_string()),
            message_type: vec![
                DescriptorProto {
                    name: Some("LoginRequest".to_string()),
                    field: vec![
                        field("username", 1, Type::String),
                        field("password", 2, Type::String),
                        field("trace_id", 3, Type::String),
                        field("client", 4, Type::String),
                        field("client_name", 5, Type::String),
                        field("issued_at", 6, Type::Int64),
                    ],
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("LoginResponse".to_string()),
                    field: vec![
                        field("token", 1, Type::String),
                        field("user_id", 2, Type::String),
                        field("debug", 3, Type::String),
                    ],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        FileDescriptorSet { file: vec![file] }.encode_to_vec()
    }

    pub const AUTH_PROTO: &str = r#"syntax = "proto3";
package auth.v1;
message LoginRequest { string username = 1; string password = 2; string trace_id = 3; }
message LoginResponse { string token = 1; }
service AuthService { rpc Login(LoginRequest) returns (LoginResponse); }
"#;

    /// Compiler double that counts invocations and returns a fixed set.
    pub struct CountingCompiler {
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub fail_with: Option<ProtoError>,
    }

    impl CountingCompiler {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                fail_with: None,
            }
        }

        pub fn failing(error: ProtoError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::new()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DescriptorCompiler for CountingCompiler {
        async fn compile(&self, proto_file: &Path, _include_dirs: &[PathBuf]) -> ProtoResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            if !proto_file.exists() {
                return Err(ProtoError::ExternalTool(format!(
                    "{} does not exist",
                    proto_file.display()
                )));
            }
            Ok(auth_descriptor_set())
        }
    }

    /// Fetcher double serving a fixed body, counting requests.
    pub struct StaticFetcher {
        pub body: Option<String>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn serving(body: &str) -> Self {
            Self {
                body: Some(body.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn unreachable() -> Self {
            Self {
                body: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProtoFetcher for StaticFetcher {
        async fn fetch(&self, url: &str, timeout: Duration) -> ProtoResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.body.clone().ok_or_else(|| ProtoError::Network {
                url: url.to_string(),
                message: format!("timed out after {}s", timeout.as_secs()),
            })
        }
    }

    pub fn manager(
        compiler: Arc<CountingCompiler>,
        fetcher: Arc<StaticFetcher>,
        dir: &Path,
    ) -> ProtoDescriptorManager {
        ProtoDescriptorManager::new(compiler, fetcher, dir)
    }

    pub fn inline_descriptor(name: &str) -> ProtoDescriptor {
        ProtoDescriptor {
            name: name.to_string(),
            source: ProtoSource::Inline {
                content: AUTH_PROTO.to_string(),
            },
            resolved: None,
        }
    }
}
