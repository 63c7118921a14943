use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::descriptor_compiler::{DescriptorCompiler, ProtoError, ProtoResult};

/// Environment variable overriding the `protoc` binary location.
pub const PROTOC_ENV: &str = "PROTOC";

/// `DescriptorCompiler` adapter that shells out to `protoc`.
///
/// The binary is located from an explicit path, the `PROTOC` environment
/// variable or the `PATH`, in that order. Compilation always includes
/// imported files so the resulting set is self-contained.
#[derive(Debug, Clone, Default)]
pub struct ProtocCompiler {
    binary: Option<PathBuf>,
}

impl ProtocCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(path.into()),
        }
    }

    fn locate(&self) -> ProtoResult<PathBuf> {
        if let Some(binary) = &self.binary {
            return Ok(binary.clone());
        }
        if let Some(from_env) = std::env::var_os(PROTOC_ENV) {
            return Ok(PathBuf::from(from_env));
        }
        which::which("protoc").map_err(|e| {
            ProtoError::ExternalTool(format!(
                "protoc not found ({e}); install protobuf-compiler or set {PROTOC_ENV}"
            ))
        })
    }
}

#[async_trait]
impl DescriptorCompiler for ProtocCompiler {
    async fn compile(&self, proto_file: &Path, include_dirs: &[PathBuf]) -> ProtoResult<Vec<u8>> {
        let binary = self.locate()?;
        let out_dir = tempfile::tempdir().map_err(|e| ProtoError::io(std::env::temp_dir(), e))?;
        let out_file = out_dir.path().join("descriptor.pb");

        let mut command = Command::new(&binary);
        command
            .arg("--include_imports")
            .arg(format!("--descriptor_set_out={}", out_file.display()));
        for dir in include_dirs {
            command.arg(format!("-I{}", dir.display()));
        }
        if include_dirs.is_empty() {
            if let Some(parent) = proto_file.parent() {
                command.arg(format!("-I{}", parent.display()));
            }
        }
        command.arg(proto_file);

        tracing::debug!(binary = %binary.display(), proto = %proto_file.display(), "running protoc");
        let output = command.output().await.map_err(|e| {
            ProtoError::ExternalTool(format!("failed to run {}: {e}", binary.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(&stderr, output.status.code()));
        }

        tokio::fs::read(&out_file)
            .await
            .map_err(|e| ProtoError::io(&out_file, e))
    }
}

/// protoc reports syntax errors as `file:line:col: message`; anything else is
/// treated as a toolchain failure.
fn classify_failure(stderr: &str, code: Option<i32>) -> ProtoError {
    let looks_like_syntax = stderr.lines().any(|line| {
        let mut parts = line.splitn(4, ':');
        let (_file, line_no, col) = (parts.next(), parts.next(), parts.next());
        matches!((line_no, col), (Some(l), Some(c)) if l.trim().parse::<u32>().is_ok() && c.trim().parse::<u32>().is_ok())
    }) || stderr.contains("is not defined")
        || stderr.contains("Expected");

    if looks_like_syntax {
        ProtoError::Parse(stderr.to_string())
    } else {
        ProtoError::ExternalTool(format!(
            "protoc exited with {}: {stderr}",
            code.map_or_else(|| "signal".to_string(), |c| c.to_string())
        ))
    }
}
