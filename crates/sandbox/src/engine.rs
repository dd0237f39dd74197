//! Sandbox runtime client.
//!
//! This module provides the `SandboxRuntime` trait: the thin, replaceable
//! seam between the orchestrator and a container backend. The Docker
//! implementation lives in [`crate::docker`], an instrumented in-memory
//! double in [`crate::mock`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::time::Instant;

use code_runner_core::{ResourceLimits, Result, SandboxHandle};

// =============================================================================
// Sandbox Types
// =============================================================================

/// Which output stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One chunk of the combined, interleaved log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub kind: StreamKind,
    pub data: Bytes,
}

impl OutputFrame {
    pub fn stdout(data: impl Into<Bytes>) -> Self {
        Self {
            kind: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Bytes>) -> Self {
        Self {
            kind: StreamKind::Stderr,
            data: data.into(),
        }
    }
}

/// Framed output as produced by the backend, in write order.
pub type OutputStream = BoxStream<'static, Result<OutputFrame>>;

/// Isolation settings applied to every sandbox.
///
/// Only [`SecurityOptions::hardened`] constructs these, so every sandbox the
/// engine creates gets the same confinement regardless of language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityOptions {
    network_disabled: bool,
    read_only_rootfs: bool,
    no_new_privileges: bool,
    drop_all_capabilities: bool,
    user: String,
    scratch_dir: String,
    scratch_size_bytes: u64,
}

impl SecurityOptions {
    /// No network, read-only root with a single tmpfs scratch mount,
    /// unprivileged user, no capabilities, no privilege escalation.
    pub fn hardened(
        user: impl Into<String>,
        scratch_dir: impl Into<String>,
        scratch_size_bytes: u64,
    ) -> Self {
        Self {
            network_disabled: true,
            read_only_rootfs: true,
            no_new_privileges: true,
            drop_all_capabilities: true,
            user: user.into(),
            scratch_dir: scratch_dir.into(),
            scratch_size_bytes,
        }
    }

    pub fn network_disabled(&self) -> bool {
        self.network_disabled
    }

    pub fn read_only_rootfs(&self) -> bool {
        self.read_only_rootfs
    }

    pub fn no_new_privileges(&self) -> bool {
        self.no_new_privileges
    }

    pub fn drop_all_capabilities(&self) -> bool {
        self.drop_all_capabilities
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn scratch_dir(&self) -> &str {
        &self.scratch_dir
    }

    pub fn scratch_size_bytes(&self) -> u64 {
        self.scratch_size_bytes
    }
}

/// Everything the backend needs to create one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Globally unique sandbox name.
    pub name: String,
    pub image: String,
    /// Argument vector run as the sandbox's only process.
    pub command: Vec<String>,
    pub limits: ResourceLimits,
    pub security: SecurityOptions,
    /// Most output the backend may keep on disk for this sandbox.
    pub log_retention_bytes: u64,
}

/// How waiting on a started sandbox ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Exited { exit_code: i64, oom_killed: bool },
    /// The deadline passed first; the sandbox may still be running.
    TimedOut,
}

// =============================================================================
// Sandbox Runtime Trait
// =============================================================================

/// Container backend operations used by the orchestrator.
///
/// Implementations return already-sanitized errors: backend messages and
/// sandbox names go to the log, not into the returned `Error`.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create (but do not start) a sandbox. Fails with `SandboxCreateFailed`.
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<SandboxHandle>;

    /// Start a created sandbox. Fails with `SandboxStartFailed`.
    async fn start(&self, handle: &SandboxHandle) -> Result<()>;

    /// Wait for the sandbox to exit, never blocking past `deadline`.
    async fn await_completion(&self, handle: &SandboxHandle, deadline: Instant)
        -> Result<Completion>;

    /// Forcibly stop a running sandbox.
    async fn terminate(&self, handle: &SandboxHandle) -> Result<()>;

    /// Framed stdout/stderr of an exited sandbox. Fails with `OutputCaptureFailed`.
    async fn fetch_output(&self, handle: &SandboxHandle) -> Result<OutputStream>;

    /// Remove the sandbox and its scratch storage. Fails with `CleanupFailed`.
    async fn remove(&self, handle: &SandboxHandle) -> Result<()>;

    /// Check if the backend is reachable.
    async fn is_available(&self) -> bool;
}
