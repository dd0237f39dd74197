#![deny(unused)]
//! Sandboxed execution engine.
//!
//! Runs untrusted programs in single-use Docker containers and returns their
//! captured output. Every sandbox is network-isolated, resource-bounded and
//! removed before the request returns.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  ExecutionService (orchestrator)       │
//! │    ↓ resolves profile                  │
//! ├────────────────────────────────────────┤
//! │  LanguageRegistry → CommandBuilder     │
//! │    ↓ argv + limits + security          │
//! ├────────────────────────────────────────┤
//! │  SandboxRuntime (DockerRuntime)        │
//! │    ↓ Docker API via bollard            │
//! ├────────────────────────────────────────┤
//! │  Docker Container (single use)         │
//! │    /sandbox  (tmpfs, writable)         │
//! │    No network, no root, no caps        │
//! └────────────────────────────────────────┘
//!         ↓ framed logs
//!     demux → ExecutionResult
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use code_runner_sandbox::{DockerRuntime, ExecutionService};
//!
//! let runtime = Arc::new(DockerRuntime::from_config(&config.docker)?);
//! let service = ExecutionService::from_config(&config, runtime)?;
//!
//! let result = service
//!     .execute_program(ExecutionRequest::new("python", "print('hi')"))
//!     .await?;
//! ```

pub mod command;
pub mod demux;
pub mod docker;
pub mod engine;
pub mod metrics;
pub mod mock;
pub mod orchestrator;
pub mod registry;

pub use command::{shell_quote, CommandBuilder, CommandSequence};
pub use demux::{demux, DemuxedOutput};
pub use docker::DockerRuntime;
pub use engine::{
    Completion, OutputFrame, OutputStream, SandboxRuntime, SandboxSpec, SecurityOptions, StreamKind,
};
pub use mock::{MockBehavior, MockCall, MockRuntime};
pub use orchestrator::ExecutionService;
pub use registry::LanguageRegistry;
