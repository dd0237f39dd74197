//! Execution orchestrator.
//!
//! Drives one request through the sandbox lifecycle:
//!
//! ```text
//! resolve profile -> resolve limits -> build command -> wait for a slot
//!   -> create -> start -> await (deadline) -> fetch + demux -> remove
//! ```
//!
//! Every sandbox that was successfully created is removed exactly once on
//! every path, including timeouts, backend failures, caller cancellation and
//! panics in the lifecycle task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use code_runner_core::config::{AppConfig, LimitsConfig, RunnerConfig};
use code_runner_core::{
    Error, ExecutionProfile, ExecutionRequest, ExecutionResult, ResourceLimits, Result,
    SandboxHandle,
};

use crate::command::CommandBuilder;
use crate::demux::demux;
use crate::engine::{Completion, SandboxRuntime, SandboxSpec, SecurityOptions};
use crate::metrics;
use crate::registry::LanguageRegistry;

/// Entry point used by hosts: "run this program in this language".
///
/// Cheap to clone; clones share the registry, runtime client and
/// concurrency limit.
#[derive(Clone)]
pub struct ExecutionService {
    inner: Arc<Inner>,
}

struct Inner {
    registry: LanguageRegistry,
    runtime: Arc<dyn SandboxRuntime>,
    commands: CommandBuilder,
    runner: RunnerConfig,
    limits: LimitsConfig,
    /// One permit per live sandbox.
    slots: Semaphore,
}

impl ExecutionService {
    pub fn new(
        registry: LanguageRegistry,
        runtime: Arc<dyn SandboxRuntime>,
        runner: RunnerConfig,
        limits: LimitsConfig,
    ) -> Self {
        let commands = CommandBuilder::new(
            runner.scratch_dir.clone(),
            runner.max_source_bytes,
            runner.max_stdin_bytes,
        );
        let slots = Semaphore::new(runner.max_concurrency.max(1));

        Self {
            inner: Arc::new(Inner {
                registry,
                runtime,
                commands,
                runner,
                limits,
                slots,
            }),
        }
    }

    /// Build a service from validated configuration.
    pub fn from_config(config: &AppConfig, runtime: Arc<dyn SandboxRuntime>) -> Result<Self> {
        config.validate()?;
        let registry = LanguageRegistry::new(config.language_profiles())?;
        tracing::info!(
            languages = ?registry.languages(),
            max_concurrency = config.runner.max_concurrency,
            "Execution service ready"
        );
        Ok(Self::new(
            registry,
            runtime,
            config.runner.clone(),
            config.limits.clone(),
        ))
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.inner.registry
    }

    /// Run a program and return its captured output.
    ///
    /// A program that runs and exits non-zero is a successful execution;
    /// only lifecycle failures are errors. Dropping the returned future
    /// cancels the execution, and its sandbox is still terminated and
    /// removed in the background.
    pub async fn execute_program(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`execute_program`](Self::execute_program), also stopping when
    /// `cancel` fires. Cancellation before a sandbox exists creates none;
    /// afterwards the sandbox is force-terminated and removed.
    pub async fn execute_with_cancellation(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let token = cancel.child_token();
        // Fires if this future is dropped before the task finishes.
        let guard = token.clone().drop_guard();

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run(request, token).await });
        let joined = task.await;
        let _ = guard.disarm();

        joined.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Execution task failed");
            Err(Error::internal("execution task failed"))
        })
    }
}

impl Inner {
    async fn run(&self, request: ExecutionRequest, cancel: CancellationToken) -> Result<ExecutionResult> {
        let started = Instant::now();
        let result = self.execute(&request, &cancel).await;

        // Raw caller input never becomes a metric label.
        let language = self
            .registry
            .resolve(&request.language)
            .map(|p| p.language.clone())
            .unwrap_or_else(|_| "unsupported".to_string());
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.kind(),
        };
        metrics::track_execution(&language, outcome, started.elapsed().as_secs_f64());
        if matches!(&result, Ok(r) if r.truncated) {
            metrics::track_truncation(&language);
        }

        result
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        // Everything that can reject the request happens before a sandbox exists.
        let profile = self.registry.resolve(&request.language)?;
        let limits = ResourceLimits::resolve(
            &self.limits.default,
            request.limits.as_ref(),
            &self.limits.max,
        )?;
        let (name, run_id) = sandbox_name(&self.runner.name_prefix, &profile.language);
        let command = self.commands.build(
            &profile,
            &request.source,
            request.stdin.as_deref(),
            &run_id,
        )?;

        let span = tracing::info_span!("execution", language = %profile.language, sandbox = %name);
        async move {
            let queued = Instant::now();
            let _slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Cancelled while waiting for a sandbox slot");
                    return Err(Error::Cancelled);
                }
                slot = self.slots.acquire() => {
                    slot.map_err(|_| Error::internal("execution service is shut down"))?
                }
            };
            metrics::track_queue_wait(queued.elapsed().as_secs_f64());

            let spec = SandboxSpec {
                name,
                image: profile.image.clone(),
                command: command.argv,
                limits,
                security: SecurityOptions::hardened(
                    self.runner.sandbox_user.clone(),
                    self.runner.scratch_dir.clone(),
                    self.runner.scratch_size_bytes,
                ),
                log_retention_bytes: self.runner.log_retention_bytes,
            };

            // Not raced with cancellation: a create that completes must
            // yield a handle we can remove.
            let handle = self.runtime.create_sandbox(&spec).await?;
            metrics::sandbox_created(&profile.language);
            let lease = SandboxLease::new(
                self.runtime.clone(),
                handle,
                profile.language.clone(),
                self.runner.cleanup_timeout(),
            );

            let outcome = self.drive(lease.handle(), &profile, &limits, cancel).await;
            lease.release().await;

            match &outcome {
                Ok(result) => tracing::info!(
                    exit_code = result.exit_code,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    truncated = result.truncated,
                    "Execution completed"
                ),
                Err(e) => tracing::info!(error = %e, "Execution failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Start, wait, and collect output. Never removes the sandbox.
    async fn drive(
        &self,
        handle: &SandboxHandle,
        profile: &ExecutionProfile,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.runtime.start(handle).await?;

        // The wall clock starts here, not at submission.
        let started = Instant::now();
        let deadline = started + limits.timeout;

        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Execution cancelled, terminating sandbox");
                self.terminate(handle).await;
                return Err(Error::Cancelled);
            }
            completion = self.runtime.await_completion(handle, deadline) => completion,
        };

        let (exit_code, oom_killed) = match completion {
            Ok(Completion::Exited {
                exit_code,
                oom_killed,
            }) => (exit_code, oom_killed),
            Ok(Completion::TimedOut) => {
                tracing::warn!(
                    timeout_ms = limits.timeout.as_millis() as u64,
                    "Execution exceeded its wall-clock limit, terminating sandbox"
                );
                self.terminate(handle).await;
                return Err(Error::ExecutionTimeout {
                    limit: limits.timeout,
                });
            }
            Err(e) => {
                self.terminate(handle).await;
                return Err(e);
            }
        };
        let elapsed = started.elapsed();
        if oom_killed {
            tracing::info!(language = %profile.language, "Program hit its memory ceiling");
        }

        let capture = async {
            let stream = self.runtime.fetch_output(handle).await?;
            demux(
                stream,
                self.runner.max_output_bytes,
                deadline + self.runner.output_grace(),
            )
            .await
        };
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = capture => output?,
        };

        Ok(ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
            oom_killed,
            elapsed,
            truncated: output.truncated,
        })
    }

    /// Best-effort kill, bounded by the cleanup timeout. Removal follows regardless.
    async fn terminate(&self, handle: &SandboxHandle) {
        match tokio::time::timeout(self.runner.cleanup_timeout(), self.runtime.terminate(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to terminate sandbox"),
            Err(_) => tracing::warn!("Timed out terminating sandbox"),
        }
    }
}

/// `{prefix}-{language}-{unix millis}-{random}` plus the random part alone.
fn sandbox_name(prefix: &str, language: &str) -> (String, String) {
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}-{}-{}-{}",
        prefix,
        language,
        chrono::Utc::now().timestamp_millis(),
        run_id
    );
    (name, run_id)
}

// =============================================================================
// Sandbox Lease
// =============================================================================

/// Ownership of one created sandbox.
///
/// [`release`](Self::release) removes it. If the lease is dropped without
/// being released (the lifecycle task panicked), removal is spawned onto
/// the current runtime instead.
struct SandboxLease {
    runtime: Arc<dyn SandboxRuntime>,
    handle: SandboxHandle,
    language: String,
    cleanup_timeout: Duration,
    released: bool,
}

impl SandboxLease {
    fn new(
        runtime: Arc<dyn SandboxRuntime>,
        handle: SandboxHandle,
        language: String,
        cleanup_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            handle,
            language,
            cleanup_timeout,
            released: false,
        }
    }

    fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    async fn release(mut self) {
        remove_sandbox(
            self.runtime.as_ref(),
            &self.handle,
            &self.language,
            self.cleanup_timeout,
        )
        .await;
        self.released = true;
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let runtime = self.runtime.clone();
        let handle = self.handle.clone();
        let language = self.language.clone();
        let timeout = self.cleanup_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!(sandbox = %handle, "Sandbox lease dropped, removing in background");
                rt.spawn(async move {
                    remove_sandbox(runtime.as_ref(), &handle, &language, timeout).await;
                });
            }
            Err(_) => {
                tracing::error!(sandbox = %handle, "No async runtime to remove sandbox, it is leaked");
                metrics::track_cleanup_failure(&language);
            }
        }
    }
}

/// Remove a sandbox. Failures are logged and counted, never returned.
async fn remove_sandbox(
    runtime: &dyn SandboxRuntime,
    handle: &SandboxHandle,
    language: &str,
    timeout: Duration,
) {
    let outcome = match tokio::time::timeout(timeout, runtime.remove(handle)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::cleanup("removal timed out")),
    };

    match outcome {
        Ok(()) => metrics::sandbox_removed(language),
        Err(e) => {
            tracing::error!(sandbox = %handle, error = %e, "Sandbox cleanup failed");
            metrics::track_cleanup_failure(language);
        }
    }
}
