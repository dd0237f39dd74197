//! In-memory sandbox runtime for testing without Docker.
//!
//! `MockRuntime` records every call, tracks which sandboxes are live, and
//! lets tests script per-image behaviour: output frames, exit status, run
//! time, hangs, and backend failures at any lifecycle step.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use code_runner_core::{Error, Result, SandboxHandle};

use crate::engine::{Completion, OutputFrame, OutputStream, SandboxRuntime, SandboxSpec};

/// Scripted behaviour of sandboxes created from one image.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Frames returned by `fetch_output`, in order.
    pub frames: Vec<OutputFrame>,
    /// Emit the program text (last command argument) on stdout.
    pub echo_source: bool,
    pub exit_code: i64,
    pub oom_killed: bool,
    /// Simulated run time after start.
    pub run_for: Duration,
    /// Never exit on its own.
    pub hang: bool,
    pub fail_start: bool,
    pub fail_fetch: bool,
    pub fail_remove: bool,
    pub fail_terminate: bool,
}

impl MockBehavior {
    /// Exit 0 after writing `stdout`.
    pub fn stdout(stdout: &str) -> Self {
        Self {
            frames: vec![OutputFrame::stdout(stdout.to_string())],
            ..Default::default()
        }
    }

    /// Exit 0 after echoing the program text back.
    pub fn echo() -> Self {
        Self {
            echo_source: true,
            ..Default::default()
        }
    }

    /// Run until killed.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

/// A call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Create(String),
    Start(String),
    Await(String),
    Terminate(String),
    Fetch(String),
    Remove(String),
}

#[derive(Debug, Clone)]
struct MockSandbox {
    spec: SandboxSpec,
    started_at: Option<Instant>,
    terminated: bool,
}

#[derive(Default)]
struct State {
    calls: Vec<MockCall>,
    specs: Vec<SandboxSpec>,
    live: HashMap<String, MockSandbox>,
    max_live: usize,
}

/// Instrumented in-memory runtime.
#[derive(Default, Clone)]
pub struct MockRuntime {
    state: Arc<Mutex<State>>,
    behaviors: Arc<Mutex<HashMap<String, MockBehavior>>>,
    default_behavior: Arc<Mutex<MockBehavior>>,
    failing_creates: Arc<AtomicUsize>,
}

impl MockRuntime {
    /// Create a mock where every sandbox exits 0 with no output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour for sandboxes of any image without a specific script.
    pub fn with_default(self, behavior: MockBehavior) -> Self {
        *lock(&self.default_behavior) = behavior;
        self
    }

    /// Behaviour for sandboxes created from `image`.
    pub fn with_behavior(self, image: &str, behavior: MockBehavior) -> Self {
        lock(&self.behaviors)
            .insert(image.to_string(), behavior);
        self
    }

    /// Make the next `n` create calls fail as if the backend were down.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Specs of every sandbox creation attempt.
    pub fn created_specs(&self) -> Vec<SandboxSpec> {
        lock(&self.state).specs.clone()
    }

    /// Names of sandboxes created and not yet removed.
    pub fn live_sandboxes(&self) -> HashSet<String> {
        lock(&self.state).live.keys().cloned().collect()
    }

    /// Peak number of simultaneously live sandboxes.
    pub fn max_live(&self) -> usize {
        lock(&self.state).max_live
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| predicate(c))
            .count()
    }

    fn record(&self, call: MockCall) {
        lock(&self.state).calls.push(call);
    }

    fn behavior_for(&self, image: &str) -> MockBehavior {
        lock(&self.behaviors)
            .get(image)
            .cloned()
            .unwrap_or_else(|| lock(&self.default_behavior).clone())
    }

    fn sandbox(&self, handle: &SandboxHandle) -> Option<MockSandbox> {
        lock(&self.state).live.get(&handle.name).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::Create(spec.name.clone()));
        state.specs.push(spec.clone());

        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::sandbox_create("container runtime is unreachable"));
        }
        if state.live.contains_key(&spec.name) {
            return Err(Error::sandbox_create("sandbox conflicts with an existing one"));
        }

        state.live.insert(
            spec.name.clone(),
            MockSandbox {
                spec: spec.clone(),
                started_at: None,
                terminated: false,
            },
        );
        state.max_live = state.max_live.max(state.live.len());

        Ok(SandboxHandle::new(
            format!("mock-{}", uuid::Uuid::new_v4().simple()),
            spec.name.clone(),
        ))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(MockCall::Start(handle.name.clone()));
        let mut state = lock(&self.state);
        let sandbox = state
            .live
            .get_mut(&handle.name)
            .ok_or_else(|| Error::sandbox_start("no such sandbox"))?;
        if self.behavior_for(&sandbox.spec.image).fail_start {
            return Err(Error::sandbox_start("container runtime rejected the request"));
        }
        sandbox.started_at = Some(Instant::now());
        Ok(())
    }

    async fn await_completion(
        &self,
        handle: &SandboxHandle,
        deadline: Instant,
    ) -> Result<Completion> {
        self.record(MockCall::Await(handle.name.clone()));
        let sandbox = self
            .sandbox(handle)
            .ok_or_else(|| Error::internal("no such sandbox"))?;
        let started_at = sandbox
            .started_at
            .ok_or_else(|| Error::internal("sandbox was never started"))?;
        let behavior = self.behavior_for(&sandbox.spec.image);

        if sandbox.terminated {
            return Ok(Completion::Exited {
                exit_code: 137,
                oom_killed: false,
            });
        }
        if behavior.hang {
            tokio::time::sleep_until(deadline).await;
            return Ok(Completion::TimedOut);
        }

        let exits_at = started_at + behavior.run_for;
        if exits_at > deadline {
            tokio::time::sleep_until(deadline).await;
            return Ok(Completion::TimedOut);
        }
        tokio::time::sleep_until(exits_at).await;

        Ok(Completion::Exited {
            exit_code: behavior.exit_code,
            oom_killed: behavior.oom_killed,
        })
    }

    async fn terminate(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(MockCall::Terminate(handle.name.clone()));
        let mut state = lock(&self.state);
        let sandbox = match state.live.get_mut(&handle.name) {
            Some(sandbox) => sandbox,
            None => return Ok(()),
        };
        if self.behavior_for(&sandbox.spec.image).fail_terminate {
            return Err(Error::cleanup("container runtime rejected the request"));
        }
        sandbox.terminated = true;
        Ok(())
    }

    async fn fetch_output(&self, handle: &SandboxHandle) -> Result<OutputStream> {
        self.record(MockCall::Fetch(handle.name.clone()));
        let sandbox = self
            .sandbox(handle)
            .ok_or_else(|| Error::output_capture("no such sandbox"))?;
        let behavior = self.behavior_for(&sandbox.spec.image);
        if behavior.fail_fetch {
            return Err(Error::output_capture("log stream interrupted"));
        }

        let mut frames = behavior.frames.clone();
        if behavior.echo_source {
            if let Some(source) = sandbox.spec.command.last() {
                frames.push(OutputFrame::stdout(source.clone()));
            }
        }

        Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed())
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(MockCall::Remove(handle.name.clone()));
        let mut state = lock(&self.state);
        let image = match state.live.get(&handle.name) {
            Some(sandbox) => sandbox.spec.image.clone(),
            None => return Err(Error::cleanup("no such sandbox")),
        };
        if self.behavior_for(&image).fail_remove {
            return Err(Error::cleanup("container runtime rejected the request"));
        }
        state.live.remove(&handle.name);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SecurityOptions;
    use code_runner_core::ResourceLimits;

    fn spec(name: &str, image: &str) -> SandboxSpec {
        SandboxSpec {
            name: name.into(),
            image: image.into(),
            command: vec!["run".into(), "program text".into()],
            limits: ResourceLimits::default(),
            security: SecurityOptions::hardened("65534:65534", "/sandbox", 1024),
            log_retention_bytes: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let mock = MockRuntime::new().with_default(MockBehavior::echo());
        let handle = mock.create_sandbox(&spec("a", "img")).await.unwrap();
        assert_eq!(mock.live_sandboxes().len(), 1);

        mock.start(&handle).await.unwrap();
        let completion = mock
            .await_completion(&handle, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            completion,
            Completion::Exited {
                exit_code: 0,
                oom_killed: false
            }
        );

        let frames: Vec<_> = mock.fetch_output(&handle).await.unwrap().collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &OutputFrame::stdout("program text")
        );

        mock.remove(&handle).await.unwrap();
        assert!(mock.live_sandboxes().is_empty());
        assert_eq!(mock.count(|c| matches!(c, MockCall::Remove(_))), 1);
    }

    #[tokio::test]
    async fn test_mock_rejects_duplicate_live_names() {
        let mock = MockRuntime::new();
        mock.create_sandbox(&spec("same", "img")).await.unwrap();
        let err = mock.create_sandbox(&spec("same", "img")).await.unwrap_err();
        assert!(matches!(err, Error::SandboxCreateFailed(_)));
    }

    #[tokio::test]
    async fn test_mock_fail_next_creates() {
        let mock = MockRuntime::new();
        mock.fail_next_creates(1);
        assert!(mock.create_sandbox(&spec("a", "img")).await.is_err());
        assert!(mock.create_sandbox(&spec("b", "img")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_hang_times_out_at_deadline() {
        let mock = MockRuntime::new().with_behavior("slow", MockBehavior::hang());
        let handle = mock.create_sandbox(&spec("a", "slow")).await.unwrap();
        mock.start(&handle).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let completion = mock.await_completion(&handle, deadline).await.unwrap();
        assert_eq!(completion, Completion::TimedOut);
        assert!(Instant::now() >= deadline);
    }
}
