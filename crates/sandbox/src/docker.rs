//! Docker-backed sandbox runtime.
//!
//! One `bollard` client is created per process and shared by every request.
//! Each sandbox is a single-use container whose only process is the built
//! command; it is created with strict resource limits, no network, a
//! read-only root filesystem and a tmpfs scratch mount.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use code_runner_core::config::DockerConfig;
use code_runner_core::{Error, Result, SandboxHandle};

use crate::engine::{Completion, OutputFrame, OutputStream, SandboxRuntime, SandboxSpec};

/// CFS scheduling period in microseconds.
const CPU_PERIOD_US: i64 = 100_000;

/// Label attached to every container this runtime creates.
pub const MANAGED_BY_LABEL: (&str, &str) = ("managed-by", "code-runner");

/// Docker-based sandbox runtime using the `bollard` crate.
///
/// Creates isolated containers with:
/// - No network access
/// - Read-only root filesystem (writable tmpfs scratch only)
/// - Memory (no swap), CPU and process-count limits
/// - Non-root user, all capabilities dropped, no privilege escalation
pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon with default settings.
    pub fn new() -> Result<Self> {
        Self::from_config(&DockerConfig::default())
    }

    /// Connect using the runner's Docker settings.
    pub fn from_config(config: &DockerConfig) -> Result<Self> {
        let docker = match config.host.as_deref().map(endpoint).transpose()? {
            Some(Endpoint::Unix(path)) => bollard::Docker::connect_with_unix(
                path,
                config.timeout_secs,
                bollard::API_DEFAULT_VERSION,
            ),
            Some(Endpoint::Http(addr)) => bollard::Docker::connect_with_http(
                addr,
                config.timeout_secs,
                bollard::API_DEFAULT_VERSION,
            ),
            None => bollard::Docker::connect_with_local_defaults()
                .map(|docker| docker.with_timeout(Duration::from_secs(config.timeout_secs))),
        }
        .map_err(|e| {
            Error::internal(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;

        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }

    fn host_config(spec: &SandboxSpec) -> bollard::models::HostConfig {
        use bollard::models::{HostConfig, HostConfigLogConfig, ResourcesUlimits};

        let limits = &spec.limits;
        let security = &spec.security;
        let memory = limits.memory_bytes as i64;

        let mut security_opt = Vec::new();
        if security.no_new_privileges() {
            security_opt.push("no-new-privileges:true".to_string());
        }

        HostConfig {
            memory: Some(memory),
            // Equal to memory: no swap on top of the ceiling.
            memory_swap: Some(memory),
            cpu_period: Some(CPU_PERIOD_US),
            cpu_quota: Some(cpu_quota_us(limits.cpu_quota)),
            pids_limit: Some(i64::from(limits.pids_limit)),
            network_mode: if security.network_disabled() {
                Some("none".to_string())
            } else {
                None
            },
            readonly_rootfs: Some(security.read_only_rootfs()),
            tmpfs: Some(HashMap::from([(
                security.scratch_dir().to_string(),
                format!(
                    "rw,exec,nosuid,nodev,size={},mode=1777",
                    security.scratch_size_bytes()
                ),
            )])),
            cap_drop: if security.drop_all_capabilities() {
                Some(vec!["ALL".to_string()])
            } else {
                None
            },
            security_opt: Some(security_opt),
            ulimits: Some(vec![ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(256),
                hard: Some(256),
            }]),
            // Bounded on-disk logs: at most two files of the retention size.
            log_config: Some(HostConfigLogConfig {
                typ: Some("json-file".to_string()),
                config: Some(HashMap::from([
                    ("max-size".to_string(), spec.log_retention_bytes.to_string()),
                    ("max-file".to_string(), "2".to_string()),
                ])),
            }),
            auto_remove: Some(false),
            ..Default::default()
        }
    }
}

/// Daemon transport picked from the configured host address.
#[derive(Debug, PartialEq, Eq)]
enum Endpoint<'a> {
    Unix(&'a str),
    Http(&'a str),
}

fn endpoint(host: &str) -> Result<Endpoint<'_>> {
    if let Some(path) = host.strip_prefix("unix://") {
        Ok(Endpoint::Unix(path))
    } else if host.starts_with('/') {
        Ok(Endpoint::Unix(host))
    } else if host.starts_with("http://") || host.starts_with("tcp://") {
        Ok(Endpoint::Http(host))
    } else {
        Err(Error::internal(format!(
            "unsupported Docker host '{}': expected unix://, tcp:// or http://",
            host
        )))
    }
}

/// CPU fraction to CFS quota, never below the 1ms the kernel accepts.
fn cpu_quota_us(fraction: f64) -> i64 {
    ((fraction * CPU_PERIOD_US as f64).round() as i64).max(1_000)
}

/// Reduce a backend failure to a caller-safe reason.
fn describe(err: &bollard::errors::Error) -> &'static str {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            "sandbox image is not available"
        }
        bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => {
            "sandbox conflicts with an existing one"
        }
        bollard::errors::Error::DockerResponseServerError { .. } => {
            "container runtime rejected the request"
        }
        _ => "container runtime is unreachable",
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<SandboxHandle> {
        use bollard::container::{Config, CreateContainerOptions};

        let container_config = Config {
            image: Some(spec.image.clone()),
            // Clear any image entrypoint so the command runs as given.
            entrypoint: Some(vec![String::new()]),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.security.scratch_dir().to_string()),
            user: Some(spec.security.user().to_string()),
            env: Some(vec![
                format!("HOME={}", spec.security.scratch_dir()),
                "LANG=C.UTF-8".to_string(),
            ]),
            network_disabled: Some(spec.security.network_disabled()),
            tty: Some(false),
            open_stdin: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(Self::host_config(spec)),
            labels: Some(HashMap::from([(
                MANAGED_BY_LABEL.0.to_string(),
                MANAGED_BY_LABEL.1.to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| {
                tracing::warn!(sandbox = %spec.name, image = %spec.image, error = %e, "Failed to create sandbox container");
                Error::sandbox_create(describe(&e))
            })?;

        for warning in &response.warnings {
            tracing::debug!(sandbox = %spec.name, warning = %warning, "Docker create warning");
        }

        tracing::info!(sandbox = %spec.name, image = %spec.image, "Sandbox container created");
        Ok(SandboxHandle::new(response.id, spec.name.clone()))
    }

    async fn start(&self, handle: &SandboxHandle) -> Result<()> {
        use bollard::container::StartContainerOptions;

        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                tracing::warn!(sandbox = %handle, error = %e, "Failed to start sandbox container");
                Error::sandbox_start(describe(&e))
            })
    }

    async fn await_completion(
        &self,
        handle: &SandboxHandle,
        deadline: Instant,
    ) -> Result<Completion> {
        use bollard::container::{InspectContainerOptions, WaitContainerOptions};

        let wait = async {
            let mut stream = self.docker.wait_container(
                &handle.id,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard reports non-zero exits as errors
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(e.to_string()),
                None => Err("wait stream ended without a status".to_string()),
            }
        };

        let exit_code = match tokio::time::timeout_at(deadline, wait).await {
            Err(_) => return Ok(Completion::TimedOut),
            Ok(Ok(code)) => code,
            Ok(Err(e)) => {
                tracing::warn!(sandbox = %handle, error = %e, "Failed waiting on sandbox container");
                return Err(Error::internal("lost track of the sandbox while waiting"));
            }
        };

        let oom_killed = match self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.oom_killed).unwrap_or(false),
            Err(e) => {
                tracing::debug!(sandbox = %handle, error = %e, "Could not inspect exited sandbox");
                false
            }
        };

        Ok(Completion::Exited {
            exit_code,
            oom_killed,
        })
    }

    async fn terminate(&self, handle: &SandboxHandle) -> Result<()> {
        use bollard::container::KillContainerOptions;

        match self
            .docker
            .kill_container(&handle.id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => {
                tracing::info!(sandbox = %handle, "Sandbox container killed");
                Ok(())
            }
            // Already exited or already gone.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => {
                tracing::warn!(sandbox = %handle, error = %e, "Failed to kill sandbox container");
                Err(Error::cleanup(describe(&e)))
            }
        }
    }

    async fn fetch_output(&self, handle: &SandboxHandle) -> Result<OutputStream> {
        use bollard::container::{LogOutput, LogsOptions};

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            ..Default::default()
        };

        let sandbox = handle.name.clone();
        let stream = self
            .docker
            .logs(&handle.id, Some(options))
            .filter_map(move |item| {
                let sandbox = sandbox.clone();
                async move {
                    match item {
                        Ok(LogOutput::StdOut { message }) => Some(Ok(OutputFrame::stdout(message))),
                        Ok(LogOutput::StdErr { message }) => Some(Ok(OutputFrame::stderr(message))),
                        Ok(_) => None, // stdin/console frames
                        Err(e) => {
                            tracing::warn!(sandbox = %sandbox, error = %e, "Sandbox log stream failed");
                            Some(Err(Error::output_capture("log stream interrupted")))
                        }
                    }
                }
            });

        Ok(stream.boxed())
    }

    async fn remove(&self, handle: &SandboxHandle) -> Result<()> {
        use bollard::container::RemoveContainerOptions;

        match self
            .docker
            .remove_container(
                &handle.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(sandbox = %handle, "Sandbox container removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                tracing::debug!(sandbox = %handle, "Sandbox container already gone");
                Ok(())
            }
            Err(e) => {
                tracing::error!(sandbox = %handle, error = %e, "Failed to remove sandbox container");
                Err(Error::cleanup(describe(&e)))
            }
        }
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SecurityOptions;
    use code_runner_core::ResourceLimits;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            name: "coderun-python-1-abc".into(),
            image: "python:3.12-slim".into(),
            command: vec!["python3".into(), "-c".into(), "print(1)".into()],
            limits: ResourceLimits {
                memory_bytes: 64 * 1024 * 1024,
                cpu_quota: 0.25,
                pids_limit: 16,
                timeout: Duration::from_secs(3),
            },
            security: SecurityOptions::hardened("65534:65534", "/sandbox", 8 * 1024 * 1024),
            log_retention_bytes: 4 * 1024 * 1024,
        }
    }

    #[test]
    fn test_host_config_is_hardened() {
        let host = DockerRuntime::host_config(&spec());
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_quota, Some(25_000));
        assert_eq!(host.pids_limit, Some(16));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        let tmpfs = host.tmpfs.unwrap();
        assert_eq!(
            tmpfs.get("/sandbox").map(String::as_str),
            Some("rw,exec,nosuid,nodev,size=8388608,mode=1777")
        );
    }

    #[test]
    fn test_host_config_bounds_backend_logs() {
        let log = DockerRuntime::host_config(&spec()).log_config.unwrap();
        assert_eq!(log.typ.as_deref(), Some("json-file"));
        let options = log.config.unwrap();
        assert_eq!(options.get("max-size").map(String::as_str), Some("4194304"));
        assert_eq!(options.get("max-file").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_endpoint_follows_scheme() {
        assert_eq!(
            endpoint("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Unix("/var/run/docker.sock")
        );
        assert_eq!(
            endpoint("/run/user/1000/docker.sock").unwrap(),
            Endpoint::Unix("/run/user/1000/docker.sock")
        );
        assert_eq!(
            endpoint("http://docker.internal:2375").unwrap(),
            Endpoint::Http("http://docker.internal:2375")
        );
        assert_eq!(
            endpoint("tcp://10.0.0.5:2375").unwrap(),
            Endpoint::Http("tcp://10.0.0.5:2375")
        );
        assert!(endpoint("https://docker.internal:2376").is_err());
    }

    #[tokio::test]
    async fn test_from_config_accepts_http_host() {
        let config = DockerConfig {
            host: Some("http://127.0.0.1:2375".into()),
            timeout_secs: 5,
        };
        assert!(DockerRuntime::from_config(&config).is_ok());
    }

    #[test]
    fn test_cpu_quota_floor() {
        assert_eq!(cpu_quota_us(1.0), 100_000);
        assert_eq!(cpu_quota_us(0.1), 10_000);
        assert_eq!(cpu_quota_us(0.001), 1_000);
    }

    #[test]
    fn test_describe_hides_backend_text() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: secret-registry/internal:tag".into(),
        };
        assert_eq!(describe(&err), "sandbox image is not available");
        assert!(is_not_found(&err));
    }
}
