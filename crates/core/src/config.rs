use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::types::{ExecutionProfile, ResourceLimits};
use crate::{Error, Result};

fn invalid(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(msg.into()))
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub runner: RunnerConfig,
    pub limits: LimitsConfig,
    /// Replaces the built-in language set when non-empty.
    pub languages: Vec<ExecutionProfile>,
    pub docker: DockerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum number of simultaneously live sandboxes.
    pub max_concurrency: usize,
    /// Capture cap per output stream, in bytes.
    pub max_output_bytes: usize,
    /// Output the container backend keeps on disk per log file, in bytes.
    pub log_retention_bytes: u64,
    pub max_source_bytes: usize,
    pub max_stdin_bytes: usize,
    /// Writable tmpfs mounted in every sandbox.
    pub scratch_dir: String,
    pub scratch_size_bytes: u64,
    /// `uid:gid` the program runs as.
    pub sandbox_user: String,
    pub name_prefix: String,
    pub cleanup_timeout_ms: u64,
    /// Extra time allowed for log retrieval past the execution deadline.
    pub output_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_output_bytes: 64 * 1024,
            log_retention_bytes: 16 * 1024 * 1024, // 16MB
            max_source_bytes: 64 * 1024,
            max_stdin_bytes: 64 * 1024,
            scratch_dir: "/sandbox".into(),
            scratch_size_bytes: 64 * 1024 * 1024, // 64MB
            sandbox_user: "65534:65534".into(),
            name_prefix: "coderun".into(),
            cleanup_timeout_ms: 10_000,
            output_grace_ms: 2_000,
        }
    }
}

impl RunnerConfig {
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    pub fn output_grace(&self) -> Duration {
        Duration::from_millis(self.output_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Applied when a request carries no override.
    pub default: ResourceLimits,
    /// Highest values an override may request.
    pub max: ResourceLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default: ResourceLimits::default(),
            max: ResourceLimits::default_ceiling(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DockerConfig {
    /// Daemon address (`unix://...`, `tcp://...` or `http://...`); local defaults when unset.
    pub host: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,code_runner=debug".into(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load layered configuration: `config/default`, `config/{CODE_RUNNER_ENV}`,
    /// an optional explicit file, then `CODE_RUNNER__*` environment variables.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("CODE_RUNNER_ENV").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let s = builder
            // Map CODE_RUNNER__RUNNER__MAX_CONCURRENCY=8 to runner.max_concurrency
            .add_source(Environment::with_prefix("CODE_RUNNER").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Profiles the registry should be built from.
    pub fn language_profiles(&self) -> Vec<ExecutionProfile> {
        if self.languages.is_empty() {
            ExecutionProfile::builtin()
        } else {
            self.languages.clone()
        }
    }

    /// Reject values that cannot produce a working engine.
    pub fn validate(&self) -> Result<()> {
        let runner = &self.runner;
        if runner.max_concurrency == 0 {
            return Err(invalid("runner.max_concurrency must be at least 1"));
        }
        if runner.max_output_bytes == 0 {
            return Err(invalid("runner.max_output_bytes must be at least 1"));
        }
        // Backend log lines carry framing overhead on top of the payload.
        let min_retention = 8 * runner.max_output_bytes as u64;
        if runner.log_retention_bytes < min_retention {
            return Err(invalid(format!(
                "runner.log_retention_bytes must be at least {} (8x max_output_bytes)",
                min_retention
            )));
        }
        // Source and stdin travel as single process arguments.
        const MAX_ARG_BYTES: usize = 128 * 1024;
        if runner.max_source_bytes == 0 || runner.max_source_bytes >= MAX_ARG_BYTES {
            return Err(invalid(format!(
                "runner.max_source_bytes must be between 1 and {}",
                MAX_ARG_BYTES - 1
            )));
        }
        if runner.max_stdin_bytes >= MAX_ARG_BYTES {
            return Err(invalid(format!(
                "runner.max_stdin_bytes must be below {}",
                MAX_ARG_BYTES
            )));
        }
        if !runner.scratch_dir.starts_with('/') || runner.scratch_dir.contains("..") {
            return Err(invalid(
                "runner.scratch_dir must be an absolute path",
            ));
        }
        if runner.name_prefix.is_empty()
            || !runner
                .name_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(
                "runner.name_prefix must be non-empty and alphanumeric",
            ));
        }
        if let Some(host) = &self.docker.host {
            let supported = ["unix://", "/", "tcp://", "http://"];
            if !supported.iter().any(|scheme| host.starts_with(scheme)) {
                return Err(invalid(format!(
                    "docker.host '{}' must use unix://, tcp:// or http://",
                    host
                )));
            }
        }
        // A client-side timeout while waiting would hide an execution timeout.
        if self.limits.max.timeout >= Duration::from_secs(self.docker.timeout_secs) {
            return Err(invalid(format!(
                "docker.timeout_secs ({}) must exceed limits.max timeout ({} ms)",
                self.docker.timeout_secs,
                self.limits.max.timeout.as_millis()
            )));
        }
        self.limits
            .max
            .check_minimums()
            .map_err(|e| invalid(format!("limits.max: {}", e)))?;
        self.limits
            .default
            .check_within(&self.limits.max)
            .map_err(|e| invalid(format!("limits.default: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.runner.max_concurrency, 4);
        assert_eq!(config.runner.scratch_dir, "/sandbox");
        assert_eq!(config.language_profiles().len(), 4);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.runner.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_default_limits_above_ceiling() {
        let mut config = AppConfig::default();
        config.limits.default.pids_limit = config.limits.max.pids_limit + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_log_retention_below_capture_cap() {
        let mut config = AppConfig::default();
        config.runner.log_retention_bytes = config.runner.max_output_bytes as u64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_docker_timeout_not_above_execution_ceiling() {
        let mut config = AppConfig::default();
        config.limits.max.timeout = Duration::from_secs(config.docker.timeout_secs);
        assert!(config.validate().is_err());

        config.docker.timeout_secs += 1;
        config.validate().unwrap();
    }

    #[test]
    fn test_docker_host_scheme_is_checked() {
        let mut config = AppConfig::default();
        config.docker.host = Some("tcp://10.0.0.5:2375".into());
        config.validate().unwrap();

        config.docker.host = Some("ssh://builder".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_source_cap_above_argument_limit() {
        let mut config = AppConfig::default();
        config.runner.max_source_bytes = 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configured_languages_replace_builtin() {
        let mut config = AppConfig::default();
        config.languages = vec![ExecutionProfile {
            language: "ruby".into(),
            aliases: vec![],
            image: "ruby:3".into(),
            source_file: None,
            compile: None,
            run: vec!["ruby".into(), "-e".into(), "{code}".into()],
        }];
        let profiles = config.language_profiles();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].language, "ruby");
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("code-runner-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runner.toml");
        std::fs::write(
            &path,
            "[runner]\nmax_concurrency = 9\n\n[limits.default]\nmemory_bytes = 33554432\ncpu_quota = 0.25\npids_limit = 16\ntimeout_ms = 3000\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.runner.max_concurrency, 9);
        assert_eq!(config.runner.max_output_bytes, 64 * 1024);
        assert_eq!(config.limits.default.timeout, Duration::from_secs(3));
        assert_eq!(config.limits.default.pids_limit, 16);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
