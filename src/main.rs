#![deny(unused)]
//! code-runner - sandboxed multi-language code execution
//!
//! Runs untrusted programs in single-use, network-isolated containers and
//! prints the captured result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use code_runner_core::config::AppConfig;
use code_runner_core::{ExecutionRequest, ResourceLimitsOverride};
use code_runner_sandbox::{DockerRuntime, ExecutionService, LanguageRegistry, SandboxRuntime};
use tokio_util::sync::CancellationToken;

/// code-runner - sandboxed code execution engine
#[derive(Parser)]
#[command(name = "code-runner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "CODE_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program in a sandbox
    Run(RunArgs),

    /// List supported languages
    Languages,

    /// Check configuration and container runtime
    Doctor,
}

#[derive(Args)]
struct RunArgs {
    /// Language identifier or alias
    #[arg(short, long)]
    language: String,

    /// Source file to run
    #[arg(short, long)]
    file: PathBuf,

    /// File fed to the program's standard input
    #[arg(long)]
    stdin_file: Option<PathBuf>,

    /// Wall-clock limit in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Memory ceiling in bytes
    #[arg(long)]
    memory_bytes: Option<u64>,

    /// CPU quota as a fraction of one core
    #[arg(long)]
    cpu_quota: Option<f64>,

    /// Maximum number of processes
    #[arg(long)]
    pids_limit: Option<u32>,
}

impl RunArgs {
    fn limits(&self) -> Option<ResourceLimitsOverride> {
        let limits = ResourceLimitsOverride {
            memory_bytes: self.memory_bytes,
            cpu_quota: self.cpu_quota,
            pids_limit: self.pids_limit,
            timeout_ms: self.timeout_ms,
        };
        (limits != ResourceLimitsOverride::default()).then_some(limits)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.json_logs {
        config.logging.json = true;
    }
    code_runner_telemetry::configure_tracing(&config.logging)?;

    tracing::debug!("Starting code-runner v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => run(&config, args).await,
        Commands::Languages => languages(&config),
        Commands::Doctor => doctor(&config).await,
    }
}

async fn run(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let stdin = match &args.stdin_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let mut request = ExecutionRequest::new(args.language.as_str(), source);
    request.stdin = stdin;
    request.limits = args.limits();

    // One client for the whole process.
    let runtime = Arc::new(DockerRuntime::from_config(&config.docker)?);
    let service = ExecutionService::from_config(config, runtime)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling execution");
            on_interrupt.cancel();
        }
    });

    match service.execute_with_cancellation(request, cancel).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            let body = serde_json::json!({
                "error": e.kind(),
                "message": e.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(if e.is_client_error() { 2 } else { 1 });
        }
    }
}

fn languages(config: &AppConfig) -> anyhow::Result<()> {
    let registry = LanguageRegistry::new(config.language_profiles())?;
    for language in registry.languages() {
        let profile = registry.resolve(&language)?;
        let kind = if profile.is_compiled() { "compiled" } else { "interpreted" };
        let aliases = if profile.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", profile.aliases.join(", "))
        };
        println!("{:<10} {:<12} {}{}", language, kind, profile.image, aliases);
    }
    Ok(())
}

async fn doctor(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!("✓ configuration is valid");

    let registry = LanguageRegistry::new(config.language_profiles())?;
    println!("✓ {} language profiles: {}", registry.len(), registry.languages().join(", "));

    let runtime = DockerRuntime::from_config(&config.docker)?;
    if runtime.is_available().await {
        println!("✓ container runtime is reachable");
        Ok(())
    } else {
        anyhow::bail!("container runtime is not reachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "code-runner",
            "run",
            "--language",
            "python",
            "--file",
            "main.py",
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.language, "python");
                assert_eq!(args.file, PathBuf::from("main.py"));
                assert!(args.stdin_file.is_none());
                let limits = args.limits().unwrap();
                assert_eq!(limits.timeout_ms, Some(500));
                assert_eq!(limits.memory_bytes, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_without_overrides_has_no_limits() {
        let cli = Cli::try_parse_from(["code-runner", "run", "-l", "c", "-f", "main.c"]).unwrap();
        match cli.command {
            Commands::Run(args) => assert!(args.limits().is_none()),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_language() {
        assert!(Cli::try_parse_from(["code-runner", "run", "--file", "main.py"]).is_err());
    }

    #[test]
    fn test_parse_languages_and_doctor() {
        let cli = Cli::try_parse_from(["code-runner", "languages"]).unwrap();
        assert!(matches!(cli.command, Commands::Languages));

        let cli = Cli::try_parse_from(["code-runner", "--json-logs", "doctor"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Doctor));
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["code-runner", "-c", "runner.toml", "languages"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("runner.toml")));
    }
}
