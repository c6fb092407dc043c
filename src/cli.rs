use crate::config::settings::{megabytes_to_bytes, ServiceConfig};
use crate::config::types::{ExecutionRequest, OutcomeKind};
use crate::runtime::{Runtime, Submission};
use crate::safety::ScratchDir;
use crate::security::{command_validation, pattern_gate};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Process exit codes for `replbox run`.
pub mod exit_code {
    pub const COMPLETED: i32 = 0;
    pub const RUNTIME_ERROR: i32 = 1;
    pub const REJECTED: i32 = 2;
    pub const ORCHESTRATION_FAILURE: i32 = 3;
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (default: environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    limits: LimitOverrides,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct LimitOverrides {
    /// Wall clock limit in seconds
    #[arg(long, global = true)]
    wall_time: Option<u64>,
    /// CPU limit in seconds
    #[arg(long, global = true)]
    cpu: Option<u64>,
    /// Memory limit in MB
    #[arg(long, global = true)]
    mem: Option<u64>,
    /// Output limit in bytes
    #[arg(long, global = true)]
    max_output: Option<usize>,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Source code as string
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    code: Option<String>,
    /// Read source code from a file
    #[arg(long)]
    file: Option<PathBuf>,
}

impl SourceArgs {
    fn read(&self) -> Result<String> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(code.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display())),
            (None, None) => anyhow::bail!("either --code or --file is required"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Bind address (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Execute one submission and print the JSON response
    Run {
        #[command(flatten)]
        source: SourceArgs,
        /// Input data to pass to stdin
        #[arg(long)]
        stdin: Option<String>,
        /// Submission language
        #[arg(long, default_value = "python")]
        language: String,
    },
    /// Print the source as it would be executed
    Prepare {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Report the first restricted pattern in a submission
    Scan {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Check that the configured interpreter is installed and runnable
    CheckDeps {
        /// Verbose output showing detailed version information
        #[arg(long)]
        verbose: bool,
    },
    /// Remove script files left behind by crashed runs
    Sweep {
        /// Minimum age in seconds of a file to remove
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
    },
}

fn load_config(path: Option<&PathBuf>, overrides: &LimitOverrides) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => ServiceConfig::load_from_file(path)?,
        None => ServiceConfig::from_env()?,
    };

    if let Some(wall) = overrides.wall_time {
        config.limits.max_wall_clock_secs = wall;
    }
    if let Some(cpu) = overrides.cpu {
        config.limits.max_cpu_secs = cpu;
    }
    if let Some(mem_mb) = overrides.mem {
        config.limits.max_memory_bytes = megabytes_to_bytes(mem_mb)?;
    }
    if let Some(max_output) = overrides.max_output {
        config.limits.max_output_bytes = max_output;
    }
    Ok(config)
}

pub fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref(), &cli.limits)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(crate::server::serve(config))
        }
        Commands::Run {
            source,
            stdin,
            language,
        } => {
            let request = ExecutionRequest {
                code: source.read()?,
                language,
                input_data: stdin,
            };
            let code = execute_once(&config, request)?;
            std::process::exit(code);
        }
        Commands::Prepare { source } => {
            let code = source.read()?;
            let prepared = Submission::new(ExecutionRequest::python(code))
                .validate()?
                .prepare();
            println!("{}", prepared.source());
            Ok(())
        }
        Commands::Scan { source } => {
            let code = source.read()?;
            match pattern_gate::scan(&code) {
                Ok(()) => println!("clean"),
                Err(rejected) => {
                    println!("{}", rejected);
                    std::process::exit(exit_code::REJECTED);
                }
            }
            Ok(())
        }
        Commands::CheckDeps { verbose } => check_dependencies(&config, verbose),
        Commands::Sweep { max_age_secs } => {
            let scratch = ScratchDir::new(config.scratch_dir())?;
            let removed = scratch.sweep_stale(Duration::from_secs(max_age_secs))?;
            println!("Removed {} stale file(s) from {}", removed, scratch.path().display());
            Ok(())
        }
    }
}

/// Run one request, print the response, and return the process exit code.
fn execute_once(config: &ServiceConfig, request: ExecutionRequest) -> Result<i32> {
    let runtime = Runtime::from_config(config)?;

    let outcome = match runtime.handle(request) {
        Ok(outcome) => outcome,
        Err(e) if e.is_rejection() => {
            println!("{}", serde_json::json!({ "detail": e.to_string() }));
            return Ok(exit_code::REJECTED);
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&outcome.to_response())?);
    Ok(match outcome.kind {
        OutcomeKind::Completed => exit_code::COMPLETED,
        OutcomeKind::RuntimeError | OutcomeKind::Timeout => exit_code::RUNTIME_ERROR,
        OutcomeKind::OrchestrationFailure => exit_code::ORCHESTRATION_FAILURE,
    })
}

fn check_dependencies(config: &ServiceConfig, verbose: bool) -> Result<()> {
    use std::process::Command;

    println!("Checking interpreter dependencies...");

    let interpreter = match command_validation::resolve_interpreter(&config.python) {
        Ok(path) => path,
        Err(e) => {
            println!("Python - MISSING ({})", e);
            anyhow::bail!("interpreter {} is not available", config.python);
        }
    };

    let output = Command::new(&interpreter)
        .arg("--version")
        .output()
        .with_context(|| format!("Failed to run {}", interpreter.display()))?;
    if !output.status.success() {
        println!("Python - FAILED");
        anyhow::bail!("{} --version exited with {}", interpreter.display(), output.status);
    }

    println!("Python - OK");
    if verbose {
        let version = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            String::from_utf8_lossy(&output.stdout)
        };
        println!(
            "  {} -> {}",
            interpreter.display(),
            version.lines().next().unwrap_or("").trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn limit_overrides_apply_on_top_of_config() {
        let cli = Cli::try_parse_from([
            "replbox", "run", "--code", "1", "--wall-time", "2", "--mem", "64",
        ])
        .unwrap();
        let config = load_config(None, &cli.limits).unwrap();
        assert_eq!(config.limits.max_wall_clock_secs, 2);
        assert_eq!(config.limits.max_memory_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn oversized_memory_override_is_an_error() {
        let cli = Cli::try_parse_from([
            "replbox", "run", "--code", "1", "--mem", "18446744073709551615",
        ])
        .unwrap();
        let err = load_config(None, &cli.limits).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
    }

    #[test]
    fn run_requires_some_source() {
        assert!(Cli::try_parse_from(["replbox", "run"]).is_err());
        assert!(Cli::try_parse_from(["replbox", "run", "--code", "1", "--file", "x.py"]).is_err());
    }
}
