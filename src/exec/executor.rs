/// Sandboxed execution of prepared source
use crate::config::settings::ServiceConfig;
use crate::config::types::{ExecutionOutcome, OutcomeKind, ResourceLimits, Result};
use crate::config::validator::validate_config;
use crate::core::supervisor;
use crate::core::types::{ExecutionProfile, LaunchOutcome};
use crate::judge::LanguageAdapter;
use crate::observability::audit;
use crate::safety::ScratchDir;
use crate::security::command_validation;
use crate::transform::PreparedSource;
use crate::utils::output::{normalize_stderr, normalize_stdout};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Runs prepared source under the service's limits.
///
/// `execute` never fails: orchestration faults come back as an
/// [`OutcomeKind::OrchestrationFailure`] outcome.
pub struct Executor {
    scratch: ScratchDir,
    interpreter: PathBuf,
    limits: ResourceLimits,
}

impl Executor {
    /// Validate the configuration, resolve the interpreter and create the
    /// scratch directory.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let validation = validate_config(config)?;
        for warning in validation.warnings {
            log::warn!("Configuration warning: {}", warning);
        }

        let interpreter = command_validation::resolve_interpreter(&config.python)?;
        let scratch = ScratchDir::new(config.scratch_dir())?;
        log::info!(
            "Executor ready: interpreter={}, scratch={}",
            interpreter.display(),
            scratch.path().display()
        );

        Ok(Self::from_parts(scratch, interpreter, config.limits))
    }

    pub fn from_parts(scratch: ScratchDir, interpreter: PathBuf, limits: ResourceLimits) -> Self {
        Self {
            scratch,
            interpreter,
            limits,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn execute(
        &self,
        adapter: &dyn LanguageAdapter,
        prepared: &PreparedSource,
        input: Option<&str>,
    ) -> ExecutionOutcome {
        self.execute_since(Instant::now(), adapter, prepared, input)
    }

    /// Like [`Executor::execute`], with the duration and wall clock deadline
    /// counted from `started` instead of now.
    pub fn execute_since(
        &self,
        started: Instant,
        adapter: &dyn LanguageAdapter,
        prepared: &PreparedSource,
        input: Option<&str>,
    ) -> ExecutionOutcome {
        let script = match self
            .scratch
            .create_file(adapter.source_extension(), prepared.as_ref())
        {
            Ok(script) => script,
            Err(e) => {
                log::error!("Failed to write script: {}", e);
                return ExecutionOutcome::orchestration_failure(&e, started.elapsed());
            }
        };
        let run_id = script.run_id().to_string();
        audit::execution_start(&run_id, prepared.as_str().len());

        let profile = ExecutionProfile {
            command: adapter.run_command(&self.interpreter, script.path()),
            stdin_data: input.map(str::to_string),
            environment: adapter.environment(script.dir()),
            workdir: script.dir().to_path_buf(),
            limits: self.limits,
        };
        let launched = supervisor::launch(&profile, &run_id, started);

        // Remove the run directory before the clock stops so cleanup is part
        // of the run.
        drop(script);

        let outcome = match launched {
            Ok(launched) => self.outcome_from(&run_id, launched, started),
            Err(e) => {
                audit::orchestration_failure(&run_id, e.to_string());
                ExecutionOutcome::orchestration_failure(&e, started.elapsed())
            }
        };

        audit::execution_end(
            &run_id,
            outcome.pid,
            &outcome.kind.to_string(),
            outcome.duration.as_millis(),
        );
        outcome
    }

    fn outcome_from(&self, run_id: &str, launched: LaunchOutcome, started: Instant) -> ExecutionOutcome {
        let duration = started.elapsed();

        if launched.timed_out {
            let mut outcome = ExecutionOutcome::timeout(duration);
            outcome.pid = Some(launched.pid);
            outcome.exit_code = launched.exit_code;
            outcome.signal = launched.signal;
            return outcome;
        }

        let limit = self.limits.max_output_bytes;
        let output = launched.output.unwrap_or_default();
        let (stdout, stdout_truncated) = normalize_stdout(&output.stdout, limit);
        let (stderr, stderr_truncated) = normalize_stderr(&output.stderr, limit);
        if stdout_truncated {
            audit::output_limit_violation(run_id, "stdout", output.stdout.total_bytes, limit);
        }
        if stderr_truncated {
            audit::output_limit_violation(run_id, "stderr", output.stderr.total_bytes, limit);
        }

        let error = if !stderr.is_empty() {
            Some(stderr)
        } else {
            launched
                .signal
                .map(|signal| format!("Process terminated by signal {}", signal))
        };

        let kind = if error.is_none() && launched.exit_code == Some(0) {
            OutcomeKind::Completed
        } else {
            OutcomeKind::RuntimeError
        };

        ExecutionOutcome {
            kind,
            stdout,
            stderr: error,
            duration,
            exit_code: launched.exit_code,
            signal: launched.signal,
            pid: Some(launched.pid),
            stdout_truncated,
        }
    }
}
