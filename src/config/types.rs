/// Core types and structures for the replbox system
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Process-wide execution ceilings.
///
/// Fixed for the life of the service; requests cannot override them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Orchestrator-side wall clock deadline (seconds)
    pub max_wall_clock_secs: u64,
    /// Kernel-enforced CPU time ceiling (seconds, RLIMIT_CPU)
    pub max_cpu_secs: u64,
    /// Kernel-enforced address space ceiling (bytes, RLIMIT_AS)
    pub max_memory_bytes: u64,
    /// Captured stdout bound before the truncation marker (bytes)
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_wall_clock_secs: 10,
            max_cpu_secs: 10,
            max_memory_bytes: 128 * 1024 * 1024, // 128MB
            max_output_bytes: 1024 * 1024,       // 1MB
        }
    }
}

impl ResourceLimits {
    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.max_wall_clock_secs)
    }
}

/// Languages the engine knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ReplboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "python" => Ok(Language::Python),
            other => Err(ReplboxError::UnsupportedLanguage(other.to_string())),
        }
    }
}

fn default_language() -> String {
    Language::Python.as_str().to_string()
}

/// Execution request as received from the gateway.
///
/// `language` stays a raw string here so unsupported values can be rejected
/// with the offending name instead of failing deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, alias = "input")]
    pub input_data: Option<String>,
}

impl ExecutionRequest {
    pub fn python(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: default_language(),
            input_data: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input_data = Some(input.into());
        self
    }
}

/// Which terminal path produced an [`ExecutionOutcome`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Child exited with status 0 and wrote nothing to stderr
    Completed,
    /// Child ran but exited non-zero, died on a signal, or wrote to stderr
    RuntimeError,
    /// Wall clock deadline hit; the process group was killed
    Timeout,
    /// Spawn or I/O failure on our side, not the user's code
    OrchestrationFailure,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Completed => write!(f, "completed"),
            OutcomeKind::RuntimeError => write!(f, "runtime_error"),
            OutcomeKind::Timeout => write!(f, "timeout"),
            OutcomeKind::OrchestrationFailure => write!(f, "orchestration_failure"),
        }
    }
}

/// Result of one execution attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub kind: OutcomeKind,
    /// Normalized, size-bounded standard output
    pub stdout: String,
    /// Error text returned to the caller (stderr, timeout or failure message)
    pub stderr: Option<String>,
    /// Wall clock time from request acceptance to outcome
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// Root pid of the run, when a child was spawned
    pub pid: Option<u32>,
    pub stdout_truncated: bool,
}

impl ExecutionOutcome {
    pub fn timeout(duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::Timeout,
            stdout: String::new(),
            stderr: Some(TIMEOUT_MESSAGE.to_string()),
            duration,
            exit_code: None,
            signal: None,
            pid: None,
            stdout_truncated: false,
        }
    }

    pub fn orchestration_failure(err: &ReplboxError, duration: Duration) -> Self {
        Self {
            kind: OutcomeKind::OrchestrationFailure,
            stdout: String::new(),
            stderr: Some(format!("Execution error: {}", err)),
            duration,
            exit_code: None,
            signal: None,
            pid: None,
            stdout_truncated: false,
        }
    }

    pub fn to_response(&self) -> ExecutionResponse {
        ExecutionResponse {
            output: self.stdout.clone(),
            error: self.stderr.clone(),
            execution_time: Some(self.duration.as_secs_f64()),
        }
    }
}

/// Wire shape returned by `/execute` and by `replbox run`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub output: String,
    pub error: Option<String>,
    pub execution_time: Option<f64>,
}

pub const TIMEOUT_MESSAGE: &str = "Execution timeout: Code exceeded maximum execution time";

/// Appended after stdout/stderr that exceeded the output bound.
pub const TRUNCATION_MARKER: &str = "\n... (output truncated)";

/// Custom error types for replbox
#[derive(Error, Debug)]
pub enum ReplboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Code contains restricted operations: {0}")]
    RejectedPattern(&'static str),

    #[error("Language '{0}' is not supported yet. Only 'python' is supported.")]
    UnsupportedLanguage(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

impl ReplboxError {
    /// Rejections happen before anything runs and are the caller's fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ReplboxError::RejectedPattern(_) | ReplboxError::UnsupportedLanguage(_)
        )
    }
}

impl From<nix::errno::Errno> for ReplboxError {
    fn from(err: nix::errno::Errno) -> Self {
        ReplboxError::Process(err.to_string())
    }
}

/// Result type alias for replbox operations
pub type Result<T> = std::result::Result<T, ReplboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_service_constants() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_wall_clock_secs, 10);
        assert_eq!(limits.max_cpu_secs, 10);
        assert_eq!(limits.max_memory_bytes, 128 * 1024 * 1024);
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn only_python_is_a_language() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        let err = "ruby".parse::<Language>().unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(
            err.to_string(),
            "Language 'ruby' is not supported yet. Only 'python' is supported."
        );
    }

    #[test]
    fn request_defaults_language_and_accepts_input_alias() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"code": "1", "input": "abc"}"#).unwrap();
        assert_eq!(req.language, "python");
        assert_eq!(req.input_data.as_deref(), Some("abc"));
    }

    #[test]
    fn response_carries_seconds() {
        let outcome = ExecutionOutcome::timeout(Duration::from_millis(1500));
        let response = outcome.to_response();
        assert_eq!(response.output, "");
        assert_eq!(response.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(response.execution_time, Some(1.5));
    }

    #[test]
    fn orchestration_errors_are_not_rejections() {
        let err = ReplboxError::Process("spawn failed".to_string());
        assert!(!err.is_rejection());
        let outcome = ExecutionOutcome::orchestration_failure(&err, Duration::ZERO);
        assert_eq!(
            outcome.stderr.as_deref(),
            Some("Execution error: Process error: spawn failed")
        );
    }
}
