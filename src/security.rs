/// Security pre-filters: source denylist, interpreter resolution, and file name validation
///
/// None of these checks is an isolation boundary. They reject obviously hostile
/// input early; the rlimits and process-group supervision in `exec` are what
/// actually bound a run.
use crate::config::types::{ReplboxError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Security error types for validation failures
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Invalid interpreter path: {0}")]
    InvalidInterpreter(String),

    #[error("Path traversal attack detected")]
    PathTraversal,

    #[error("File name is empty")]
    EmptyName,

    #[error("File name too long ({0} bytes)")]
    NameTooLong(usize),

    #[error("File name contains forbidden character {0:?}")]
    ForbiddenCharacter(char),
}

impl From<SecurityError> for ReplboxError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::InvalidInterpreter(_) => ReplboxError::Config(err.to_string()),
            other => ReplboxError::InvalidName(other.to_string()),
        }
    }
}

/// First denylisted pattern found in a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RejectedPattern {
    pub pattern: &'static str,
}

impl fmt::Display for RejectedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern)
    }
}

impl From<RejectedPattern> for ReplboxError {
    fn from(rejected: RejectedPattern) -> Self {
        ReplboxError::RejectedPattern(rejected.pattern)
    }
}

/// Best-effort textual denylist over raw submissions.
///
/// Trivially bypassable through string building, aliasing or encoding. Treat a
/// clean scan as "nothing obvious", never as "safe".
pub mod pattern_gate {
    use super::RejectedPattern;

    /// Matched against the case-folded source. Order is part of the contract:
    /// the first hit in this order is the one reported.
    pub static DENYLIST: &[&str] = &[
        "__import__",
        "eval(",
        "exec(",
        "compile(",
        "open(",
        "file(",
        "input(",
        "raw_input(",
        "subprocess",
        "os.system",
        "os.popen",
        "import os",
        "import subprocess",
        "import sys",
    ];

    /// Scan raw (unprepared) source for the first denylisted pattern.
    pub fn scan(code: &str) -> Result<(), RejectedPattern> {
        let folded = code.to_lowercase();
        match DENYLIST.iter().copied().find(|pattern| folded.contains(pattern)) {
            Some(pattern) => Err(RejectedPattern { pattern }),
            None => Ok(()),
        }
    }
}

/// Interpreter resolution against a fixed set of system directories
pub mod command_validation {
    use super::*;

    const SECURE_PATHS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

    /// Resolve the interpreter to an absolute, canonical executable path.
    ///
    /// Bare names are looked up in [`SECURE_PATHS`] only, never in the
    /// service's inherited `PATH`.
    pub fn resolve_interpreter(command: &str) -> Result<PathBuf> {
        if command.is_empty() {
            return Err(SecurityError::InvalidInterpreter("empty command".to_string()).into());
        }
        if command.contains("..") || command.contains('~') {
            return Err(SecurityError::PathTraversal.into());
        }

        let resolved = if command.starts_with('/') {
            PathBuf::from(command)
        } else if command.contains('/') {
            return Err(SecurityError::InvalidInterpreter(format!(
                "relative paths are not allowed: {}",
                command
            ))
            .into());
        } else {
            resolve_in_secure_path(command)?
        };

        let canonical = resolved.canonicalize().map_err(|e| {
            SecurityError::InvalidInterpreter(format!("cannot resolve {}: {}", command, e))
        })?;
        if !canonical.is_file() {
            return Err(SecurityError::InvalidInterpreter(format!(
                "not a file: {}",
                canonical.display()
            ))
            .into());
        }

        Ok(canonical)
    }

    fn resolve_in_secure_path(command: &str) -> Result<PathBuf> {
        for dir in SECURE_PATHS {
            let candidate = Path::new(dir).join(command);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(SecurityError::InvalidInterpreter(format!(
            "command not found in secure PATH: {}",
            command
        ))
        .into())
    }
}

/// File name validation for the persistence store
pub mod path_validation {
    use super::*;

    const MAX_NAME_BYTES: usize = 255;

    /// Accept only a single, plain path component.
    pub fn validate_file_name(name: &str) -> Result<&str> {
        if name.is_empty() {
            return Err(SecurityError::EmptyName.into());
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(SecurityError::NameTooLong(name.len()).into());
        }
        if name == "." || name == ".." || name.contains("..") {
            return Err(SecurityError::PathTraversal.into());
        }
        if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
            return Err(SecurityError::ForbiddenCharacter(c).into());
        }

        Ok(name)
    }

    /// Validate `name` and join it onto `base`.
    pub fn resolve_in(base: &Path, name: &str) -> Result<PathBuf> {
        Ok(base.join(validate_file_name(name)?))
    }
}
