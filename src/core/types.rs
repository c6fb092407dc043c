use crate::config::types::ResourceLimits;
use crate::utils::output::OutputResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to launch one constrained child.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// argv, program first
    pub command: Vec<String>,
    pub stdin_data: Option<String>,
    pub environment: Vec<(String, String)>,
    /// Private to this run. Processes still running from it once the group
    /// is gone are treated as escaped and killed.
    pub workdir: PathBuf,
    pub limits: ResourceLimits,
}

/// Signal escalation report for timeout/forced termination paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    /// Processes outside the group killed for running from the workdir
    pub escaped_killed: usize,
    pub notes: Vec<String>,
}

/// What the supervisor observed about one child.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub wall_time: Duration,
    /// `None` when the run timed out; partial output is discarded
    pub output: Option<OutputResult>,
    pub kill_report: Option<KillReport>,
}
