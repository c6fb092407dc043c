/// Security audit events
///
/// Every event is written as one JSON object through `log` under the
/// `replbox::audit` target, so operators can route or filter it with
/// `RUST_LOG=replbox::audit=info` without a separate sink.
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

pub const AUDIT_TARGET: &str = "replbox::audit";

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of security events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityEventType {
    // Lifecycle
    ExecutionStart,
    ExecutionEnd,

    // Gate
    PatternRejected,
    UnsupportedLanguage,

    // Limits and termination
    WallTimeLimitViolation,
    OutputLimitViolation,
    GroupKilled,

    // Cleanup and orchestration
    CleanupFailure,
    OrchestrationFailure,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStart | SecurityEventType::ExecutionEnd => {
                SecuritySeverity::Low
            }
            SecurityEventType::PatternRejected => SecuritySeverity::Medium,
            SecurityEventType::UnsupportedLanguage => SecuritySeverity::Low,
            SecurityEventType::WallTimeLimitViolation => SecuritySeverity::High,
            SecurityEventType::OutputLimitViolation => SecuritySeverity::Medium,
            SecurityEventType::GroupKilled => SecuritySeverity::Medium,
            SecurityEventType::CleanupFailure => SecuritySeverity::Critical,
            SecurityEventType::OrchestrationFailure => SecuritySeverity::High,
        }
    }
}

/// Individual security event
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl SecurityEvent {
    /// Create a new security event with default severity
    pub fn new(event_type: SecurityEventType, details: String) -> Self {
        Self {
            severity: event_type.default_severity(),
            event_type,
            timestamp: Utc::now(),
            details,
            run_id: None,
            pid: None,
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Emit an event at a level matching its severity.
pub fn log_security_event(event: SecurityEvent) {
    let line = event.to_json();
    match event.severity {
        SecuritySeverity::Critical | SecuritySeverity::High => {
            error!(target: AUDIT_TARGET, "{}", line)
        }
        SecuritySeverity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
        SecuritySeverity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }
}

pub fn execution_start(run_id: &str, source_bytes: usize) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::ExecutionStart,
            format!("Execution started: {} byte(s) of source", source_bytes),
        )
        .with_run_id(run_id),
    );
}

pub fn execution_end(run_id: &str, pid: Option<u32>, outcome: &str, elapsed_ms: u128) {
    let event = SecurityEvent::new(
        SecurityEventType::ExecutionEnd,
        format!("Execution ended: outcome={}, elapsed_ms={}", outcome, elapsed_ms),
    )
    .with_run_id(run_id);
    let event = match pid {
        Some(pid) => event.with_pid(pid),
        None => event,
    };
    log_security_event(event);
}

pub fn pattern_rejected(pattern: &str) {
    log_security_event(SecurityEvent::new(
        SecurityEventType::PatternRejected,
        format!("Submission rejected on pattern {:?}", pattern),
    ));
}

pub fn unsupported_language(language: &str) {
    log_security_event(SecurityEvent::new(
        SecurityEventType::UnsupportedLanguage,
        format!("Submission rejected for language {:?}", language),
    ));
}

pub fn wall_time_limit_violation(run_id: &str, pid: u32, limit_ms: u128) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::WallTimeLimitViolation,
            format!("Wall clock limit of {}ms exceeded", limit_ms),
        )
        .with_run_id(run_id)
        .with_pid(pid),
    );
}

pub fn output_limit_violation(run_id: &str, stream: &str, written: usize, limit: usize) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::OutputLimitViolation,
            format!("{} wrote {} byte(s), bound is {}", stream, written, limit),
        )
        .with_run_id(run_id),
    );
}

pub fn group_killed(run_id: &str, pid: u32, details: String) {
    log_security_event(
        SecurityEvent::new(SecurityEventType::GroupKilled, details)
            .with_run_id(run_id)
            .with_pid(pid),
    );
}

pub fn cleanup_failure(run_id: &str, error: String) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::CleanupFailure,
            format!("Cleanup failed: {}", error),
        )
        .with_run_id(run_id),
    );
}

pub fn orchestration_failure(run_id: &str, error: String) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::OrchestrationFailure,
            format!("Orchestration failed: {}", error),
        )
        .with_run_id(run_id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_event_type() {
        let event = SecurityEvent::new(SecurityEventType::CleanupFailure, "x".to_string());
        assert_eq!(event.severity, SecuritySeverity::Critical);
        let event = SecurityEvent::new(SecurityEventType::ExecutionStart, "x".to_string());
        assert_eq!(event.severity, SecuritySeverity::Low);
    }

    #[test]
    fn events_serialize_as_single_line_json() {
        let event = SecurityEvent::new(SecurityEventType::PatternRejected, "eval(".to_string())
            .with_run_id("abc")
            .with_pid(42);
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["event_type"], "PatternRejected");
        assert_eq!(json["severity"], "Medium");
        assert_eq!(json["run_id"], "abc");
        assert_eq!(json["pid"], 42);
        assert!(!event.to_json().contains('\n'));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = SecurityEvent::new(SecurityEventType::UnsupportedLanguage, "ruby".to_string());
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert!(json.get("run_id").is_none());
        assert!(json.get("pid").is_none());
    }
}
