// Startup config validation: fail fast with actionable errors

use crate::config::settings::ServiceConfig;
use crate::config::types::{ReplboxError, Result};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate config at startup. Errors are fatal; warnings are returned.
pub fn validate_config(config: &ServiceConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::default();
    let limits = &config.limits;

    if limits.max_wall_clock_secs == 0 {
        result.add_error("max_wall_clock_secs cannot be zero".to_string());
    }
    if limits.max_cpu_secs == 0 {
        result.add_error("max_cpu_secs cannot be zero".to_string());
    }
    if limits.max_memory_bytes == 0 {
        result.add_error("max_memory_bytes cannot be zero".to_string());
    } else if limits.max_memory_bytes < 32 * 1024 * 1024 {
        result.add_warning(format!(
            "max_memory_bytes {} is very low (< 32MB), the interpreter may fail to start",
            limits.max_memory_bytes
        ));
    }
    if limits.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }
    if limits.max_cpu_secs > limits.max_wall_clock_secs {
        result.add_warning(format!(
            "max_cpu_secs ({}) exceeds max_wall_clock_secs ({}), the CPU ceiling can never trigger",
            limits.max_cpu_secs, limits.max_wall_clock_secs
        ));
    }

    if config.python.trim().is_empty() {
        result.add_error("python interpreter path cannot be empty".to_string());
    }
    if config.scratch_root.as_os_str().is_empty() {
        result.add_error("scratch_root cannot be empty".to_string());
    } else if config.scratch_root.is_relative() {
        result.add_warning(format!(
            "scratch_root {} is relative to the service working directory",
            config.scratch_root.display()
        ));
    }

    if !result.is_valid() {
        return Err(ReplboxError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let result = validate_config(&ServiceConfig::default()).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn zero_limits_fail_fast() {
        let mut config = ServiceConfig::default();
        config.limits.max_wall_clock_secs = 0;
        config.limits.max_output_bytes = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("max_wall_clock_secs cannot be zero"));
        assert!(err.contains("max_output_bytes cannot be zero"));
    }

    #[test]
    fn cpu_above_wall_is_a_warning() {
        let mut config = ServiceConfig::default();
        config.limits.max_cpu_secs = 30;

        let result = validate_config(&config).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("can never trigger"));
    }
}
