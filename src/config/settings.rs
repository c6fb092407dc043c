/// Service configuration loading (environment or JSON file)
use crate::config::types::{ReplboxError, ResourceLimits, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Process-wide service configuration.
///
/// | Env Var                    | Default                          |
/// |----------------------------|----------------------------------|
/// | `HOST`                     | `0.0.0.0`                        |
/// | `PORT`                     | `8001`                           |
/// | `REPLBOX_SCRATCH_DIR`      | `$TMPDIR/replbox-uid-<euid>`     |
/// | `REPLBOX_PYTHON`           | `python3`                        |
/// | `USER_FILES_VOLUME`        | `/app/user_files`                |
/// | `REPLBOX_WALL_SECS`        | `10`                             |
/// | `REPLBOX_CPU_SECS`         | `10`                             |
/// | `REPLBOX_MEMORY_MB`        | `128`                            |
/// | `REPLBOX_MAX_OUTPUT_BYTES` | `1048576`                        |
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Root under which per-process scratch files are written
    pub scratch_root: PathBuf,
    /// Interpreter executable (absolute path or resolved through PATH)
    pub python: String,
    /// Directory backing the file persistence endpoints
    pub user_files_dir: PathBuf,
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            scratch_root: Self::runtime_root_dir(),
            python: "python3".to_string(),
            user_files_dir: PathBuf::from("/app/user_files"),
            limits: ResourceLimits::default(),
        }
    }
}

impl ServiceConfig {
    /// Runtime root directory scoped by effective UID.
    /// Prevents root and non-root services from colliding on a shared temp dir.
    pub fn runtime_root_dir() -> PathBuf {
        let euid = nix::unistd::geteuid();
        std::env::temp_dir().join(format!("replbox-uid-{}", euid))
    }

    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let limits = ResourceLimits {
            max_wall_clock_secs: env_parse("REPLBOX_WALL_SECS")?
                .unwrap_or(defaults.limits.max_wall_clock_secs),
            max_cpu_secs: env_parse("REPLBOX_CPU_SECS")?.unwrap_or(defaults.limits.max_cpu_secs),
            max_memory_bytes: env_parse::<u64>("REPLBOX_MEMORY_MB")?
                .map(megabytes_to_bytes)
                .transpose()?
                .unwrap_or(defaults.limits.max_memory_bytes),
            max_output_bytes: env_parse("REPLBOX_MAX_OUTPUT_BYTES")?
                .unwrap_or(defaults.limits.max_output_bytes),
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT")?.unwrap_or(defaults.port),
            scratch_root: std::env::var_os("REPLBOX_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            python: std::env::var("REPLBOX_PYTHON").unwrap_or(defaults.python),
            user_files_dir: std::env::var_os("USER_FILES_VOLUME")
                .map(PathBuf::from)
                .unwrap_or(defaults.user_files_dir),
            limits,
        })
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ReplboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| ReplboxError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Directory holding scratch files for this service process.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_root.join("scratch")
    }
}

/// `mb` MiB in bytes, refusing values that do not fit in a `u64`.
pub fn megabytes_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| ReplboxError::Config(format!("memory limit of {} MB is too large", mb)))
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ReplboxError::Config(format!("{} must be a valid number: {}", key, e))),
        Err(_) => Ok(None),
    }
}
