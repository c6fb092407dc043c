use crate::config::types::{ReplboxError, ResourceLimits, Result};
use crate::core::types::ExecutionProfile;
/// Constrained spawn
///
/// The child is set up in a fixed order between fork and exec:
/// 1. new process group with itself as leader (`process_group(0)`)
/// 2. prctl(PR_SET_PDEATHSIG, SIGKILL) so it dies with the service
/// 3. rlimit set: address space, CPU time, core size
/// 4. exec interpreter with a cleared environment
///
/// Steps 2-3 run in the forked child, so only async-signal-safe calls are
/// allowed there: no allocation, no locks, no logging.
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type RlimitResource = libc::c_int;

#[derive(Clone, Copy, Debug)]
struct RlimitEntry {
    resource: RlimitResource,
    soft: u64,
    hard: u64,
}

/// Kernel-enforced ceilings applied in the child before exec.
#[derive(Clone, Copy, Debug)]
pub struct RlimitSet {
    entries: [RlimitEntry; 3],
}

impl RlimitSet {
    /// CPU hard limit sits one second above the soft one so the child gets
    /// SIGXCPU before the unconditional SIGKILL.
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            entries: [
                RlimitEntry {
                    resource: libc::RLIMIT_AS,
                    soft: limits.max_memory_bytes,
                    hard: limits.max_memory_bytes,
                },
                RlimitEntry {
                    resource: libc::RLIMIT_CPU,
                    soft: limits.max_cpu_secs,
                    hard: limits.max_cpu_secs.saturating_add(1),
                },
                RlimitEntry {
                    resource: libc::RLIMIT_CORE,
                    soft: 0,
                    hard: 0,
                },
            ],
        }
    }

    /// Apply every entry. Any failure aborts the spawn.
    fn apply(&self) -> io::Result<()> {
        for entry in &self.entries {
            apply_rlimit_value(entry.resource, entry.soft, entry.hard)?;
        }
        Ok(())
    }
}

fn apply_rlimit_value(resource: RlimitResource, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };

    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn setup_parent_death_signal() -> io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn setup_parent_death_signal() -> io::Result<()> {
    Ok(())
}

/// Spawn `profile.command` as the leader of a fresh process group, under the
/// profile's rlimits, with piped stdout/stderr.
///
/// Stdin is piped when the profile carries input and `/dev/null` otherwise.
/// The child's pid doubles as its process group id.
pub fn spawn_constrained(profile: &ExecutionProfile) -> Result<Child> {
    let (program, args) = profile
        .command
        .split_first()
        .ok_or_else(|| ReplboxError::Config("empty command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&profile.workdir)
        .env_clear()
        .envs(profile.environment.iter().map(|(k, v)| (k, v)))
        .stdin(if profile.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let rlimits = RlimitSet::from_limits(&profile.limits);
    unsafe {
        cmd.pre_exec(move || {
            setup_parent_death_signal()?;
            rlimits.apply()
        });
    }

    cmd.spawn()
        .map_err(|e| ReplboxError::Process(format!("spawn {}: {}", program, e)))
}
