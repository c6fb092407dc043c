use crate::config::types::{ReplboxError, Result};
use crate::core::types::{ExecutionProfile, KillReport, LaunchOutcome};
use crate::exec::preexec::spawn_constrained;
use crate::observability::audit;
use crate::utils::output::{Drain, OutputCollector};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, ChildStdin};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TERM_GRACE: Duration = Duration::from_millis(200);
/// Readers always get this long to hit EOF after the group is gone, even when
/// the leader exited right at the deadline.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> ReplboxError {
    ReplboxError::Process(format!("{}: {}", prefix, err))
}

/// SIGTERM the group, give it a moment, then SIGKILL it.
///
/// Falls back to signalling the leader alone when the group call fails.
pub fn terminate_group(leader: Pid) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();

    match killpg(leader, Signal::SIGTERM) {
        Ok(()) => report.term_sent = true,
        Err(Errno::ESRCH) => report.notes.push("group already gone at SIGTERM".to_string()),
        Err(e) => {
            let _ = kill(leader, Signal::SIGTERM);
            report.term_sent = true;
            report.notes.push(format!("group SIGTERM fallback used: {}", e));
        }
    }

    thread::sleep(TERM_GRACE);

    match killpg(leader, Signal::SIGKILL) {
        Ok(()) => report.kill_sent = true,
        Err(Errno::ESRCH) => report.notes.push("group gone before SIGKILL".to_string()),
        Err(e) => {
            let _ = kill(leader, Signal::SIGKILL);
            report.kill_sent = true;
            report.notes.push(format!("group SIGKILL fallback used: {}", e));
        }
    }

    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// SIGKILL whatever is left in the group after the leader exited.
fn kill_leftovers(leader: Pid) -> bool {
    match killpg(leader, Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            log::warn!("Failed to sweep process group {}: {}", leader, e);
            false
        }
    }
}

/// SIGKILL processes that left the group (`setsid`, `setpgid`) but still run
/// from the run directory, by cwd or by an argument under it.
///
/// Best effort: a process that changed directory and exec'd something else is
/// not found here. `run_dir` must be private to the run; `/` is refused.
fn kill_escaped(leader: Pid, run_dir: &Path) -> usize {
    if run_dir.parent().is_none() || !run_dir.is_absolute() {
        return 0;
    }
    let Ok(entries) = fs::read_dir("/proc") else {
        return 0;
    };
    let canonical = fs::canonicalize(run_dir).unwrap_or_else(|_| run_dir.to_path_buf());
    let own = std::process::id() as i32;

    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(raw) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) else {
            continue;
        };
        if raw == own || raw == leader.as_raw() {
            continue;
        }
        if !runs_from(&entry.path(), &[run_dir, canonical.as_path()]) {
            continue;
        }

        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => killed += 1,
            Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("Failed to kill escaped process {}: {}", raw, e),
        }
    }
    killed
}

fn runs_from(proc_dir: &Path, dirs: &[&Path]) -> bool {
    let under = |path: &Path| dirs.iter().any(|dir| path.starts_with(dir));

    if let Ok(cwd) = fs::read_link(proc_dir.join("cwd")) {
        if under(&cwd) {
            return true;
        }
    }
    fs::read(proc_dir.join("cmdline"))
        .map(|cmdline| {
            cmdline
                .split(|byte| *byte == 0)
                .any(|arg| under(Path::new(OsStr::from_bytes(arg))))
        })
        .unwrap_or(false)
}

/// Poll until the leader is a zombie, without reaping it.
///
/// Leaving it unreaped keeps its pid, and so the group id, from being reused
/// while leftovers are killed. Returns `false` on deadline.
fn wait_for_exit(leader: Pid, started: Instant, deadline: Duration) -> Result<bool> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(leader), flags) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_process_error("waitid", e)),
        }

        if started.elapsed() >= deadline {
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn feed_stdin(stdin: Option<ChildStdin>, data: Option<String>) {
    let (Some(mut stdin), Some(data)) = (stdin, data) else {
        return;
    };
    thread::spawn(move || {
        // EPIPE just means the child stopped reading; dropping closes the pipe.
        if let Err(e) = stdin.write_all(data.as_bytes()) {
            log::debug!("stdin writer stopped: {}", e);
        }
    });
}

fn reap(child: &mut Child) -> Result<(Option<i32>, Option<i32>)> {
    let status = child.wait().map_err(|e| to_process_error("wait", e))?;
    Ok((status.code(), status.signal()))
}

/// Launch one constrained child and supervise it to completion.
///
/// `started` is the instant the wall clock deadline counts from. On timeout
/// the whole process group is terminated and output is discarded; on normal
/// exit leftovers in the group are killed before output is collected. Output
/// still held open by an escaped process when the deadline passes counts as
/// a timeout too.
pub fn launch(profile: &ExecutionProfile, run_id: &str, started: Instant) -> Result<LaunchOutcome> {
    let wall_limit = profile.limits.wall_clock();
    let deadline = started + wall_limit;

    let mut child = spawn_constrained(profile)?;
    let pid = child.id();
    let leader = Pid::from_raw(pid as i32);

    feed_stdin(child.stdin.take(), profile.stdin_data.clone());
    let pending = OutputCollector::new(profile.limits.max_output_bytes)
        .start(child.stdout.take(), child.stderr.take());

    let exited = match wait_for_exit(leader, started, wall_limit) {
        Ok(exited) => exited,
        Err(e) => {
            // Cannot observe the child any more; make sure it cannot outlive us.
            terminate_group(leader);
            kill_escaped(leader, &profile.workdir);
            let _ = child.wait();
            return Err(e);
        }
    };

    if !exited {
        audit::wall_time_limit_violation(run_id, pid, wall_limit.as_millis());
        let mut report = terminate_group(leader);
        report.escaped_killed = kill_escaped(leader, &profile.workdir);
        audit_kill(run_id, pid, &report);
        let (exit_code, signal) = reap(&mut child)?;
        drop(pending);

        return Ok(timed_out(pid, exit_code, signal, started, report));
    }

    if kill_leftovers(leader) {
        log::debug!("Killed leftover processes in group {}", leader);
    }
    let escaped = kill_escaped(leader, &profile.workdir);
    if escaped > 0 {
        log::warn!("Killed {} process(es) that escaped group {}", escaped, leader);
    }
    let (exit_code, signal) = reap(&mut child)?;

    let drain_deadline = deadline.max(Instant::now() + DRAIN_GRACE);
    match pending.finish(drain_deadline) {
        Drain::Complete(output) => {
            let kill_report = (escaped > 0).then(|| {
                let report = KillReport {
                    kill_sent: true,
                    escaped_killed: escaped,
                    ..KillReport::default()
                };
                audit_kill(run_id, pid, &report);
                report
            });
            Ok(LaunchOutcome {
                pid,
                exit_code,
                signal,
                timed_out: false,
                wall_time: started.elapsed(),
                output: Some(output),
                kill_report,
            })
        }
        Drain::HeldOpen(_) => {
            // Something outside the group, and not found by the sweep, kept
            // the pipe open for the rest of the wall clock budget.
            audit::wall_time_limit_violation(run_id, pid, wall_limit.as_millis());
            let mut report = KillReport {
                escaped_killed: escaped + kill_escaped(leader, &profile.workdir),
                ..KillReport::default()
            };
            report
                .notes
                .push("output still held open at the deadline".to_string());
            audit_kill(run_id, pid, &report);
            Ok(timed_out(pid, exit_code, signal, started, report))
        }
    }
}

fn timed_out(
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
    started: Instant,
    report: KillReport,
) -> LaunchOutcome {
    LaunchOutcome {
        pid,
        exit_code,
        signal,
        timed_out: true,
        wall_time: started.elapsed(),
        output: None,
        kill_report: Some(report),
    }
}

fn audit_kill(run_id: &str, pid: u32, report: &KillReport) {
    audit::group_killed(
        run_id,
        pid,
        format!(
            "term_sent={} kill_sent={} waited_ms={} escaped_killed={}",
            report.term_sent, report.kill_sent, report.waited_ms, report.escaped_killed
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ResourceLimits;
    use tempfile::TempDir;

    fn shell_profile(script: &str, wall_secs: u64) -> Option<(TempDir, ExecutionProfile)> {
        if !Path::new("/bin/sh").exists() {
            return None;
        }
        let workdir = TempDir::new().unwrap();
        let profile = ExecutionProfile {
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            stdin_data: None,
            environment: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
            workdir: workdir.path().to_path_buf(),
            limits: ResourceLimits {
                max_wall_clock_secs: wall_secs,
                ..ResourceLimits::default()
            },
        };
        Some((workdir, profile))
    }

    fn recorded_pid(workdir: &TempDir, name: &str) -> Pid {
        let text = fs::read_to_string(workdir.path().join(name)).unwrap();
        Pid::from_raw(text.trim().parse().unwrap())
    }

    /// Dead, or a zombie waiting on a reaper we do not control.
    fn is_gone(pid: Pid) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if kill(pid, None) == Err(Errno::ESRCH) {
                return true;
            }
            let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
            if stat.rsplit(')').next().map(str::trim_start).is_some_and(|rest| rest.starts_with('Z')) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn setsid_available() -> bool {
        ["/usr/bin/setsid", "/bin/setsid"]
            .iter()
            .any(|path| Path::new(path).exists())
    }

    #[test]
    fn normal_exit_collects_both_streams() {
        let Some((_dir, profile)) = shell_profile("echo out; echo err >&2; exit 3", 5) else {
            return;
        };
        let outcome = launch(&profile, "t", Instant::now()).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(3));
        let output = outcome.output.unwrap();
        assert_eq!(output.stdout.data, b"out\n");
        assert_eq!(output.stderr.data, b"err\n");
    }

    #[test]
    fn stdin_is_delivered_then_closed() {
        let Some((_dir, mut profile)) = shell_profile("cat", 5) else {
            return;
        };
        profile.stdin_data = Some("ping".to_string());
        let outcome = launch(&profile, "t", Instant::now()).unwrap();
        assert_eq!(outcome.output.unwrap().stdout.data, b"ping");
    }

    #[test]
    fn timeout_kills_the_whole_group() {
        let Some((dir, profile)) = shell_profile("sleep 30 & echo $! > bg.pid; wait", 1) else {
            return;
        };
        let started = Instant::now();
        let outcome = launch(&profile, "t", started).unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.output.is_none());
        assert!(outcome.wall_time < Duration::from_secs(5));
        assert!(outcome.kill_report.unwrap().term_sent);

        assert_eq!(kill(Pid::from_raw(outcome.pid as i32), None), Err(Errno::ESRCH));
        let background = recorded_pid(&dir, "bg.pid");
        assert!(is_gone(background), "background child {} survived", background);
    }

    #[test]
    fn leftovers_holding_the_pipe_are_killed_after_exit() {
        // The background sleep inherits stdout; without the group sweep the
        // reader would never see EOF.
        let Some((dir, profile)) =
            shell_profile("sleep 30 & echo $! > bg.pid; echo started", 5)
        else {
            return;
        };
        let started = Instant::now();
        let outcome = launch(&profile, "t", started).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.output.unwrap().stdout.data, b"started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(is_gone(recorded_pid(&dir, "bg.pid")));
    }

    #[test]
    fn escaped_session_in_the_workdir_is_killed() {
        if !setsid_available() {
            return;
        }
        let Some((dir, profile)) =
            shell_profile("setsid sleep 30 & echo $! > esc.pid; sleep 0.3; echo started", 5)
        else {
            return;
        };
        let started = Instant::now();
        let outcome = launch(&profile, "t", started).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.output.unwrap().stdout.data, b"started\n");
        assert!(outcome.kill_report.unwrap().escaped_killed >= 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(is_gone(recorded_pid(&dir, "esc.pid")));
    }

    #[test]
    fn pipe_held_past_the_deadline_is_a_timeout() {
        if !setsid_available() {
            return;
        }
        // Leaves both the group and the workdir, so only the deadline ends it.
        let Some((dir, profile)) = shell_profile(
            "(cd / && exec setsid sleep 5) & echo $! > esc.pid; sleep 0.3; echo started",
            1,
        ) else {
            return;
        };
        let started = Instant::now();
        let outcome = launch(&profile, "t", started).unwrap();
        let _ = kill(recorded_pid(&dir, "esc.pid"), Signal::SIGKILL);

        assert!(outcome.timed_out);
        assert!(outcome.output.is_none());
        assert!(outcome.wall_time >= Duration::from_secs(1));
        assert!(outcome.wall_time < Duration::from_secs(3), "{:?}", outcome.wall_time);
    }

    #[test]
    fn escape_sweep_refuses_the_root_directory() {
        assert_eq!(kill_escaped(Pid::this(), Path::new("/")), 0);
        assert_eq!(kill_escaped(Pid::this(), Path::new("relative")), 0);
    }
}
