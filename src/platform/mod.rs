//! Process and tool helpers
//!
//! Thin wrappers around `which`, `pgrep`, `pkill` and `sudo` so the backends
//! can ask "is this installed", "is this running" and "stop it" uniformly.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to run {command}: {source}")]
    SpawnError {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to signal process {pid}: {message}")]
    SignalError { pid: i32, message: String },
}

/// Signals the backends send to external clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    fn pkill_flag(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "-INT",
            StopSignal::Terminate => "-TERM",
        }
    }
}

/// Check whether a program is installed
///
/// Names containing a path separator are checked directly, anything else is
/// looked up on `PATH`.
pub fn command_exists(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }

    Command::new("which")
        .arg(program)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
pub fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Program and arguments, prefixed with `sudo` unless already root
pub fn privileged_argv<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 2);
    if !is_root() {
        argv.push("sudo".to_string());
    }
    argv.push(program.to_string());
    argv.extend(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
    argv
}

/// PIDs of processes whose name is exactly `name`
pub fn pids_of(name: &str) -> Result<Vec<i32>, PlatformError> {
    let output = Command::new("pgrep")
        .args(["-x", name])
        .output()
        .map_err(|source| PlatformError::SpawnError {
            command: "pgrep".to_string(),
            source,
        })?;

    // pgrep exits 1 when nothing matches
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|l| l.trim().parse().ok())
        .collect())
}

pub fn is_running(name: &str) -> bool {
    pids_of(name).map(|pids| !pids.is_empty()).unwrap_or(false)
}

/// `pkill` exit code when no process matched
const PKILL_NO_MATCH: i32 = 1;

/// Exit code of a stop request given `pkill`'s exit code
///
/// Nothing left to signal means the client is already stopped, so "no match"
/// counts as success. A missing code (killed by a signal) is a failure.
pub fn stop_exit_code(pkill_code: Option<i32>) -> i32 {
    match pkill_code {
        Some(PKILL_NO_MATCH) => 0,
        Some(code) => code,
        None => 1,
    }
}

/// Signal every process named `name`, escalating with `sudo` when needed
///
/// Returns 0 if something was signalled or nothing was running, otherwise
/// `pkill`'s exit code.
pub fn signal_by_name(name: &str, signal: StopSignal) -> Result<i32, PlatformError> {
    let argv = privileged_argv("pkill", &[signal.pkill_flag(), "-x", name]);
    debug!("Running: {}", argv.join(" "));

    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .map_err(|source| PlatformError::SpawnError {
            command: argv.join(" "),
            source,
        })?;

    if status.code() == Some(PKILL_NO_MATCH) {
        debug!("No {} process to signal", name);
    }
    Ok(stop_exit_code(status.code()))
}

/// Send SIGTERM to a process we own
#[cfg(unix)]
pub fn terminate(pid: i32) -> Result<(), PlatformError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| PlatformError::SignalError {
        pid,
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
pub fn terminate(pid: i32) -> Result<(), PlatformError> {
    Err(PlatformError::SignalError {
        pid,
        message: "signals are not supported on this platform".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::SignalError {
            pid: 42,
            message: "EPERM".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to signal process 42: EPERM");
    }

    #[test]
    fn test_privileged_argv() {
        let argv = privileged_argv("pkill", &["-INT", "-x", "openconnect"]);
        let tail = &argv[argv.len() - 4..];
        assert_eq!(tail, ["pkill", "-INT", "-x", "openconnect"]);
        if is_root() {
            assert_eq!(argv.len(), 4);
        } else {
            assert_eq!(argv[0], "sudo");
        }
    }

    #[test]
    fn test_command_exists_with_path() {
        assert!(!command_exists("/nonexistent/definitely-not-here"));
        #[cfg(unix)]
        assert!(command_exists("/bin/sh"));
    }

    #[test]
    fn test_stop_exit_code() {
        assert_eq!(stop_exit_code(Some(0)), 0);
        assert_eq!(stop_exit_code(Some(PKILL_NO_MATCH)), 0);
        assert_eq!(stop_exit_code(Some(2)), 2);
        assert_eq!(stop_exit_code(Some(3)), 3);
        assert_eq!(stop_exit_code(None), 1);
    }

    #[test]
    fn test_pkill_flags() {
        assert_eq!(StopSignal::Interrupt.pkill_flag(), "-INT");
        assert_eq!(StopSignal::Terminate.pkill_flag(), "-TERM");
    }
}
