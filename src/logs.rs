//! Backend log inspection for the `log` and `troubleshoot` commands

use crate::config::{Method, RunConfig};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TAIL: usize = 50;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Failed to read log file {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Known failure signatures (lowercase needle) and what to do about them
const SIGNATURES: &[(&str, &str)] = &[
    (
        "login failed",
        "The server rejected the username or password. Check --user/--pwd or ~/.netrc.",
    ),
    (
        "invalid username or password",
        "The server rejected the username or password. Check --user/--pwd or ~/.netrc.",
    ),
    (
        "invalid passcode",
        "The one-time token was rejected. Try --token=push or a fresh code.",
    ),
    (
        "certificate",
        "The server certificate could not be verified. Check the system clock and CA bundle.",
    ),
    (
        "connection refused",
        "The VPN server refused the connection. Check --url and try again later.",
    ),
    (
        "network is unreachable",
        "No route to the VPN server. Check your internet connection.",
    ),
    (
        "no route to host",
        "No route to the VPN server. Check your internet connection.",
    ),
    (
        "maximum number of sessions",
        "Another VPN session is active for this account. Disconnect it first.",
    ),
];

/// A log line matching a known failure signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub line: String,
    pub hint: &'static str,
}

/// Where a backend writes its log
#[derive(Debug, Clone)]
pub struct LogSource {
    pub path: PathBuf,
    /// Only lines containing this are the backend's
    pub filter: Option<String>,
}

impl LogSource {
    pub fn for_config(config: &RunConfig) -> Self {
        match config.method {
            Method::Openconnect => Self {
                path: config.openconnect_log.clone(),
                filter: Some("openconnect".to_string()),
            },
            Method::Pulse => Self {
                path: config.pulse.log_file.clone(),
                filter: None,
            },
        }
    }

    pub fn read_lines(&self) -> Result<Vec<String>, LogError> {
        debug!("Reading {}", self.path.display());
        let content = fs::read(&self.path).map_err(|source| LogError::ReadError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(self.select(&String::from_utf8_lossy(&content)))
    }

    fn select(&self, content: &str) -> Vec<String> {
        content
            .lines()
            .filter(|line| self.filter.as_deref().is_none_or(|f| line.contains(f)))
            .map(str::to_string)
            .collect()
    }
}

/// The last `n` lines
pub fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}

/// Lines matching known failure signatures, oldest first
pub fn troubleshoot(lines: &[String]) -> Vec<Finding> {
    lines
        .iter()
        .filter_map(|line| {
            let lower = line.to_lowercase();
            SIGNATURES
                .iter()
                .find(|(needle, _)| lower.contains(*needle))
                .map(|(_, hint)| Finding {
                    line: line.clone(),
                    hint: *hint,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_tail() {
        let all = lines("a\nb\nc\nd");
        assert_eq!(tail(&all, 2), ["c", "d"]);
        assert_eq!(tail(&all, 10).len(), 4);
        assert!(tail(&all, 0).is_empty());
    }

    #[test]
    fn test_filter_selects_backend_lines() {
        let source = LogSource {
            path: PathBuf::from("/unused"),
            filter: Some("openconnect".to_string()),
        };
        let selected = source.select(
            "Oct 18 host openconnect[42]: Connected as 10.0.0.2\n\
             Oct 18 host sshd[7]: Accepted publickey\n\
             Oct 18 host openconnect[42]: Login failed.\n",
        );
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|l| l.contains("openconnect")));
    }

    #[test]
    fn test_read_lines_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = LogSource {
            path: temp_dir.path().join("missing.log"),
            filter: None,
        };
        assert!(matches!(source.read_lines(), Err(LogError::ReadError { .. })));
    }

    #[test]
    fn test_read_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pulsesvc.log");
        fs::write(&path, "one\ntwo\n").unwrap();

        let source = LogSource { path, filter: None };
        assert_eq!(source.read_lines().unwrap(), ["one", "two"]);
    }

    #[test]
    fn test_troubleshoot_findings() {
        let log = lines(
            "openconnect[1]: POST https://remote.ucsf.edu/\n\
             openconnect[1]: Login failed.\n\
             openconnect[1]: Server certificate verify failed: signer not found\n\
             openconnect[1]: Connected as 10.0.0.2",
        );

        let findings = troubleshoot(&log);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].line.contains("Login failed"));
        assert!(findings[0].hint.contains("username or password"));
        assert!(findings[1].hint.contains("certificate"));
    }

    #[test]
    fn test_troubleshoot_clean_log() {
        assert!(troubleshoot(&lines("all good\nConnected")).is_empty());
    }

    #[test]
    fn test_source_per_method() {
        use crate::config::{Config, Overrides};

        let config = RunConfig::new(
            &Config::default(),
            Overrides {
                method: Some("pulse".to_string()),
                gui: true,
                speed: 1.0,
                ..Default::default()
            },
        )
        .unwrap();
        let source = LogSource::for_config(&config);
        assert!(source.filter.is_none());
        assert!(source.path.ends_with("pulsesvc.log"));
    }
}
