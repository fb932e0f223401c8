//! VPN client backends
//!
//! Both backends hand the actual tunnel to an external program:
//!
//! - [`openconnect::Openconnect`] runs the openconnect binary directly
//! - [`pulse::PulseGui`] drives the Pulse Secure GUI with `xdotool`

pub mod openconnect;
pub mod pulse;

pub use openconnect::Openconnect;
pub use pulse::PulseGui;

use crate::config::{Method, RunConfig};
use crate::credentials::Credentials;
use crate::platform::{self, PlatformError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{tool} not found. {hint}")]
    MissingDependency { tool: String, hint: String },
    #[error("GUI automation failed: {0}")]
    AutomationFailure(String),
    #[error("Failed to run {command}: {source}")]
    SpawnError {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to update {path}: {source}")]
    ProfileError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Platform error: {0}")]
    PlatformError(#[from] PlatformError),
}

/// Narrow contract every VPN client adapter fulfils
///
/// Both operations return the exit code of the external process that did the
/// work.
#[allow(async_fn_in_trait)]
pub trait Backend {
    fn name(&self) -> &'static str;

    async fn start(&self, creds: &Credentials, config: &RunConfig) -> Result<i32, BackendError>;

    async fn stop(&self, config: &RunConfig) -> Result<i32, BackendError>;
}

/// The backend selected for this run
pub enum AnyBackend {
    Openconnect(Openconnect),
    Pulse(PulseGui),
}

impl AnyBackend {
    pub fn for_config(config: &RunConfig) -> Self {
        match config.method {
            Method::Openconnect => AnyBackend::Openconnect(Openconnect::new(config)),
            Method::Pulse => AnyBackend::Pulse(PulseGui::new(config)),
        }
    }
}

impl Backend for AnyBackend {
    fn name(&self) -> &'static str {
        match self {
            AnyBackend::Openconnect(b) => b.name(),
            AnyBackend::Pulse(b) => b.name(),
        }
    }

    async fn start(&self, creds: &Credentials, config: &RunConfig) -> Result<i32, BackendError> {
        match self {
            AnyBackend::Openconnect(b) => b.start(creds, config).await,
            AnyBackend::Pulse(b) => b.start(creds, config).await,
        }
    }

    async fn stop(&self, config: &RunConfig) -> Result<i32, BackendError> {
        match self {
            AnyBackend::Openconnect(b) => b.stop(config).await,
            AnyBackend::Pulse(b) => b.stop(config).await,
        }
    }
}

/// Fail with `MissingDependency` unless `program` is installed
pub(crate) fn require(program: &str, hint: &str) -> Result<(), BackendError> {
    if platform::command_exists(program) {
        Ok(())
    } else {
        Err(BackendError::MissingDependency {
            tool: program.to_string(),
            hint: hint.to_string(),
        })
    }
}

/// Render an argv for display, hiding the given secrets
pub(crate) fn display_argv(argv: &[String], secrets: &[&str]) -> String {
    argv.iter()
        .map(|arg| {
            let mut shown = arg.clone();
            for secret in secrets.iter().filter(|s| !s.is_empty()) {
                shown = shown.replace(secret, "*****");
            }
            if shown.contains(' ') {
                format!("\"{}\"", shown)
            } else {
                shown
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
