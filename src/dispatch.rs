//! Action dispatch
//!
//! Decides, from the probed connection state and the `--force`/`--skip`
//! flags, whether a start or stop actually reaches the backend:
//!
//! | Action | Connected | Disconnected |
//! |--------|-----------|--------------|
//! | start | error, no-op with `--skip`, start with `--force` | start |
//! | stop | stop | no-op, stop with `--force` |
//! | toggle | stop | start |
//! | restart | stop + start | stop + start |
//!
//! Every start/stop re-probes afterwards and reports the resulting state.

use crate::backend::{Backend, BackendError};
use crate::config::RunConfig;
use crate::credentials::{CredentialError, Credentials};
use crate::probe::{self, ProbeError, Prober, PublicInfo};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Time given to the tunnel to come up or go down before re-probing
const SETTLE_TIME: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Already {state} (use --force to override or --skip to ignore)")]
    AlreadyInState { state: ConnectionState },
}

/// Actions that consult the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Toggle,
    Status,
    Details,
}

impl Action {
    /// True for actions that may change the connection
    pub fn changes_state(self) -> bool {
        !matches!(self, Action::Status | Action::Details)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unknown,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "in an unknown state"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Result of a dispatched action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Process exit code, mirroring the backend's when it ran
    pub code: i32,
    /// Connection state last observed
    pub state: ConnectionState,
    /// Final human-readable result line, if one was printed
    pub summary: Option<String>,
}

impl Outcome {
    fn quiet(code: i32, state: ConnectionState) -> Self {
        Self {
            code,
            state,
            summary: None,
        }
    }
}

/// One-line description of the probed state
pub fn status_line(state: ConnectionState, info: &PublicInfo, network: &str) -> String {
    match state {
        ConnectionState::Connected => format!("Connected to the {} network [{}]", network, info),
        ConnectionState::Disconnected => {
            format!("Not connected to the {} network [{}]", network, info)
        }
        ConnectionState::Unknown => format!("Connection to the {} network is unknown", network),
    }
}

type CredentialSource<'a> = dyn Fn() -> Result<Credentials, CredentialError> + 'a;

pub struct Dispatcher<'a, P, B> {
    config: &'a RunConfig,
    prober: &'a P,
    backend: &'a B,
    credentials: &'a CredentialSource<'a>,
    settle: Duration,
}

impl<'a, P: Prober, B: Backend> Dispatcher<'a, P, B> {
    pub fn new(
        config: &'a RunConfig,
        prober: &'a P,
        backend: &'a B,
        credentials: &'a CredentialSource<'a>,
    ) -> Self {
        Self {
            config,
            prober,
            backend,
            credentials,
            settle: SETTLE_TIME,
        }
    }

    /// Override the pause before the final re-probe
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub async fn run(&self, action: Action) -> Result<Outcome, DispatchError> {
        let (state, info) = self.current_state().await?;
        debug!("{:?} requested while {}", action, state);

        match action {
            Action::Status => {
                let line = status_line(state, &info, &self.config.network_name);
                println!("{}", line);
                Ok(Outcome {
                    code: 0,
                    state,
                    summary: Some(line),
                })
            }
            Action::Details => {
                let line = status_line(state, &info, &self.config.network_name);
                println!("{}", line);
                for (key, value) in detail_fields(&info) {
                    println!("  {}: {}", key, value);
                }
                Ok(Outcome {
                    code: 0,
                    state,
                    summary: Some(line),
                })
            }
            Action::Start => self.start(state).await,
            Action::Stop => self.stop(state, self.config.force).await,
            Action::Toggle => match state {
                ConnectionState::Disconnected => self.start(state).await,
                _ => self.stop(state, false).await,
            },
            Action::Restart => {
                let stopped = self.stop(ConnectionState::Unknown, true).await?;
                if stopped.code != 0 {
                    warn!("Stop failed with exit code {}, not restarting", stopped.code);
                    return Ok(stopped);
                }
                self.start(ConnectionState::Unknown).await
            }
        }
    }

    async fn current_state(&self) -> Result<(ConnectionState, PublicInfo), DispatchError> {
        if !self.prober.is_online().await {
            return Err(ProbeError::NetworkUnavailable.into());
        }

        let info = self.prober.probe().await?;
        let state = if probe::is_connected(&info, &self.config.as_identifier) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        Ok((state, info))
    }

    async fn start(&self, state: ConnectionState) -> Result<Outcome, DispatchError> {
        if state == ConnectionState::Connected {
            if self.config.skip {
                info!("Already connected, skipping");
                return Ok(Outcome::quiet(0, state));
            }
            if !self.config.force {
                return Err(DispatchError::AlreadyInState { state });
            }
            warn!("Already connected, starting anyway (--force)");
        }

        let creds = (self.credentials)()?;
        info!("Starting VPN via {}", self.backend.name());
        let code = self.backend.start(&creds, self.config).await?;
        if code != 0 {
            warn!("{} exited with code {}", self.backend.name(), code);
        }
        Ok(self.report(code).await)
    }

    async fn stop(&self, state: ConnectionState, force: bool) -> Result<Outcome, DispatchError> {
        if state == ConnectionState::Disconnected && !force {
            warn!("Already disconnected, nothing to stop");
            return Ok(Outcome::quiet(0, state));
        }

        info!("Stopping VPN via {}", self.backend.name());
        let code = self.backend.stop(self.config).await?;
        if code != 0 {
            warn!("{} stop exited with code {}", self.backend.name(), code);
        }
        Ok(self.report(code).await)
    }

    /// Re-probe after a backend ran and print the final result line
    async fn report(&self, code: i32) -> Outcome {
        if self.config.dry_run {
            return Outcome::quiet(code, ConnectionState::Unknown);
        }

        tokio::time::sleep(self.settle).await;
        match self.current_state().await {
            Ok((state, info)) => {
                let line = status_line(state, &info, &self.config.network_name);
                println!("{}", line);
                Outcome {
                    code,
                    state,
                    summary: Some(line),
                }
            }
            Err(e) => {
                warn!("Could not confirm the connection state: {}", e);
                Outcome::quiet(code, ConnectionState::Unknown)
            }
        }
    }
}

/// Every field of the IP-info response, in display order
pub fn detail_fields(info: &PublicInfo) -> Vec<(String, String)> {
    let mut fields = vec![
        ("ip".to_string(), info.ip.clone()),
        ("hostname".to_string(), info.hostname.clone()),
        ("org".to_string(), info.org.clone()),
    ];
    fields.extend(info.extra.iter().map(|(key, value)| {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        (key.clone(), shown)
    }));
    fields
}
