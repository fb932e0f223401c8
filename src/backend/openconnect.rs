//! Direct openconnect backend
//!
//! Connects with
//!
//! ```bash
//! sudo openconnect --protocol=nc --background --user=USER \
//!   --authgroup=REALM --passwd-on-stdin URL
//! ```
//!
//! writing the password and the one-time token to stdin. With `--background`
//! openconnect daemonises once the tunnel is up, so waiting on the foreground
//! process yields the authentication result without blocking on the tunnel.

use super::{Backend, BackendError, display_argv, require};
use crate::config::RunConfig;
use crate::credentials::Credentials;
use crate::platform::{self, StopSignal};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub struct Openconnect {
    binary: String,
}

impl Openconnect {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            binary: config.openconnect_binary.clone(),
        }
    }

    /// Process name `pkill` matches on
    fn process_name(&self) -> &str {
        Path::new(&self.binary)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(self.binary.as_str())
    }

    pub fn connect_args(creds: &Credentials, config: &RunConfig) -> Vec<String> {
        let mut args = vec![
            "--protocol=nc".to_string(),
            "--background".to_string(),
            format!("--user={}", creds.username),
            format!("--authgroup={}", config.realm_for(&creds.token)),
            "--passwd-on-stdin".to_string(),
        ];
        if config.debug {
            args.push("--verbose".to_string());
        }
        args.push(config.url.clone());
        args
    }

    /// Lines fed to `--passwd-on-stdin`: password, then token if any
    pub fn stdin_payload(creds: &Credentials) -> String {
        if creds.has_second_factor() {
            format!("{}\n{}\n", creds.password, creds.token)
        } else {
            format!("{}\n", creds.password)
        }
    }
}

impl Backend for Openconnect {
    fn name(&self) -> &'static str {
        "openconnect"
    }

    async fn start(&self, creds: &Credentials, config: &RunConfig) -> Result<i32, BackendError> {
        require(
            &self.binary,
            "Install it with your package manager, e.g. 'sudo apt install openconnect'.",
        )?;

        let args = Self::connect_args(creds, config);
        let argv = platform::privileged_argv(&self.binary, &args);
        let shown = display_argv(&argv, &[&creds.password]);

        if config.dry_run {
            println!("[dry-run] {}", shown);
            return Ok(0);
        }

        info!("Connecting to {} as {}", config.url, creds.username);
        debug!("Running: {}", shown);

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| BackendError::SpawnError {
                command: shown.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = Self::stdin_payload(creds);
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|source| BackendError::SpawnError {
                    command: shown.clone(),
                    source,
                })?;
            // Closing stdin tells openconnect no more input is coming
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|source| BackendError::SpawnError {
                command: shown,
                source,
            })?;
        debug!("openconnect exited with {}", status);

        Ok(status.code().unwrap_or(1))
    }

    async fn stop(&self, config: &RunConfig) -> Result<i32, BackendError> {
        let name = self.process_name();

        if config.dry_run {
            let argv = platform::privileged_argv("pkill", &["-INT", "-x", name]);
            println!("[dry-run] {}", argv.join(" "));
            return Ok(0);
        }

        if !platform::is_running(name) {
            info!("No {} process found, nothing to stop", name);
            return Ok(0);
        }

        info!("Stopping {}", name);
        Ok(platform::signal_by_name(name, StopSignal::Interrupt)?)
    }
}
