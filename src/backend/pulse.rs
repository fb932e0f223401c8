//! Pulse Secure GUI backend
//!
//! The Pulse Secure client has no usable command line, so connecting means
//! driving `pulseUi` with simulated keystrokes:
//!
//! 1. make sure a saved connection for the VPN URL exists
//! 2. launch `pulseUi` unless it is already running
//! 3. select the connection, press Connect, fill in the credential prompt
//!    and the one-time token prompt
//! 4. wait for the prompt window to disappear
//!
//! Every pause is multiplied by `--speed`, so slow desktops can use values
//! above 1.

use super::{Backend, BackendError, require};
use crate::config::{PulseSettings, RunConfig};
use crate::credentials::Credentials;
use crate::platform::{self, StopSignal};
use serde_json::Value;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Seconds between window searches
const POLL_INTERVAL: f64 = 1.0;
/// Window searches before giving up on a window that should appear
const WINDOW_ATTEMPTS: u32 = 30;

/// One action of an automation script
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Wait for a window with this name and give it focus
    Activate(String),
    /// Press a key (xdotool key name)
    Key(&'static str),
    /// Type text; secret text is never logged or passed on a command line
    Type { text: String, secret: bool },
    /// Sleep for this many seconds, before speed scaling
    Pause(f64),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Activate(name) => write!(f, "activate window '{}'", name),
            Step::Key(key) => write!(f, "key {}", key),
            Step::Type { secret: true, .. } => write!(f, "type *****"),
            Step::Type { text, .. } => write!(f, "type '{}'", text),
            Step::Pause(secs) => write!(f, "pause {}s", secs),
        }
    }
}

/// Keystrokes that log in through the Pulse Secure window
pub fn login_script(creds: &Credentials, pulse: &PulseSettings) -> Vec<Step> {
    let mut steps = vec![
        Step::Activate(pulse.window_name.clone()),
        Step::Pause(1.0),
        // Focus the connection list; typing a name selects the matching entry
        Step::Key("Tab"),
        Step::Type {
            text: pulse.connection_name.clone(),
            secret: false,
        },
        Step::Pause(0.5),
        Step::Key("Return"),
        Step::Pause(2.0),
        Step::Activate(pulse.prompt_window_name.clone()),
        Step::Pause(1.0),
        Step::Type {
            text: creds.username.clone(),
            secret: false,
        },
        Step::Key("Tab"),
        Step::Type {
            text: creds.password.clone(),
            secret: true,
        },
        Step::Key("Return"),
    ];

    if creds.has_second_factor() {
        steps.extend([
            Step::Pause(2.0),
            Step::Activate(pulse.prompt_window_name.clone()),
            Step::Pause(1.0),
            Step::Type {
                text: creds.token.clone(),
                secret: true,
            },
            Step::Key("Return"),
        ]);
    }

    steps
}

/// JSON line Pulse Secure stores per saved connection
pub fn profile_line(name: &str, url: &str) -> String {
    format!(
        "{{\"connName\": {}, \"preferredCert\": \"\", \"baseUrl\": {}}}",
        Value::from(name),
        Value::from(url)
    )
}

/// True if any saved connection in `content` points at `url`
pub fn has_profile(content: &str, url: &str) -> bool {
    content.lines().any(|line| {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(entry) => entry.get("baseUrl").and_then(Value::as_str) == Some(url),
            Err(_) => line.contains(url),
        }
    })
}

/// Append a connection for `url` unless one exists; returns true if appended
pub fn ensure_profile(path: &Path, name: &str, url: &str) -> Result<bool, BackendError> {
    let profile_error = |source| BackendError::ProfileError {
        path: path.display().to_string(),
        source,
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(profile_error(e)),
    };
    if has_profile(&content, url) {
        debug!("Pulse connection for {} already present", url);
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(profile_error)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(profile_error)?;

    let mut line = String::new();
    if !content.is_empty() && !content.ends_with('\n') {
        line.push('\n');
    }
    line.push_str(&profile_line(name, url));
    line.push('\n');
    file.write_all(line.as_bytes()).map_err(profile_error)?;

    info!("Added Pulse connection '{}' for {}", name, url);
    Ok(true)
}

/// Runs automation steps through `xdotool`
struct Xdotool {
    program: String,
    speed: f64,
}

impl Xdotool {
    fn new(speed: f64) -> Self {
        Self {
            program: "xdotool".to_string(),
            speed,
        }
    }

    fn scaled(&self, secs: f64) -> Duration {
        Duration::from_secs_f64(secs * self.speed)
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    async fn exec(&self, args: &[&str]) -> Result<std::process::Output, BackendError> {
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| BackendError::SpawnError {
                command: self.describe(args),
                source,
            })
    }

    /// Stdout of a query; a non-zero exit (e.g. no match) is not an error
    async fn output(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = self.exec(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run an action that must succeed before any further keystrokes
    async fn checked(&self, args: &[&str]) -> Result<(), BackendError> {
        let output = self.exec(args).await?;
        if !output.status.success() {
            return Err(BackendError::AutomationFailure(format!(
                "'{}' failed ({}): {}",
                self.describe(args),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn find_window(&self, name: &str) -> Result<Option<String>, BackendError> {
        let stdout = self.output(&["search", "--name", name]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string))
    }

    async fn wait_for_window(&self, name: &str) -> Result<String, BackendError> {
        for attempt in 1..=WINDOW_ATTEMPTS {
            if let Some(id) = self.find_window(name).await? {
                return Ok(id);
            }
            debug!("Waiting for window '{}' ({}/{})", name, attempt, WINDOW_ATTEMPTS);
            tokio::time::sleep(self.scaled(POLL_INTERVAL)).await;
        }
        Err(BackendError::AutomationFailure(format!(
            "window '{}' did not appear",
            name
        )))
    }

    /// Polls until no window named `name` remains
    async fn wait_until_closed(&self, name: &str) -> Result<(), BackendError> {
        while self.find_window(name).await?.is_some() {
            debug!("Window '{}' still open", name);
            tokio::time::sleep(Duration::from_secs_f64(POLL_INTERVAL)).await;
        }
        Ok(())
    }

    /// Types text read from stdin so it never shows up in the process list
    async fn type_text(&self, text: &str) -> Result<(), BackendError> {
        let args = ["type", "--clearmodifiers", "--file", "-"];
        let spawn_error = |source| BackendError::SpawnError {
            command: self.describe(&args),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()).await,
            None => Ok(()),
        };
        let status = child.wait().await.map_err(spawn_error)?;

        // A failed exit explains a broken pipe better than the pipe error does
        if !status.success() {
            return Err(BackendError::AutomationFailure(format!(
                "'{}' failed ({})",
                self.describe(&args),
                status
            )));
        }
        written.map_err(spawn_error)
    }

    async fn run(&self, step: &Step) -> Result<(), BackendError> {
        debug!("Automation: {}", step);
        match step {
            Step::Activate(name) => {
                let id = self.wait_for_window(name).await?;
                self.checked(&["windowactivate", "--sync", id.as_str()])
                    .await?;
            }
            Step::Key(key) => {
                self.checked(&["key", "--clearmodifiers", *key]).await?;
            }
            Step::Type { text, .. } => self.type_text(text).await?,
            Step::Pause(secs) => tokio::time::sleep(self.scaled(*secs)).await,
        }
        Ok(())
    }
}

pub struct PulseGui {
    settings: PulseSettings,
}

impl PulseGui {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            settings: config.pulse.clone(),
        }
    }

    fn ui_process_name(&self) -> String {
        self.settings
            .ui_binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pulseUi".to_string())
    }

    /// Launch `pulseUi` detached unless it is already running
    pub fn open_gui(&self, config: &RunConfig) -> Result<(), BackendError> {
        let ui = self.settings.ui_binary.display().to_string();
        require(&ui, "Install the Pulse Secure client from your IT department.")?;

        if platform::is_running(&self.ui_process_name()) {
            debug!("{} already running", ui);
            return Ok(());
        }
        if config.dry_run {
            println!("[dry-run] {} &", ui);
            return Ok(());
        }

        info!("Launching {}", ui);
        let mut command = std::process::Command::new(&self.settings.ui_binary);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command.spawn().map_err(|source| BackendError::SpawnError {
            command: ui,
            source,
        })?;
        Ok(())
    }

    /// Close the Pulse Secure window without touching the service
    pub fn close_gui(&self, config: &RunConfig) -> Result<(), BackendError> {
        let window = &self.settings.window_name;

        if platform::command_exists("wmctrl") {
            if config.dry_run {
                println!("[dry-run] wmctrl -c \"{}\"", window);
                return Ok(());
            }
            let status = std::process::Command::new("wmctrl")
                .args(["-c", window])
                .status()
                .map_err(|source| BackendError::SpawnError {
                    command: "wmctrl".to_string(),
                    source,
                })?;
            if status.success() {
                return Ok(());
            }
            warn!("wmctrl could not close '{}', signalling instead", window);
        }

        let name = self.ui_process_name();
        if config.dry_run {
            println!("[dry-run] kill -TERM $(pgrep -x {})", name);
            return Ok(());
        }
        for pid in platform::pids_of(&name)? {
            debug!("Terminating {} (pid {})", name, pid);
            platform::terminate(pid)?;
        }
        Ok(())
    }
}

impl Backend for PulseGui {
    fn name(&self) -> &'static str {
        "pulse"
    }

    async fn start(&self, creds: &Credentials, config: &RunConfig) -> Result<i32, BackendError> {
        require("xdotool", "Install it with e.g. 'sudo apt install xdotool'.")?;

        let settings = &self.settings;
        if config.dry_run {
            if !has_profile(
                &fs::read_to_string(&settings.connections_file).unwrap_or_default(),
                &config.url,
            ) {
                println!(
                    "[dry-run] append to {}: {}",
                    settings.connections_file.display(),
                    profile_line(&settings.connection_name, &config.url)
                );
            }
        } else {
            ensure_profile(
                &settings.connections_file,
                &settings.connection_name,
                &config.url,
            )?;
        }

        self.open_gui(config)?;

        let script = login_script(creds, settings);
        if config.dry_run {
            for step in &script {
                println!("[dry-run] {}", step);
            }
            return Ok(0);
        }

        let driver = Xdotool::new(config.speed);
        for step in &script {
            driver.run(step).await?;
        }

        info!("Waiting for '{}' to close", settings.prompt_window_name);
        driver.wait_until_closed(&settings.prompt_window_name).await?;

        Ok(0)
    }

    async fn stop(&self, config: &RunConfig) -> Result<i32, BackendError> {
        self.close_gui(config)?;

        let service = &self.settings.service_name;
        if config.dry_run {
            let argv = platform::privileged_argv("pkill", &["-TERM", "-x", service.as_str()]);
            println!("[dry-run] {}", argv.join(" "));
            return Ok(0);
        }

        if !platform::is_running(service) {
            info!("No {} process found, nothing to stop", service);
            return Ok(0);
        }

        info!("Stopping {}", service);
        Ok(platform::signal_by_name(service, StopSignal::Terminate)?)
    }
}
