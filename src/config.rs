//! Configuration handling for UCSF VPN
//!
//! Two layers: the optional TOML settings file ([`Config`]) holding endpoints
//! and paths, and the per-invocation [`RunConfig`] that merges those settings
//! with command-line flags and environment defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

pub const CONFIG_FILE_NAME: &str = "ucsf-vpn.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Unknown method '{0}' (expected 'openconnect' or 'pulse')")]
    UnknownMethod(String),
    #[error("Invalid speed factor {0} (must be a positive number)")]
    InvalidSpeed(f64),
    #[error("The pulse method drives the Pulse Secure GUI and cannot be used with --no-gui")]
    PulseRequiresGui,
}

/// Which external VPN client does the work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Run the openconnect binary directly
    Openconnect,
    /// Drive the Pulse Secure GUI client
    Pulse,
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openconnect" => Ok(Method::Openconnect),
            "pulse" => Ok(Method::Pulse),
            other => Err(ConfigError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Openconnect => write!(f, "openconnect"),
            Method::Pulse => write!(f, "pulse"),
        }
    }
}

/// Settings file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vpn: VpnConfig,
    pub network: NetworkConfig,
    pub pulse: PulseConfig,
    pub openconnect: OpenconnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    /// Network name used in status messages
    pub name: String,
    pub server: String,
    pub url: String,
    pub realm: String,
    pub single_factor_realm: String,
    pub method: Method,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ipinfo_url: String,
    pub liveness_host: String,
    /// Substring of the `org` field identifying the institution's network
    pub as_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub connection_name: String,
    pub ui_binary: String,
    pub service_name: String,
    pub window_name: String,
    pub prompt_window_name: String,
    pub connections_file: String,
    pub log_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenconnectConfig {
    pub binary: String,
    pub log_file: String,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            name: "UCSF".to_string(),
            server: "remote.ucsf.edu".to_string(),
            url: "https://remote.ucsf.edu/pulse".to_string(),
            realm: "Dual-Factor Pulse Clients".to_string(),
            single_factor_realm: "Single-Factor Pulse Clients".to_string(),
            method: Method::Openconnect,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ipinfo_url: "https://ipinfo.io/json".to_string(),
            liveness_host: "9.9.9.9:53".to_string(),
            as_identifier: "AS5653".to_string(),
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            connection_name: "UCSF".to_string(),
            ui_binary: "/usr/local/pulse/pulseUi".to_string(),
            service_name: "pulsesvc".to_string(),
            window_name: "Pulse Secure".to_string(),
            prompt_window_name: "Connect to:".to_string(),
            connections_file: "~/.pulse_secure/pulse/.pulse_Connections.txt".to_string(),
            log_file: "~/.pulse_secure/pulse/pulsesvc.log".to_string(),
        }
    }
}

impl Default for OpenconnectConfig {
    fn default() -> Self {
        Self {
            binary: "openconnect".to_string(),
            log_file: "/var/log/syslog".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `./ucsf-vpn.toml`, then `~/.ucsf-vpn/config.toml`, else defaults
    pub fn discover() -> Result<Self, ConfigError> {
        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            debug!("Using config {}", local_config.display());
            return Self::load(&local_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".ucsf-vpn").join("config.toml");
            if home_config.exists() {
                debug!("Using config {}", home_config.display());
                return Self::load(&home_config);
            }
        }

        info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Paths and names the Pulse Secure backend works with
#[derive(Debug, Clone)]
pub struct PulseSettings {
    pub connection_name: String,
    pub ui_binary: PathBuf,
    pub service_name: String,
    pub window_name: String,
    pub prompt_window_name: String,
    pub connections_file: PathBuf,
    pub log_file: PathBuf,
}

impl From<&PulseConfig> for PulseSettings {
    fn from(pulse: &PulseConfig) -> Self {
        Self {
            connection_name: pulse.connection_name.clone(),
            ui_binary: expand_home(&pulse.ui_binary),
            service_name: pulse.service_name.clone(),
            window_name: pulse.window_name.clone(),
            prompt_window_name: pulse.prompt_window_name.clone(),
            connections_file: expand_home(&pulse.connections_file),
            log_file: expand_home(&pulse.log_file),
        }
    }
}

/// Command-line overrides, as collected by the argument parser
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub method: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub server: Option<String>,
    pub realm: Option<String>,
    pub url: Option<String>,
    pub force: bool,
    pub skip: bool,
    pub debug: bool,
    pub dry_run: bool,
    /// `false` for `--no-gui`; only checked against the method
    pub gui: bool,
    pub notification: bool,
    pub speed: f64,
}

/// Immutable options for one invocation
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub method: Method,
    pub network_name: String,
    pub server: String,
    pub url: String,
    /// Realm requested explicitly with `--realm`
    pub realm: Option<String>,
    pub default_realm: String,
    pub single_factor_realm: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub force: bool,
    pub skip: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub notification: bool,
    /// Multiplier applied to every GUI automation delay
    pub speed: f64,
    pub netrc_path: PathBuf,
    pub ipinfo_url: String,
    pub liveness_host: String,
    pub as_identifier: String,
    pub openconnect_binary: String,
    pub openconnect_log: PathBuf,
    pub pulse: PulseSettings,
}

impl RunConfig {
    pub fn new(file: &Config, overrides: Overrides) -> Result<Self, ConfigError> {
        let method = match overrides.method.as_deref() {
            Some(m) => m.parse()?,
            None => file.vpn.method,
        };

        if !(overrides.speed.is_finite() && overrides.speed > 0.0) {
            return Err(ConfigError::InvalidSpeed(overrides.speed));
        }
        if method == Method::Pulse && !overrides.gui {
            return Err(ConfigError::PulseRequiresGui);
        }

        let netrc_path = dirs::home_dir()
            .map(|home| home.join(".netrc"))
            .unwrap_or_else(|| PathBuf::from(".netrc"));

        Ok(Self {
            method,
            network_name: file.vpn.name.clone(),
            server: overrides.server.unwrap_or_else(|| file.vpn.server.clone()),
            url: overrides.url.unwrap_or_else(|| file.vpn.url.clone()),
            realm: overrides.realm,
            default_realm: file.vpn.realm.clone(),
            single_factor_realm: file.vpn.single_factor_realm.clone(),
            user: overrides.user,
            password: overrides.password,
            token: overrides.token.filter(|t| !t.is_empty()),
            force: overrides.force,
            skip: overrides.skip,
            debug: overrides.debug,
            dry_run: overrides.dry_run,
            notification: overrides.notification,
            speed: overrides.speed,
            netrc_path,
            ipinfo_url: file.network.ipinfo_url.clone(),
            liveness_host: file.network.liveness_host.clone(),
            as_identifier: file.network.as_identifier.clone(),
            openconnect_binary: file.openconnect.binary.clone(),
            openconnect_log: expand_home(&file.openconnect.log_file),
            pulse: PulseSettings::from(&file.pulse),
        })
    }

    /// Realm to authenticate against given the resolved token
    ///
    /// An explicit `--realm` always wins; otherwise token `false` selects the
    /// single-factor realm.
    pub fn realm_for(&self, token: &str) -> &str {
        match &self.realm {
            Some(realm) => realm,
            None if token == "false" => &self.single_factor_realm,
            None => &self.default_realm,
        }
    }
}
