//! UCSF VPN - Connect to and disconnect from the UCSF campus VPN
//!
//! This crate wraps an external VPN client so a single command can bring the
//! campus tunnel up or down. Whether the tunnel is up is decided by asking a
//! public IP-info service which organisation owns our public address.
//!
//! # Architecture
//!
//! - `config`: Settings file (TOML) and per-run options
//! - `probe`: Public IP lookup and connectivity decision
//! - `credentials`: Username, password and one-time token resolution
//! - `dispatch`: Action state machine (start/stop/restart/toggle/status)
//! - `backend`: OpenConnect and Pulse Secure GUI adapters
//! - `platform`: Privilege escalation and process lookup
//! - `logs`: Backend log tail and troubleshooting
//! - `notify`: Desktop notifications
//!
//! # Usage
//!
//! ```bash
//! ucsf-vpn start --user alice --token push
//! ucsf-vpn status
//! ucsf-vpn stop
//! ```

pub mod backend;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod logs;
pub mod notify;
pub mod platform;
pub mod probe;

pub use backend::{AnyBackend, Backend};
pub use config::{Config, Method, Overrides, RunConfig};
pub use dispatch::{Action, Dispatcher, Outcome};
pub use probe::{IpInfoProber, Prober};
