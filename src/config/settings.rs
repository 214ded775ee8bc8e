//! The persisted configuration sections.
//!
//! Each section is a plain serde struct; the archiver wraps them in a
//! flavour/version envelope on disk, and the admin plane moves them around
//! as JSON blobs.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub address: SocketAddr,
    #[serde(default)]
    pub implicit_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpOptions {
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default = "default_passive_port_min")]
    pub passive_port_min: u16,
    #[serde(default = "default_passive_port_max")]
    pub passive_port_max: u16,
    /// Advertised in PASV replies instead of the connection address, when
    /// set and the peer is not local.
    #[serde(default)]
    pub passive_host_override: Option<String>,
    #[serde(default)]
    pub welcome_message: String,
    #[serde(default)]
    pub welcome_has_version: bool,
    #[serde(default)]
    pub require_tls: bool,
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,
    #[serde(default)]
    pub tls_certs_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
    #[serde(default)]
    pub autoban: AutobanConfig,
}

fn default_passive_port_min() -> u16 {
    49152
}
fn default_passive_port_max() -> u16 {
    65534
}
fn default_login_timeout_secs() -> u64 {
    60
}
fn default_activity_timeout_secs() -> u64 {
    600
}

impl Default for FtpOptions {
    fn default() -> Self {
        FtpOptions {
            listeners: vec![],
            passive_port_min: default_passive_port_min(),
            passive_port_max: default_passive_port_max(),
            passive_host_override: None,
            welcome_message: String::new(),
            welcome_has_version: false,
            require_tls: false,
            login_timeout_secs: default_login_timeout_secs(),
            activity_timeout_secs: default_activity_timeout_secs(),
            tls_certs_file: None,
            tls_key_file: None,
            autoban: AutobanConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutobanConfig {
    #[serde(default)]
    pub max_failures: u32,
    #[serde(default = "default_failures_window_secs")]
    pub failures_window_secs: u64,
    #[serde(default = "default_ban_duration_secs")]
    pub ban_duration_secs: u64,
}

fn default_failures_window_secs() -> u64 {
    10
}
fn default_ban_duration_secs() -> u64 {
    300
}

impl Default for AutobanConfig {
    fn default() -> Self {
        AutobanConfig {
            max_failures: 0,
            failures_window_secs: default_failures_window_secs(),
            ban_duration_secs: default_ban_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminOptions {
    pub listen_address: SocketAddr,
    /// PBKDF2 record of the administrator password, as produced by
    /// `auth::password::generate`.
    #[serde(default)]
    pub password: Option<crate::auth::StoredCredentials>,
    #[serde(default)]
    pub tls_certs_file: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_file: Option<PathBuf>,
}

impl Default for AdminOptions {
    fn default() -> Self {
        AdminOptions {
            listen_address: "127.0.0.1:14148".parse().unwrap(),
            password: None,
            tls_certs_file: None,
            tls_key_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerOptions {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub level: LogLevel,
    /// Forward records at or above `level` to connected admin sessions.
    #[serde(default)]
    pub forward_to_admin: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolOptions {
    /// Allow MODE Z style compression extensions (not built; kept for the
    /// wire so clients can see it is off).
    #[serde(default)]
    pub allow_compression: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeOptions {
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    /// Maximum tolerated difference between our clock and the ACME server's
    /// Date headers, in seconds. Zero disables the guard.
    #[serde(default)]
    pub allowed_clock_skew_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    #[serde(default)]
    pub check_enabled: bool,
    #[serde(default)]
    pub query_string: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpFilterLists {
    #[serde(default)]
    pub disallowed: Vec<String>,
    #[serde(default)]
    pub allowed: Vec<String>,
}

/// Everything the server persists, one field per settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub ftp: FtpOptions,
    #[serde(default)]
    pub admin: AdminOptions,
    #[serde(default)]
    pub logger: LoggerOptions,
    #[serde(default)]
    pub protocols: ProtocolOptions,
    #[serde(default)]
    pub acme: AcmeOptions,
    #[serde(default)]
    pub updates: UpdateOptions,
}
