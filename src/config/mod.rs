//! Configuration: the persisted settings sections and the versioned archiver
//! façade that loads and saves them.

pub mod archiver;
pub mod settings;

pub use archiver::{Archiver, ArchiverError, CONFIG_VERSION, FLAVOUR, VersionCheck};
pub use settings::{AcmeOptions, AdminOptions, AutobanConfig, FtpOptions, IpFilterLists, ListenerConfig, LogLevel, LoggerOptions, ProtocolOptions, Settings, UpdateOptions};

/// The well-known file names inside the configuration directory.
pub mod files {
    pub const SETTINGS: &str = "settings.json";
    pub const USERS: &str = "users.json";
    pub const GROUPS: &str = "groups.json";
    pub const DISALLOWED_IPS: &str = "disallowed_ips.json";
    pub const ALLOWED_IPS: &str = "allowed_ips.json";
}
