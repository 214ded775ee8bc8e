//! Setup options for the [`Server`](crate::Server).

use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;
use std::time::Duration;

pub(crate) const DEFAULT_GREETING: &str = "Welcome to the ironftpd FTP server";
pub(crate) const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);
pub(crate) const DEFAULT_PASSIVE_PORTS: RangeInclusive<u16> = 49152..=65534;

/// The option to `Server.passive_host`. It allows the user to specify how the
/// IP address communicated in the _PASV_ response is determined.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PassiveHost {
    /// Use the IP address of the control connection.
    FromConnection,
    /// Advertise this specific IP address.
    Ip(Ipv4Addr),
    /// Resolve this DNS name into an IPv4 address.
    Dns(String),
}

impl Default for PassiveHost {
    fn default() -> Self {
        PassiveHost::FromConnection
    }
}

impl From<Ipv4Addr> for PassiveHost {
    fn from(ip: Ipv4Addr) -> Self {
        PassiveHost::Ip(ip)
    }
}

impl From<&str> for PassiveHost {
    fn from(dns_or_ip: &str) -> Self {
        match dns_or_ip.parse() {
            Ok(IpAddr::V4(ip)) => PassiveHost::Ip(ip),
            _ => PassiveHost::Dns(dns_or_ip.to_string()),
        }
    }
}

/// Whether clients are required to upgrade to a secure TLS connection before
/// doing anything else.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FtpsRequired {
    /// Every user must use FTPS.
    All,
    /// Every named account requires FTPS.
    Accounts,
    /// FTPS not enforced.
    None,
}

impl From<bool> for FtpsRequired {
    fn from(on: bool) -> Self {
        if on { FtpsRequired::All } else { FtpsRequired::None }
    }
}

impl Display for FtpsRequired {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                FtpsRequired::All => "All users require FTPS",
                FtpsRequired::Accounts => "All accounts require FTPS",
                FtpsRequired::None => "FTPS not enforced",
            }
        )
    }
}

/// The welcome banner: free text, possibly multi-line, optionally prefixed
/// with the server version on the first line.
#[derive(Debug, Clone)]
pub struct WelcomeMessage {
    pub text: String,
    pub has_version: bool,
}

/// Why a configured banner was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum WelcomeValidation {
    Ok,
    TotalSizeTooBig,
    LineTooLong,
}

impl WelcomeMessage {
    pub const LINE_LIMIT: usize = 1024;
    pub const TOTAL_LIMIT: usize = 100 * 1024;

    pub fn new(text: impl Into<String>) -> Self {
        WelcomeMessage {
            text: text.into(),
            has_version: true,
        }
    }

    pub fn validate(&self) -> WelcomeValidation {
        if self.text.len() > Self::TOTAL_LIMIT {
            return WelcomeValidation::TotalSizeTooBig;
        }
        if self.text.lines().any(|l| l.len() > Self::LINE_LIMIT) {
            return WelcomeValidation::LineTooLong;
        }
        WelcomeValidation::Ok
    }

    /// The banner lines as they go onto the wire.
    pub fn render(&self) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        if self.has_version {
            lines.push(format!("ironftpd Version: {}", env!("CARGO_PKG_VERSION")));
        }
        for line in self.text.lines() {
            lines.push(line.to_string());
        }
        if lines.is_empty() {
            lines.push(DEFAULT_GREETING.to_string());
        }
        lines
    }
}

impl Default for WelcomeMessage {
    fn default() -> Self {
        WelcomeMessage {
            text: DEFAULT_GREETING.to_string(),
            has_version: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn banner_validation_limits() {
        let ok = WelcomeMessage::new("hello\nworld");
        assert_eq!(ok.validate(), WelcomeValidation::Ok);

        let long_line = WelcomeMessage::new("x".repeat(WelcomeMessage::LINE_LIMIT + 1));
        assert_eq!(long_line.validate(), WelcomeValidation::LineTooLong);

        let huge = WelcomeMessage::new("y\n".repeat(WelcomeMessage::TOTAL_LIMIT));
        assert_eq!(huge.validate(), WelcomeValidation::TotalSizeTooBig);
    }

    #[test]
    fn version_goes_on_the_first_line() {
        let message = WelcomeMessage::new("Hi there");
        let lines = message.render();
        assert!(lines[0].contains("Version:"));
        assert_eq!(lines[1], "Hi there");
    }

    #[test]
    fn passive_host_from_str() {
        assert_eq!(PassiveHost::from("10.0.0.1"), PassiveHost::Ip(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(PassiveHost::from("ftp.example.com"), PassiveHost::Dns("ftp.example.com".to_string()));
    }
}
