//! rustls plumbing for the FTPS control/data channels and the admin plane.

use bitflags::bitflags;
use moka::sync::Cache;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::StoresServerSessions;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

bitflags! {
    /// Used to configure TLS options employed for FTPS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlsFlags: u32 {
        /// Enables TLS version 1.2
        const V1_2               = 0b00000001;
        /// Enables TLS version 1.3
        const V1_3               = 0b00000010;
        /// Enables TLS session resumption via server side session IDs.
        const RESUMPTION_SESS_ID = 0b00001000;
    }
}

impl Default for TlsFlags {
    fn default() -> TlsFlags {
        TlsFlags::V1_2 | TlsFlags::V1_3 | TlsFlags::RESUMPTION_SESS_ID
    }
}

/// How TLS security is configured for the server or a particular channel.
#[derive(Clone)]
pub enum FtpsConfig {
    Off,
    Building { certs_file: PathBuf, key_file: PathBuf },
    On { tls_config: Arc<ServerConfig> },
}

impl FtpsConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FtpsConfig::Off)
    }
}

impl fmt::Debug for FtpsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpsConfig::Off => write!(f, "Off"),
            FtpsConfig::Building { .. } => write!(f, "Building"),
            FtpsConfig::On { .. } => write!(f, "On"),
        }
    }
}

fn io_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> std::io::Error {
    std::io::Error::other(e)
}

/// Build the rustls server configuration for the FTP plane. ALPN advertises
/// `ftp` per the registered protocol id.
pub fn new_config<P: AsRef<Path>>(certs_file: P, key_file: P, flags: TlsFlags) -> std::io::Result<Arc<ServerConfig>> {
    let certs = load_certs(certs_file)?;
    let key = load_private_key(key_file)?;

    let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
    if flags.contains(TlsFlags::V1_2) {
        versions.push(&rustls::version::TLS12);
    }
    if flags.contains(TlsFlags::V1_3) {
        versions.push(&rustls::version::TLS13);
    }
    if versions.is_empty() {
        return Err(std::io::Error::other("no TLS protocol version enabled"));
    }

    let mut config = ServerConfig::builder_with_protocol_versions(&versions)
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(io_error)?;

    config.session_storage = if flags.contains(TlsFlags::RESUMPTION_SESS_ID) {
        TlsSessionCache::new(1024)
    } else {
        Arc::new(rustls::server::NoServerSessionStorage {})
    };
    config.alpn_protocols = vec![b"ftp".to_vec()];

    Ok(Arc::new(config))
}

/// Configuration for the administration plane: TLS 1.2 minimum, no ALPN.
pub fn new_admin_config<P: AsRef<Path>>(certs_file: P, key_file: P) -> std::io::Result<Arc<ServerConfig>> {
    let certs = load_certs(certs_file)?;
    let key = load_private_key(key_file)?;

    let config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(io_error)?;

    Ok(Arc::new(config))
}

pub fn load_certs<P: AsRef<Path>>(filename: P) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let certfile = File::open(filename)?;
    let mut reader = BufReader::new(certfile);
    rustls_pemfile::certs(&mut reader).collect()
}

pub fn load_private_key<P: AsRef<Path>>(filename: P) -> std::io::Result<PrivateKeyDer<'static>> {
    let keyfile = File::open(&filename)?;
    let mut reader = BufReader::new(keyfile);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| std::io::Error::other("no private key found in key file"))
}

/// Generate a self-signed certificate for the given hostnames. Returns
/// `(certificate_pem, private_key_pem)`.
pub fn generate_self_signed(distinguished_name: &str, hostnames: &[String]) -> std::io::Result<(String, String)> {
    let mut params = rcgen::CertificateParams::new(hostnames.to_vec()).map_err(io_error)?;
    let mut dn = rcgen::DistinguishedName::new();
    let cn = distinguished_name.strip_prefix("CN=").unwrap_or(distinguished_name);
    dn.push(rcgen::DnType::CommonName, cn);
    params.distinguished_name = dn;

    let key_pair = rcgen::KeyPair::generate().map_err(io_error)?;
    let cert = params.self_signed(&key_pair).map_err(io_error)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Stores TLS session IDs server side.
struct TlsSessionCache {
    cache: Cache<Vec<u8>, Vec<u8>>,
}

impl TlsSessionCache {
    /// Make a new TlsSessionCache. `size` is the maximum number of stored
    /// sessions.
    pub fn new(size: u64) -> Arc<TlsSessionCache> {
        Arc::new(TlsSessionCache {
            cache: Cache::builder().max_capacity(size).time_to_idle(Duration::from_secs(5 * 60)).build(),
        })
    }
}

impl fmt::Debug for TlsSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSessionCache").finish_non_exhaustive()
    }
}

impl StoresServerSessions for TlsSessionCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.cache.insert(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(&key.to_vec())
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        // Deliberately get-not-remove: some clients (FileZilla among them)
        // resume the same session ID for every data connection.
        self.cache.get(&key.to_vec())
    }

    fn can_cache(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_round_trip_produces_pem() {
        let (cert_pem, key_pem) = generate_self_signed("CN=ftp.example.com", &["ftp.example.com".to_string()]).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn session_cache_keeps_entries_on_take() {
        let cache = TlsSessionCache::new(16);
        assert!(cache.put(vec![1, 2], vec![3, 4]));
        assert_eq!(cache.take(&[1, 2]), Some(vec![3, 4]));
        assert_eq!(cache.take(&[1, 2]), Some(vec![3, 4]));
    }
}
