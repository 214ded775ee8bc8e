//! Contains the [`Server`] struct used to configure and run the FTP plane.

pub mod error;
pub mod listener;
pub mod options;

use crate::auth::Authenticator;
use crate::notification::{NopListener, SessionListener};
use crate::server::autobanner::{Autobanner, AutobannerOptions};
use crate::server::controlchan::control_loop::LoopConfig;
use crate::server::controlchan::handler::StorageFactory;
use crate::server::portmgr::PortManager;
use crate::server::registry::SessionRegistry;
use crate::server::tls::{self, FtpsConfig, TlsFlags};
use crate::storage::Filesystem;
use error::{ServerError, ServerErrorKind};
use listener::{Listener, ListenerEvent};
use options::{FtpsRequired, PassiveHost, WelcomeMessage, WelcomeValidation};
use slog::Logger;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// One address the server accepts FTP clients on.
#[derive(Debug, Clone)]
pub struct BindAddress {
    pub address: SocketAddr,
    /// Implicit-TLS listeners handshake before the banner.
    pub implicit_tls: bool,
}

/// The FTP(S) server. Configure with the builder-style methods, then call
/// [`Server::listen`].
pub struct Server {
    authenticator: Arc<dyn Authenticator>,
    storage_factory: StorageFactory,
    welcome: WelcomeMessage,
    passive_ports: RangeInclusive<u16>,
    passive_host: PassiveHost,
    ftps_config: FtpsConfig,
    ftps_required: FtpsRequired,
    login_timeout: Duration,
    activity_timeout: Duration,
    autobanner: Arc<Autobanner>,
    notifier: Arc<dyn SessionListener>,
    registry: Arc<SessionRegistry>,
    port_manager: Arc<PortManager>,
    listener_status_tx: broadcast::Sender<ListenerEvent>,
    logger: Logger,
}

impl Server {
    /// A server that authenticates against `authenticator` and serves each
    /// user their own virtual filesystem root.
    pub fn new(authenticator: Arc<dyn Authenticator>, logger: Logger) -> Server {
        let autobanner = Autobanner::new(AutobannerOptions::default(), logger.new(slog::o!("module" => "autoban")));
        let (listener_status_tx, _) = broadcast::channel(16);
        Server {
            authenticator,
            storage_factory: Arc::new(|user| Arc::new(Filesystem::new(user.vfs_root.clone()))),
            welcome: WelcomeMessage::default(),
            passive_ports: options::DEFAULT_PASSIVE_PORTS,
            passive_host: PassiveHost::default(),
            ftps_config: FtpsConfig::Off,
            ftps_required: FtpsRequired::None,
            login_timeout: options::DEFAULT_LOGIN_TIMEOUT,
            activity_timeout: options::DEFAULT_ACTIVITY_TIMEOUT,
            autobanner,
            notifier: Arc::new(NopListener),
            registry: SessionRegistry::new(),
            port_manager: PortManager::new(),
            listener_status_tx,
            logger,
        }
    }

    pub fn greeting(mut self, welcome: WelcomeMessage) -> Result<Server, ServerError> {
        if welcome.validate() != WelcomeValidation::Ok {
            return Err(ServerError::new(ServerErrorKind::Config));
        }
        self.welcome = welcome;
        Ok(self)
    }

    pub fn passive_ports(mut self, ports: RangeInclusive<u16>) -> Server {
        self.passive_ports = ports;
        self
    }

    pub fn passive_host<H: Into<PassiveHost>>(mut self, host: H) -> Server {
        self.passive_host = host.into();
        self
    }

    /// Enable FTPS with the given PEM files.
    pub fn ftps<P: Into<PathBuf>>(mut self, certs_file: P, key_file: P) -> Server {
        self.ftps_config = FtpsConfig::Building {
            certs_file: certs_file.into(),
            key_file: key_file.into(),
        };
        self
    }

    pub fn ftps_required<R: Into<FtpsRequired>>(mut self, required: R) -> Server {
        self.ftps_required = required.into();
        self
    }

    pub fn login_timeout(mut self, timeout: Duration) -> Server {
        self.login_timeout = timeout;
        self
    }

    pub fn activity_timeout(mut self, timeout: Duration) -> Server {
        self.activity_timeout = timeout;
        self
    }

    pub fn autoban(self, opts: AutobannerOptions) -> Server {
        self.autobanner.set_options(opts);
        self
    }

    pub fn notify_sessions(mut self, listener: Arc<dyn SessionListener>) -> Server {
        self.notifier = listener;
        self
    }

    /// Replace how per-user storage backends are built (e.g. to route through
    /// the impersonator).
    pub fn storage_factory(mut self, factory: StorageFactory) -> Server {
        self.storage_factory = factory;
        self
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn autobanner(&self) -> Arc<Autobanner> {
        self.autobanner.clone()
    }

    pub fn subscribe_listener_status(&self) -> broadcast::Receiver<ListenerEvent> {
        self.listener_status_tx.subscribe()
    }

    fn resolve_tls(&mut self) -> Result<(), ServerError> {
        if let FtpsConfig::Building { certs_file, key_file } = &self.ftps_config {
            let config = tls::new_config(certs_file, key_file, TlsFlags::default()).map_err(|e| ServerError::with_source(ServerErrorKind::Tls, e))?;
            self.ftps_config = FtpsConfig::On { tls_config: config };
        }
        Ok(())
    }

    fn loop_config(&self, logger: Logger) -> LoopConfig {
        LoopConfig {
            authenticator: self.authenticator.clone(),
            storage_factory: self.storage_factory.clone(),
            ftps_config: self.ftps_config.clone(),
            ftps_required: self.ftps_required,
            welcome: self.welcome.clone(),
            login_timeout: self.login_timeout,
            activity_timeout: self.activity_timeout,
            passive_ports: self.passive_ports.clone(),
            passive_host: self.passive_host.clone(),
            port_manager: self.port_manager.clone(),
            autobanner: self.autobanner.clone(),
            notifier: self.notifier.clone(),
            registry: self.registry.clone(),
            logger,
        }
    }

    /// Bind every address and serve until the task is dropped.
    pub async fn listen(mut self, binds: Vec<BindAddress>) -> Result<(), ServerError> {
        if binds.is_empty() {
            return Err(ServerError::new(ServerErrorKind::Config));
        }
        let needs_tls = binds.iter().any(|b| b.implicit_tls) || self.ftps_required != FtpsRequired::None;
        if needs_tls && !self.ftps_config.is_enabled() {
            return Err(ServerError::new(ServerErrorKind::Config));
        }
        self.resolve_tls()?;

        let server = Arc::new(self);
        let mut handles = Vec::new();
        for bind in binds {
            let server = server.clone();
            let logger = server.logger.new(slog::o!("listener" => bind.address.to_string()));
            let status_tx = server.listener_status_tx.clone();
            let listener = Listener {
                bind_address: bind.address,
                logger: logger.clone(),
                make_loop_config: Box::new(move || server.loop_config(logger.new(slog::o!()))),
                status_tx,
                implicit_tls: bind.implicit_tls,
            };
            handles.push(tokio::spawn(listener.listen()));
        }

        for handle in handles {
            match handle.await {
                Ok(result) => result?,
                Err(_) => return Err(ServerError::new(ServerErrorKind::Io)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StoredCredentials, User, UserDb};
    use crate::server::autobanner::AutobannerOptions;
    use crate::server::controlchan::control_loop;
    use pretty_assertions::assert_eq;
    use slog::o;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_db(home: &std::path::Path) -> UserDb {
        UserDb {
            users: vec![User {
                name: "alice".into(),
                enabled: true,
                groups: vec![],
                credentials: StoredCredentials::from_password("s3cret"),
                vfs_root: Some(home.to_path_buf()),
                impersonation: None,
                speed_limits: Default::default(),
            }],
            groups: vec![],
        }
    }

    /// Spin up a single-connection server on an ephemeral port.
    async fn spawn_one_shot(server: &Server) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = server.loop_config(test_logger());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            control_loop::spawn_loop(config, stream).unwrap();
        });
        addr
    }

    struct Client {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Client {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read_half, writer) = stream.into_split();
            Client {
                reader: BufReader::new(read_half),
                writer,
            }
        }

        async fn reply(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line.trim_end().to_string()
        }

        async fn cmd(&mut self, line: &str) -> String {
            self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
            self.reply().await
        }
    }

    #[tokio::test]
    async fn plain_login_list_and_quit() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("hello.txt"), "hello world").unwrap();

        let auth = crate::auth::FileBasedAuthenticator::new(test_db(home.path()), test_logger());
        let server = Server::new(auth, test_logger()).passive_ports(50100..=50199);
        let addr = spawn_one_shot(&server).await;

        let mut client = Client::connect(addr).await;
        assert!(client.reply().await.starts_with("220 "), "expected greeting");

        assert!(client.cmd("USER alice").await.starts_with("331 "));
        assert!(client.cmd("PASS s3cret").await.starts_with("230 "));
        assert!(client.cmd("TYPE I").await.starts_with("200 "));

        let pasv = client.cmd("PASV").await;
        assert!(pasv.starts_with("227 "), "pasv reply: {pasv}");
        let inside = pasv.split('(').nth(1).unwrap().trim_end_matches(')');
        let parts: Vec<u16> = inside.split(',').map(|p| p.parse().unwrap()).collect();
        let port = parts[4] * 256 + parts[5];
        assert!((50100..=50199).contains(&port), "port {port} outside the passive range");

        let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        assert!(client.cmd("LIST").await.starts_with("150 "));
        let mut listing = String::new();
        data.read_to_string(&mut listing).await.unwrap();
        assert!(listing.contains("hello.txt"), "listing: {listing}");
        assert!(client.reply().await.starts_with("226 "));

        assert!(client.cmd("QUIT").await.starts_with("221 "));
    }

    #[tokio::test]
    async fn retr_streams_file_contents() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("data.bin"), b"0123456789").unwrap();

        let auth = crate::auth::FileBasedAuthenticator::new(test_db(home.path()), test_logger());
        let server = Server::new(auth, test_logger()).passive_ports(50200..=50299);
        let addr = spawn_one_shot(&server).await;

        let mut client = Client::connect(addr).await;
        client.reply().await;
        client.cmd("USER alice").await;
        client.cmd("PASS s3cret").await;
        client.cmd("TYPE I").await;
        assert!(client.cmd("REST 4").await.starts_with("350 "));

        let pasv = client.cmd("PASV").await;
        let inside = pasv.split('(').nth(1).unwrap().trim_end_matches(')');
        let parts: Vec<u16> = inside.split(',').map(|p| p.parse().unwrap()).collect();
        let port = parts[4] * 256 + parts[5];
        let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        assert!(client.cmd("RETR data.bin").await.starts_with("150 "));
        let mut contents = Vec::new();
        data.read_to_end(&mut contents).await.unwrap();
        // REST 4 means streaming starts at offset 4.
        assert_eq!(contents, b"456789");
        assert!(client.reply().await.starts_with("226 "));
    }

    #[tokio::test]
    async fn repeated_login_failures_ban_the_address() {
        let home = tempfile::tempdir().unwrap();
        let auth = crate::auth::FileBasedAuthenticator::new(test_db(home.path()), test_logger());
        let server = Server::new(auth, test_logger()).autoban(AutobannerOptions {
            max_failures: 3,
            failures_window: std::time::Duration::from_secs(10),
            ban_duration: std::time::Duration::from_secs(60),
        });
        let banner = server.autobanner();
        let addr = spawn_one_shot(&server).await;

        let mut client = Client::connect(addr).await;
        client.reply().await;
        client.cmd("USER bob").await;
        assert!(client.cmd("PASS wrong1").await.starts_with("530 "));
        assert!(client.cmd("PASS wrong2").await.starts_with("530 "));
        assert!(client.cmd("PASS wrong3").await.starts_with("530 "));

        // The third failure trips the ban; the session is closed with 421.
        assert!(client.reply().await.starts_with("421 "));
        assert!(banner.is_banned("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn commands_require_authentication() {
        let home = tempfile::tempdir().unwrap();
        let auth = crate::auth::FileBasedAuthenticator::new(test_db(home.path()), test_logger());
        let server = Server::new(auth, test_logger());
        let addr = spawn_one_shot(&server).await;

        let mut client = Client::connect(addr).await;
        client.reply().await;
        assert!(client.cmd("PWD").await.starts_with("530 "));
        assert!(client.cmd("SYST").await.starts_with("215 "));
    }

    #[tokio::test]
    async fn epsv_all_locks_out_pasv() {
        let home = tempfile::tempdir().unwrap();
        let auth = crate::auth::FileBasedAuthenticator::new(test_db(home.path()), test_logger());
        let server = Server::new(auth, test_logger()).passive_ports(50300..=50399);
        let addr = spawn_one_shot(&server).await;

        let mut client = Client::connect(addr).await;
        client.reply().await;
        client.cmd("USER alice").await;
        client.cmd("PASS s3cret").await;
        assert!(client.cmd("EPSV ALL").await.starts_with("200 "));
        assert!(client.cmd("PASV").await.starts_with("501 "));
        let epsv = client.cmd("EPSV").await;
        assert!(epsv.starts_with("229 "), "epsv reply: {epsv}");
    }
}
