//! One bound FTP listener: accepts control connections, applies the autoban
//! policy and hands sockets to the control loop.

use super::error::{ServerError, ServerErrorKind};
use crate::server::controlchan;
use crate::server::tls::FtpsConfig;
use slog::Logger;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Status of a listener, as reported to the administration plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Stopped,
    Starting,
    Listening,
    Error,
}

#[derive(Debug, Clone)]
pub struct ListenerEvent {
    pub address: SocketAddr,
    pub status: ListenerStatus,
}

/// How long to keep retrying a bind that fails with EADDRINUSE; a previous
/// instance may still be winding down.
const BIND_RETRY_WINDOW: Duration = Duration::from_secs(30);
const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Listener {
    pub bind_address: SocketAddr,
    pub logger: Logger,
    pub make_loop_config: Box<dyn Fn() -> controlchan::control_loop::LoopConfig + Send + Sync>,
    pub status_tx: broadcast::Sender<ListenerEvent>,
    pub implicit_tls: bool,
}

impl Listener {
    fn report(&self, status: ListenerStatus) {
        let _ = self.status_tx.send(ListenerEvent {
            address: self.bind_address,
            status,
        });
    }

    async fn bind_with_retry(&self) -> Result<TcpListener, ServerError> {
        let give_up_at = tokio::time::Instant::now() + BIND_RETRY_WINDOW;
        loop {
            match TcpListener::bind(self.bind_address).await {
                Ok(listener) => return Ok(listener),
                Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && tokio::time::Instant::now() < give_up_at => {
                    slog::warn!(self.logger, "Address {} in use, retrying", self.bind_address);
                    tokio::time::sleep(BIND_RETRY_DELAY).await;
                }
                Err(err) => {
                    self.report(ListenerStatus::Error);
                    return Err(ServerError::with_source(ServerErrorKind::Bind, err));
                }
            }
        }
    }

    pub async fn listen(self) -> Result<(), ServerError> {
        self.report(ListenerStatus::Starting);
        let listener = self.bind_with_retry().await?;
        self.report(ListenerStatus::Listening);
        slog::info!(self.logger, "Listening"; "address" => %self.bind_address, "implicit_tls" => self.implicit_tls);

        loop {
            match listener.accept().await {
                Ok((tcp_stream, socket_addr)) => {
                    let config = (self.make_loop_config)();

                    // A banned address is dropped without so much as a banner.
                    if config.autobanner.is_banned(socket_addr.ip()) {
                        slog::debug!(self.logger, "Dropping connection from banned address"; "peer" => %socket_addr);
                        drop(tcp_stream);
                        continue;
                    }

                    slog::info!(self.logger, "Incoming control connection"; "peer" => %socket_addr);
                    if self.implicit_tls {
                        let FtpsConfig::On { tls_config } = config.ftps_config.clone() else {
                            slog::error!(self.logger, "Implicit TLS listener without TLS configuration");
                            continue;
                        };
                        let logger = self.logger.clone();
                        tokio::spawn(async move {
                            let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
                            match acceptor.accept(tcp_stream).await {
                                Ok(tls_stream) => {
                                    if let Err(err) = controlchan::control_loop::spawn_loop_tls(config, tls_stream) {
                                        slog::error!(logger, "Could not spawn control channel loop for {}: {:?}", socket_addr, err);
                                    }
                                }
                                Err(err) => {
                                    slog::warn!(logger, "Implicit TLS handshake with {} failed: {}", socket_addr, err);
                                }
                            }
                        });
                    } else if let Err(err) = controlchan::control_loop::spawn_loop(config, tcp_stream) {
                        slog::error!(self.logger, "Could not spawn control channel loop for {}: {:?}", socket_addr, err);
                    }
                }
                Err(err) => {
                    slog::error!(self.logger, "Error accepting incoming control connection: {:?}", err);
                }
            }
        }
    }
}
