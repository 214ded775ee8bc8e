//! The administration listener: TLS 1.2+ only, length-prefixed RPC inside.

use super::session::{AdminRequestHandler, run_session};
use slog::Logger;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

static NEXT_ADMIN_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct AdminServer {
    pub tls_config: Arc<rustls::ServerConfig>,
    pub handler: Arc<dyn AdminRequestHandler>,
    pub logger: Logger,
}

impl AdminServer {
    pub async fn listen(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        slog::info!(self.logger, "Administration server listening"; "address" => %addr);

        loop {
            let (tcp_stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    slog::error!(self.logger, "Error accepting admin connection: {}", err);
                    continue;
                }
            };

            let acceptor = TlsAcceptor::from(self.tls_config.clone());
            let handler = self.handler.clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                match acceptor.accept(tcp_stream).await {
                    Ok(tls_stream) => {
                        let id = NEXT_ADMIN_SESSION_ID.fetch_add(1, Ordering::Relaxed);
                        let session_logger = logger.new(slog::o!("admin_session" => id, "peer" => peer.to_string()));
                        slog::info!(session_logger, "Admin session accepted");
                        run_session(tls_stream, id, peer, handler, session_logger).await;
                    }
                    Err(err) => {
                        slog::warn!(logger, "Admin TLS handshake with {} failed: {}", peer, err);
                    }
                }
            });
        }
    }
}
