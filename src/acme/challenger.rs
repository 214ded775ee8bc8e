//! The two ways http-01 challenges get served: a built-in HTTP listener, or
//! files written under an externally served .well-known path.

use super::{AcmeError, AcmeErrorKind};
use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use slog::Logger;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Publishes a key authorization for a challenge token.
#[async_trait]
pub trait Challenger: Send + Sync {
    async fn serve(&self, token: &str, key_authorization: &str) -> Result<(), AcmeError>;
}

const WELL_KNOWN_PREFIX: &str = "/.well-known/acme-challenge/";

/// Answers validation requests itself on one or more listening addresses.
pub struct InternalChallenger {
    addresses: Vec<SocketAddr>,
    map: Arc<Mutex<HashMap<String, String>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<bool>,
    logger: Logger,
}

impl InternalChallenger {
    pub fn new(addresses: Vec<SocketAddr>, logger: Logger) -> InternalChallenger {
        InternalChallenger {
            addresses,
            map: Arc::new(Mutex::new(HashMap::new())),
            listeners: Mutex::new(Vec::new()),
            started: Mutex::new(false),
            logger,
        }
    }

    async fn start_listeners(&self) -> Result<(), AcmeError> {
        let mut handles = Vec::new();
        for addr in &self.addresses {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| AcmeError::new(AcmeErrorKind::Challenger(format!("bind {addr}: {e}"))))?;
            slog::info!(self.logger, "Challenge listener up"; "address" => %addr);

            let map = self.map.clone();
            let logger = self.logger.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let Ok((stream, _peer)) = listener.accept().await else {
                        continue;
                    };
                    let map = map.clone();
                    let logger = logger.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                            let map = map.clone();
                            async move {
                                let path = request.uri().path().to_string();
                                let response = match path.strip_prefix(WELL_KNOWN_PREFIX).and_then(|token| map.lock().unwrap().get(token).cloned()) {
                                    Some(key_authorization) => hyper::Response::builder()
                                        .status(200)
                                        .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
                                        .body(Full::new(Bytes::from(key_authorization))),
                                    None => hyper::Response::builder().status(404).body(Full::new(Bytes::from_static(b"not found"))),
                                };
                                response
                            }
                        });
                        if let Err(err) = hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
                            slog::debug!(logger, "Challenge connection error: {}", err);
                        }
                    });
                }
            }));
        }
        *self.listeners.lock().unwrap() = handles;
        Ok(())
    }
}

#[async_trait]
impl Challenger for InternalChallenger {
    async fn serve(&self, token: &str, key_authorization: &str) -> Result<(), AcmeError> {
        self.map.lock().unwrap().insert(token.to_string(), key_authorization.to_string());
        let needs_start = {
            let mut started = self.started.lock().unwrap();
            if *started {
                false
            } else {
                *started = true;
                true
            }
        };
        if needs_start {
            self.start_listeners().await?;
        }
        Ok(())
    }
}

impl Drop for InternalChallenger {
    fn drop(&mut self) {
        for handle in self.listeners.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// Writes key authorizations into `<well_known_path>/<token>` for a separate
/// web server to deliver. Files are removed again on drop.
pub struct ExternalChallenger {
    well_known_path: PathBuf,
    create_parents: bool,
    written: Mutex<Vec<PathBuf>>,
    logger: Logger,
}

impl ExternalChallenger {
    pub fn new(well_known_path: PathBuf, create_parents: bool, logger: Logger) -> ExternalChallenger {
        ExternalChallenger {
            well_known_path,
            create_parents,
            written: Mutex::new(Vec::new()),
            logger,
        }
    }
}

#[async_trait]
impl Challenger for ExternalChallenger {
    async fn serve(&self, token: &str, key_authorization: &str) -> Result<(), AcmeError> {
        let challenger_err = |e: std::io::Error| AcmeError::new(AcmeErrorKind::Challenger(e.to_string()));

        if self.create_parents {
            tokio::fs::create_dir_all(&self.well_known_path).await.map_err(challenger_err)?;
        }
        let path = self.well_known_path.join(token);
        tokio::fs::write(&path, key_authorization).await.map_err(challenger_err)?;
        slog::info!(self.logger, "Challenge file written"; "path" => %path.display());
        self.written.lock().unwrap().push(path);
        Ok(())
    }
}

impl Drop for ExternalChallenger {
    fn drop(&mut self) {
        for path in self.written.lock().unwrap().drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    #[tokio::test]
    async fn external_challenger_writes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let well_known = dir.path().join("acme-challenge");
        let token_path = well_known.join("token123");
        {
            let challenger = ExternalChallenger::new(well_known.clone(), true, Logger::root(slog::Discard, o!()));
            challenger.serve("token123", "token123.THUMB").await.unwrap();
            assert_eq!(std::fs::read_to_string(&token_path).unwrap(), "token123.THUMB");
        }
        // Dropped; the file is gone.
        assert!(!token_path.exists());
    }
}
