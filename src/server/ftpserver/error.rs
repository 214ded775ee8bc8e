//! Errors raised while starting or running the server.

use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("server error: {kind}")]
pub struct ServerError {
    kind: ServerErrorKind,
    #[source]
    source: Option<BoxError>,
}

#[derive(Debug, Display)]
pub enum ServerErrorKind {
    #[display("could not bind listener")]
    Bind,
    #[display("TLS configuration failed")]
    Tls,
    #[display("I/O error")]
    Io,
    #[display("invalid configuration")]
    Config,
}

impl ServerError {
    pub fn new(kind: ServerErrorKind) -> Self {
        ServerError { kind, source: None }
    }

    pub fn with_source<E: Into<BoxError>>(kind: ServerErrorKind, source: E) -> Self {
        ServerError {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> &ServerErrorKind {
        &self.kind
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::with_source(ServerErrorKind::Io, e)
    }
}
