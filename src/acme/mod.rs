//! RFC 8555 ACME client: account management and certificate issuance with
//! http-01 challenges served either by a built-in HTTP listener or by files
//! dropped into a .well-known directory.

pub mod challenger;
pub mod client;
pub mod http;
pub mod jws;

pub use challenger::{Challenger, ExternalChallenger, InternalChallenger};
pub use client::{AcmeClient, IssuedCertificate};
pub use http::{AcmeHttp, HttpResponse, HyperAcmeHttp};
pub use jws::AccountKey;

use derive_more::Display;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("ACME error: {kind}")]
pub struct AcmeError {
    kind: AcmeErrorKind,
}

#[derive(Debug, Display)]
pub enum AcmeErrorKind {
    #[display("another operation is already being executed")]
    OperationInProgress,
    #[display("HTTP request failed: {}", _0)]
    Http(String),
    #[display("directory document is invalid")]
    BadDirectory,
    #[display("no replay nonce available")]
    MissingNonce,
    #[display("invalid JSON from server: {}", _0)]
    Json(String),
    #[display("server clock differs from ours by {} seconds", skew_secs)]
    ClockSkew { skew_secs: i64 },
    #[display("challenge failed: {}", _0)]
    ChallengeFailed(String),
    #[display("unexpected certificate order status: {}", _0)]
    BadOrderStatus(String),
    #[display("identifier {} missing from order authorizations", _0)]
    MissingAuthorization(String),
    #[display("cryptographic operation failed: {}", _0)]
    Crypto(String),
    #[display("challenger could not publish the key authorization: {}", _0)]
    Challenger(String),
    #[display("gave up waiting for {}", _0)]
    Timeout(String),
}

impl AcmeError {
    pub fn new(kind: AcmeErrorKind) -> AcmeError {
        AcmeError { kind }
    }

    pub fn kind(&self) -> &AcmeErrorKind {
        &self.kind
    }
}

impl From<AcmeErrorKind> for AcmeError {
    fn from(kind: AcmeErrorKind) -> AcmeError {
        AcmeError { kind }
    }
}
