//! The impersonator: privileged file operations executed in a helper process
//! running under another OS identity, reached over a socketpair that carries
//! length-prefixed request/response frames and file descriptors.

pub mod channel;
pub mod client;
pub mod fdpass;
pub mod messages;
pub mod process;
pub mod storage;

pub use client::{ImpClient, ImpClientOptions};
pub use messages::{ImpMessage, ImpResult, InfoReply, OpenMode};
pub use storage::ImpersonatedFilesystem;

use derive_more::Display;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("impersonator error: {kind}")]
pub struct ImpError {
    kind: ImpErrorKind,
}

#[derive(Debug, Display)]
pub enum ImpErrorKind {
    #[display("channel closed")]
    ChannelClosed,
    #[display("request timed out")]
    Timeout,
    #[display("response arrived out of order")]
    OutOfOrder,
    #[display("I/O error: {}", _0)]
    Io(String),
    #[display("frame error: {}", _0)]
    Frame(String),
}

impl ImpError {
    pub fn new(kind: ImpErrorKind) -> ImpError {
        ImpError { kind }
    }

    pub fn kind(&self) -> &ImpErrorKind {
        &self.kind
    }
}

impl From<ImpErrorKind> for ImpError {
    fn from(kind: ImpErrorKind) -> ImpError {
        ImpError { kind }
    }
}

impl From<std::io::Error> for ImpError {
    fn from(e: std::io::Error) -> ImpError {
        ImpError {
            kind: ImpErrorKind::Io(e.to_string()),
        }
    }
}
