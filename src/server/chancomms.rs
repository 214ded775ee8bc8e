//! Messages from the data-channel task (and other background work) back to
//! the per-connection control loop.

use crate::storage;

/// Commands handed to a waiting data-channel task.
#[derive(Debug, PartialEq)]
pub enum DataChanCmd {
    Retr { path: String },
    Stor { path: String },
    Appe { path: String },
    List { path: Option<String> },
    Nlst { path: Option<String> },
    Mlsd { path: Option<String> },
}

/// Status messages the control loop turns into replies.
#[derive(Debug)]
pub enum ControlChanMsg {
    /// RETR finished; `bytes` went out.
    SentData { bytes: u64 },
    /// STOR/APPE finished; `bytes` were written.
    WrittenData { bytes: u64 },
    /// LIST/NLST/MLSD finished.
    DirectoryListed,
    /// The peer never connected to the passive port, or connecting out for
    /// active mode failed.
    DataConnectionNotEstablished,
    /// The data connection died mid-transfer.
    ConnectionReset,
    /// An in-flight transfer was cancelled by ABOR.
    TransferAborted,
    /// The storage backend refused or failed the operation.
    StorageError(storage::Error),
    /// AUTH TLS accepted; the loop must upgrade the control socket next.
    SecureControlChannel,
    /// Authentication concluded successfully.
    AuthSuccess,
    /// Authentication failed (the autobanner has already been told).
    AuthFailed,
    /// This address got itself banned; tear the session down with 421.
    Banned,
    /// Client asked to quit.
    Quit,
}
