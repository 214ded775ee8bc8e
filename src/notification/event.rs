use crate::server::autobanner::AddressFamily;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

/// Coarse session state carried in protocol-info snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Securing,
    Authenticating,
    Active,
    Quitting,
}

/// A snapshot of what is known about the protocol side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub status: SessionStatus,
    /// "FTP" or "FTPS".
    pub protocol_name: String,
    /// What the client announced through CLNT, if anything.
    pub client_name: Option<String>,
}

/// Identifies the session an event pertains to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    pub session_id: u64,
    pub since_start: Duration,
}

/// Everything a session reports while it lives.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start {
        start_time: SystemTime,
        peer_ip: IpAddr,
        family: AddressFamily,
    },
    Stop,
    /// The client named itself with USER; sent before authentication
    /// concludes so observers can correlate failures too.
    UserName {
        username: String,
    },
    EntryOpen {
        entry_id: u64,
        path: String,
        size: i64,
    },
    EntryClose {
        entry_id: u64,
        error: i32,
    },
    EntryRead {
        entry_id: u64,
        amount: u64,
    },
    EntryWritten {
        entry_id: u64,
        amount: u64,
        actual_entry_size: u64,
    },
    ProtocolInfo {
        info: ProtocolInfo,
    },
}

/// Receives session events. Implementations must be cheap; they are called
/// from session tasks.
#[async_trait]
pub trait SessionListener: Send + Sync + Debug {
    async fn receive_session_event(&self, event: SessionEvent, meta: EventMeta);
}
