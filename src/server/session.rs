//! Per-connection session state.

use crate::auth::{AuthenticatedUser, MethodsList};
use crate::notification::{EventMeta, ProtocolInfo, SessionEvent, SessionListener, SessionStatus};
use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::command::TypeParam;
use crate::storage::StorageBackend;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session ids are monotonic and never reused within a process lifetime.
pub fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionState {
    /// Waiting for USER.
    New,
    /// USER received, at least one authentication method outstanding.
    WaitPass,
    /// Authenticated; the full command set is available.
    WaitCmd,
}

pub type SharedSession = Arc<Mutex<Session>>;

pub struct Session {
    pub id: u64,
    pub start_time: SystemTime,
    pub started_at: Instant,
    pub source: SocketAddr,
    pub state: SessionState,
    pub username: Option<String>,
    pub user: Option<AuthenticatedUser>,
    /// Remaining authentication work for the pending login.
    pub methods: Option<MethodsList>,
    /// Set on successful login, rooted at the user's virtual filesystem.
    pub storage: Option<Arc<dyn StorageBackend>>,
    pub cwd: PathBuf,
    pub rename_from: Option<PathBuf>,
    /// Restart offset set by REST, consumed by the next RETR/STOR.
    pub start_pos: u64,
    /// True when the control channel was upgraded to TLS.
    pub cmd_tls: bool,
    /// True when PROT P asked for protected data connections.
    pub data_tls: bool,
    pub transfer_type: TypeParam,
    /// EPSV ALL latches the session into extended passive mode only.
    pub epsv_all: bool,
    pub client_name: Option<String>,
    // Channels binding this session to a waiting data-connection task.
    pub data_cmd_tx: Option<Sender<DataChanCmd>>,
    pub data_cmd_rx: Option<Receiver<DataChanCmd>>,
    pub data_abort_tx: Option<Sender<()>>,
    pub data_abort_rx: Option<Receiver<()>>,
    pub data_busy: bool,
    /// Where to connect for active (PORT/EPRT) mode.
    pub data_dest: Option<SocketAddr>,
    /// Refreshed on every command and on every data-channel byte.
    pub last_activity: Arc<StdMutex<Instant>>,
    pub notifier: Arc<dyn SessionListener>,
    entry_counter: u64,
}

impl Session {
    pub fn new(source: SocketAddr, notifier: Arc<dyn SessionListener>) -> Session {
        Session {
            id: next_session_id(),
            start_time: SystemTime::now(),
            started_at: Instant::now(),
            source,
            state: SessionState::New,
            username: None,
            user: None,
            methods: None,
            storage: None,
            cwd: PathBuf::from("/"),
            rename_from: None,
            start_pos: 0,
            cmd_tls: false,
            data_tls: false,
            transfer_type: TypeParam::Image,
            epsv_all: false,
            client_name: None,
            data_cmd_tx: None,
            data_cmd_rx: None,
            data_abort_tx: None,
            data_abort_rx: None,
            data_busy: false,
            data_dest: None,
            last_activity: Arc::new(StdMutex::new(Instant::now())),
            notifier,
            entry_counter: 0,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn next_entry_id(&mut self) -> u64 {
        self.entry_counter += 1;
        self.entry_counter
    }

    /// Resolve a client-supplied path against the working directory.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() { path.to_path_buf() } else { self.cwd.join(path) }
    }

    pub fn event_meta(&self) -> EventMeta {
        EventMeta {
            session_id: self.id,
            since_start: self.started_at.elapsed(),
        }
    }

    pub async fn notify(&self, event: SessionEvent) {
        let meta = self.event_meta();
        self.notifier.receive_session_event(event, meta).await;
    }

    pub fn protocol_info(&self) -> ProtocolInfo {
        let status = match (self.state, self.cmd_tls) {
            (SessionState::WaitCmd, _) => SessionStatus::Active,
            (SessionState::WaitPass, _) => SessionStatus::Authenticating,
            (SessionState::New, _) => SessionStatus::Connected,
        };
        ProtocolInfo {
            status,
            protocol_name: if self.cmd_tls { "FTPS".to_string() } else { "FTP".to_string() },
            client_name: self.client_name.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("state", &self.state)
            .field("username", &self.username)
            .field("cwd", &self.cwd)
            .field("cmd_tls", &self.cmd_tls)
            .field("data_tls", &self.data_tls)
            .field("data_dest", &self.data_dest)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NopListener;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::new("127.0.0.1:2121".parse().unwrap(), Arc::new(NopListener))
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let a = session();
        let b = session();
        assert!(b.id > a.id);
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let mut s = session();
        s.cwd = PathBuf::from("/docs");
        assert_eq!(s.resolve("a.txt"), PathBuf::from("/docs/a.txt"));
        assert_eq!(s.resolve("/b.txt"), PathBuf::from("/b.txt"));
    }
}
