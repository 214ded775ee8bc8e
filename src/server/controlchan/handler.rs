//! The common interface all command handlers implement.

use super::command::Command;
use super::error::ControlChanError;
use super::reply::Reply;
use crate::auth::{AuthenticatedUser, Authenticator};
use crate::server::autobanner::Autobanner;
use crate::server::chancomms::ControlChanMsg;
use crate::server::ftpserver::options::PassiveHost;
use crate::server::portmgr::PortManager;
use crate::server::session::SharedSession;
use crate::server::tls::FtpsConfig;
use async_trait::async_trait;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Builds the storage backend a freshly authenticated user gets, taking the
/// user's virtual root and impersonation settings into account.
pub type StorageFactory = Arc<dyn Fn(&AuthenticatedUser) -> Arc<dyn crate::storage::StorageBackend> + Send + Sync>;

// Common interface for all handlers of `Command`s.
#[async_trait]
pub trait CommandHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError>;
}

/// Represents arguments passed to a `CommandHandler`.
pub struct CommandContext {
    pub parsed_command: Command,
    pub session: SharedSession,
    pub authenticator: Arc<dyn Authenticator>,
    pub ftps_config: FtpsConfig,
    pub passive_ports: RangeInclusive<u16>,
    pub passive_host: PassiveHost,
    pub port_manager: Arc<PortManager>,
    pub autobanner: Arc<Autobanner>,
    pub tx_control_chan: Sender<ControlChanMsg>,
    pub local_addr: std::net::SocketAddr,
    pub storage_factory: StorageFactory,
    pub logger: slog::Logger,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("parsed_command", &self.parsed_command)
            .field("local_addr", &self.local_addr)
            .field("passive_ports", &self.passive_ports)
            .finish_non_exhaustive()
    }
}
