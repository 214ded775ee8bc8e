//! Fan-out of server-side events to connected admin sessions: FTP session
//! telemetry, listener status and log lines.

use super::Administrator;
use crate::admin::proto::{LogLine, Msg, ProtocolInfoMsg, SessionRef, SessionStart};
use crate::notification::{EventMeta, SessionEvent, SessionListener, SessionStatus};
use crate::server::ListenerEvent;
use crate::server::autobanner::AddressFamily;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::mpsc;

/// Bridges FTP session events into admin broadcasts. Holds the administrator
/// weakly; sessions outliving the admin plane must not keep it alive.
pub struct AdminNotifier {
    admin: Weak<Administrator>,
}

impl AdminNotifier {
    pub fn new(admin: &Arc<Administrator>) -> Arc<AdminNotifier> {
        Arc::new(AdminNotifier {
            admin: Arc::downgrade(admin),
        })
    }
}

impl std::fmt::Debug for AdminNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminNotifier").finish_non_exhaustive()
    }
}

fn family_code(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::V4 => 0,
        AddressFamily::V6 => 1,
    }
}

fn status_code(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Connected => 0,
        SessionStatus::Securing => 1,
        SessionStatus::Authenticating => 2,
        SessionStatus::Active => 3,
        SessionStatus::Quitting => 4,
    }
}

#[async_trait]
impl SessionListener for AdminNotifier {
    async fn receive_session_event(&self, event: SessionEvent, meta: EventMeta) {
        let Some(admin) = self.admin.upgrade() else {
            return;
        };
        let at = SessionRef {
            session_id: meta.session_id,
            since_start_ms: meta.since_start.as_millis() as u64,
        };

        let msg = match event {
            SessionEvent::Start { start_time, peer_ip, family } => Msg::SessionStart(SessionStart {
                session_id: meta.session_id,
                start_unix_ms: start_time.duration_since(std::time::SystemTime::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0),
                peer_ip: peer_ip.to_string(),
                family: family_code(family),
            }),
            SessionEvent::Stop => Msg::SessionStop(at),
            SessionEvent::UserName { username } => Msg::SessionUserName { at, username },
            SessionEvent::EntryOpen { entry_id, path, size } => Msg::SessionEntryOpen { at, entry_id, path, size },
            SessionEvent::EntryClose { entry_id, error } => Msg::SessionEntryClose { at, entry_id, error },
            SessionEvent::EntryRead { entry_id, amount } => Msg::SessionEntryRead { at, entry_id, amount },
            SessionEvent::EntryWritten {
                entry_id,
                amount,
                actual_entry_size,
            } => Msg::SessionEntryWritten {
                at,
                entry_id,
                amount,
                actual_entry_size,
            },
            SessionEvent::ProtocolInfo { info } => Msg::SessionProtocolInfo {
                at,
                info: ProtocolInfoMsg {
                    status: status_code(info.status),
                    protocol: info.protocol_name,
                    client_name: info.client_name,
                },
            },
        };
        admin.broadcast(msg);
    }
}

impl Administrator {
    /// Forward FTP listener status changes to admin sessions until the
    /// sender goes away.
    pub fn forward_listener_status(self: &Arc<Self>, mut rx: broadcast::Receiver<ListenerEvent>) {
        let admin = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(admin) = admin.upgrade() else { break };
                        admin.broadcast(Msg::ListenerStatus {
                            address: event.address.to_string(),
                            status: event.status as u8,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

/// A log sink that tees records into admin `Log` broadcasts. Hand the
/// receiver end to [`Administrator::forward_log_lines`].
#[derive(Debug, Clone)]
pub struct AdminLogChannel {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl AdminLogChannel {
    pub fn new() -> (AdminLogChannel, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AdminLogChannel { tx }, rx)
    }

    pub fn log(&self, session_id: u64, level: u8, module: &str, message: &str) {
        let _ = self.tx.send(LogLine {
            unix_ms: chrono::Utc::now().timestamp_millis(),
            session_id,
            level,
            module: module.to_string(),
            message: message.to_string(),
        });
    }
}

/// A slog drain that mirrors every record into an [`AdminLogChannel`].
#[derive(Debug)]
pub struct AdminLogDrain<D> {
    inner: D,
    channel: AdminLogChannel,
}

impl<D> AdminLogDrain<D> {
    pub fn new(inner: D, channel: AdminLogChannel) -> AdminLogDrain<D> {
        AdminLogDrain { inner, channel }
    }
}

impl<D: slog::Drain> slog::Drain for AdminLogDrain<D> {
    type Ok = D::Ok;
    type Err = D::Err;

    fn log(&self, record: &slog::Record, values: &slog::OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let level = match record.level() {
            slog::Level::Critical | slog::Level::Error => 4,
            slog::Level::Warning => 3,
            slog::Level::Info => 2,
            slog::Level::Debug | slog::Level::Trace => 1,
        };
        self.channel.log(0, level, record.module(), &format!("{}", record.msg()));
        self.inner.log(record, values)
    }
}

impl Administrator {
    /// Drain forwarded log lines into admin broadcasts.
    pub fn forward_log_lines(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<LogLine>) {
        let admin = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let Some(admin) = admin.upgrade() else { break };
                admin.broadcast(Msg::Log(line));
            }
        });
    }
}
