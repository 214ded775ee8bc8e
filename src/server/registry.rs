//! The live session map. Sessions register on accept and deregister when the
//! control loop ends; the administration plane uses the map for its session
//! listing and to end sessions on request.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// What the registry knows about one live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u64,
    pub peer_ip: IpAddr,
    pub start_time: SystemTime,
    pub username: Option<String>,
}

#[derive(Debug)]
struct Registered {
    info: SessionInfo,
    kill_tx: mpsc::Sender<()>,
}

/// Mutex-free map of live sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Registered>,
}

impl SessionRegistry {
    pub fn new() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::default())
    }

    /// Register a session; the returned receiver fires when someone asks the
    /// session to end.
    pub fn register(&self, info: SessionInfo) -> mpsc::Receiver<()> {
        let (kill_tx, kill_rx) = mpsc::channel(1);
        self.sessions.insert(info.id, Registered { info, kill_tx });
        kill_rx
    }

    pub fn deregister(&self, id: u64) {
        self.sessions.remove(&id);
    }

    pub fn set_username(&self, id: u64, username: &str) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.info.username = Some(username.to_string());
        }
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|e| e.info.clone()).collect()
    }

    /// Ask the given sessions to end. Returns how many were actually told.
    pub async fn end_sessions(&self, ids: &[u64]) -> usize {
        let mut ended = 0;
        for id in ids {
            let kill_tx = self.sessions.get(id).map(|e| e.kill_tx.clone());
            if let Some(tx) = kill_tx {
                if tx.send(()).await.is_ok() {
                    ended += 1;
                }
            }
        }
        ended
    }

    /// Ask every session from the given address to end.
    pub async fn end_sessions_from(&self, ip: IpAddr) -> usize {
        let ids: Vec<u64> = self.sessions.iter().filter(|e| e.info.peer_ip == ip).map(|e| e.info.id).collect();
        self.end_sessions(&ids).await
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(id: u64, ip: &str) -> SessionInfo {
        SessionInfo {
            id,
            peer_ip: ip.parse().unwrap(),
            start_time: SystemTime::now(),
            username: None,
        }
    }

    #[tokio::test]
    async fn end_sessions_reaches_registered_receivers() {
        let registry = SessionRegistry::new();
        let mut rx1 = registry.register(info(1, "10.0.0.1"));
        let _rx2 = registry.register(info(2, "10.0.0.2"));

        let ended = registry.end_sessions(&[1, 99]).await;
        assert_eq!(ended, 1);
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn end_sessions_by_address_targets_only_that_peer() {
        let registry = SessionRegistry::new();
        let mut rx1 = registry.register(info(1, "10.0.0.1"));
        let _rx2 = registry.register(info(2, "10.0.0.2"));

        let ended = registry.end_sessions_from("10.0.0.1".parse().unwrap()).await;
        assert_eq!(ended, 1);
        assert!(rx1.recv().await.is_some());
    }
}
