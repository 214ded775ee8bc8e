//! Passive-mode port allocation.
//!
//! FTP suffers from connection stealing attacks; short of TLS session
//! resumption the best mitigation for plaintext sessions is randomizing the
//! passive port and refusing to hand a port with live or lingering leases to
//! a different peer. The randomizer walks the configured range starting from
//! a random port and relaxes its requirements in three passes: a completely
//! free port first, then a port whose leases belong to other peers, and as a
//! last resort a port the same peer is already using (which risks the peer's
//! SYN landing in TIME_WAIT).

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SLOTS: usize = 65536;
const TIME_WAIT: Duration = Duration::from_secs(4 * 60);

#[derive(Debug, Clone)]
struct Entry {
    peer: IpAddr,
    leases: u32,
    expiry: Option<Instant>,
}

struct Slot {
    entries: Mutex<Vec<Entry>>,
    /// Latched while some session is still in the listening stage on this
    /// port; cleared on release-or-connect.
    connecting: AtomicBool,
}

/// Shared port table. One instance per server context; tests may make their
/// own.
pub struct PortManager {
    slots: Vec<Slot>,
}

impl PortManager {
    pub fn new() -> Arc<PortManager> {
        let mut slots = Vec::with_capacity(SLOTS);
        for _ in 0..SLOTS {
            slots.push(Slot {
                entries: Mutex::new(Vec::new()),
                connecting: AtomicBool::new(false),
            });
        }
        Arc::new(PortManager { slots })
    }

    fn release(&self, port: u16, peer: IpAddr, connected: bool) {
        let slot = &self.slots[port as usize];
        {
            let mut entries = slot.entries.lock().unwrap();
            if let Some(entry) = entries.iter_mut().find(|e| e.peer == peer) {
                if entry.leases > 0 {
                    entry.leases -= 1;
                    entry.expiry = Some(Instant::now() + TIME_WAIT);
                }
            }
        }
        if !connected {
            slot.connecting.store(false, Ordering::SeqCst);
        }
    }

    fn set_connected(&self, port: u16) {
        self.slots[port as usize].connecting.store(false, Ordering::SeqCst);
    }

    fn prune(entries: &mut Vec<Entry>, now: Instant) {
        entries.retain(|e| e.leases > 0 || e.expiry.map(|x| x >= now).unwrap_or(true));
    }
}

impl std::fmt::Debug for PortManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortManager").finish_non_exhaustive()
    }
}

/// Reserves one passive port until dropped. Dropping an unconnected lease
/// frees the port immediately; a connected one lingers for the TIME_WAIT
/// period.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    peer: IpAddr,
    manager: Arc<PortManager>,
    connected: bool,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Marks the data connection as established, releasing the listening
    /// latch so the port can be leased again once this lease ends.
    pub fn set_connected(&mut self) {
        if !self.connected {
            self.connected = true;
            self.manager.set_connected(self.port);
        }
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.manager.release(self.port, self.peer, self.connected);
    }
}

/// Picks passive ports for one peer out of the configured range.
pub struct PortRandomizer {
    manager: Arc<PortManager>,
    peer: IpAddr,
    min: u16,
    max: u16,
}

impl PortRandomizer {
    pub fn new(manager: Arc<PortManager>, peer: IpAddr, min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let min = min.max(1);
        PortRandomizer { manager, peer, min, max }
    }

    /// Find a port per the three-pass policy. `None` when every port in the
    /// range is latched by concurrently-connecting sessions.
    pub fn get_port(&self) -> Option<PortLease> {
        use rand::Rng;

        let first_port: u16 = rand::rngs::OsRng.gen_range(self.min..=self.max);
        let now = Instant::now();

        let mut allow_reuse_other = false;
        let mut allow_reuse_same = false;
        let mut port = first_port;
        let mut started = false;

        loop {
            if started {
                port = if port >= self.max { self.min } else { port + 1 };
                if port == first_port {
                    // Wraparound, relax requirements.
                    if !allow_reuse_other {
                        allow_reuse_other = true;
                    } else if !allow_reuse_same {
                        allow_reuse_same = true;
                    } else {
                        return None;
                    }
                }
            }
            started = true;

            let slot = &self.manager.slots[port as usize];
            if slot.connecting.swap(true, Ordering::SeqCst) {
                continue;
            }

            let mut entries = slot.entries.lock().unwrap();
            if !allow_reuse_other && !allow_reuse_same {
                PortManager::prune(&mut entries, now);
            }

            if let Some(entry) = entries.iter_mut().find(|e| e.peer == self.peer) {
                if allow_reuse_same {
                    entry.leases += 1;
                    return Some(self.lease(port));
                }
            } else if entries.is_empty() || allow_reuse_other {
                entries.push(Entry {
                    peer: self.peer,
                    leases: 1,
                    expiry: None,
                });
                return Some(self.lease(port));
            }

            slot.connecting.store(false, Ordering::SeqCst);
        }
    }

    fn lease(&self, port: u16) -> PortLease {
        PortLease {
            port,
            peer: self.peer,
            manager: self.manager.clone(),
            connected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn distinct_ports_for_concurrent_peers() {
        let mgr = PortManager::new();
        let r1 = PortRandomizer::new(mgr.clone(), ip("1.2.3.4"), 50000, 50010);
        let r2 = PortRandomizer::new(mgr.clone(), ip("5.6.7.8"), 50000, 50010);

        let l1 = r1.get_port().unwrap();
        let l2 = r2.get_port().unwrap();
        assert_ne!(l1.port(), l2.port());
    }

    #[test]
    fn released_connected_port_lingers_for_other_peers() {
        let mgr = PortManager::new();
        let r1 = PortRandomizer::new(mgr.clone(), ip("1.2.3.4"), 50000, 50000);
        let r2 = PortRandomizer::new(mgr.clone(), ip("5.6.7.8"), 50000, 50000);

        let mut l1 = r1.get_port().unwrap();
        l1.set_connected();
        drop(l1); // leaves a TIME_WAIT entry on the only port in range

        // The first pass refuses a port with a lingering foreign entry; with
        // a single-port range the second pass then hands it out.
        let l2 = r2.get_port().unwrap();
        assert_eq!(l2.port(), 50000);
    }

    #[test]
    fn unconnected_release_frees_the_port_immediately() {
        let mgr = PortManager::new();
        let r1 = PortRandomizer::new(mgr.clone(), ip("1.2.3.4"), 50005, 50005);

        let l1 = r1.get_port().unwrap();
        drop(l1);

        // The connecting latch is back down, so the same port can be leased
        // right away.
        let l2 = r1.get_port().unwrap();
        assert_eq!(l2.port(), 50005);
    }

    #[test]
    fn same_peer_reuse_is_the_last_resort() {
        let mgr = PortManager::new();
        let peer = ip("9.9.9.9");
        let r = PortRandomizer::new(mgr.clone(), peer, 50020, 50021);

        let mut a = r.get_port().unwrap();
        a.set_connected();
        let mut b = r.get_port().unwrap();
        b.set_connected();
        assert_ne!(a.port(), b.port());

        // Both ports have live leases from this peer; only the third pass
        // (reuse-same) can satisfy another request.
        let c = r.get_port().unwrap();
        assert!(c.port() == a.port() || c.port() == b.port());
    }
}
