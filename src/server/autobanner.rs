//! Temporary bans for addresses that keep failing to log in.
//!
//! Failed-login timestamps older than the configured window are pruned on
//! insertion; when the count reaches the threshold the address is banned for
//! the configured duration and subscribers are told, so listeners can drop
//! new connections from it without so much as a banner.

use slog::Logger;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Address family reported along with ban events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl From<IpAddr> for AddressFamily {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedEvent {
    pub ip: IpAddr,
    pub family: AddressFamily,
}

/// Tuning knobs. `max_failures == 0` disables the mechanism entirely.
#[derive(Debug, Clone)]
pub struct AutobannerOptions {
    pub max_failures: u32,
    pub failures_window: Duration,
    pub ban_duration: Duration,
}

impl Default for AutobannerOptions {
    fn default() -> Self {
        AutobannerOptions {
            max_failures: 0,
            failures_window: Duration::from_millis(100),
            ban_duration: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct Handle {
    failed_timepoints: VecDeque<Instant>,
    banned_until: Option<Instant>,
}

#[derive(Debug)]
pub struct Autobanner {
    opts: Mutex<AutobannerOptions>,
    map: Mutex<HashMap<IpAddr, Handle>>,
    banned_tx: broadcast::Sender<BannedEvent>,
    logger: Logger,
}

impl Autobanner {
    pub fn new(opts: AutobannerOptions, logger: Logger) -> Arc<Autobanner> {
        let (banned_tx, _) = broadcast::channel(64);
        Arc::new(Autobanner {
            opts: Mutex::new(opts),
            map: Mutex::new(HashMap::new()),
            banned_tx,
            logger,
        })
    }

    pub fn set_options(&self, opts: AutobannerOptions) {
        *self.opts.lock().unwrap() = opts;
    }

    /// Subscribe to ban notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BannedEvent> {
        self.banned_tx.subscribe()
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        let mut map = self.map.lock().unwrap();
        match map.get_mut(&ip) {
            Some(handle) => match handle.banned_until {
                Some(until) if Instant::now() < until => true,
                Some(_) => {
                    handle.banned_until = None;
                    false
                }
                None => false,
            },
            None => false,
        }
    }

    /// Place a ban immediately, as the administration plane does, regardless
    /// of the failure count.
    pub fn ban(&self, ip: IpAddr) {
        let ban_duration = self.opts.lock().unwrap().ban_duration;
        {
            let mut map = self.map.lock().unwrap();
            let handle = map.entry(ip).or_default();
            handle.failed_timepoints.clear();
            handle.banned_until = Some(Instant::now() + ban_duration);
        }
        slog::info!(self.logger, "Address banned by administrator"; "ip" => %ip);
        let _ = self.banned_tx.send(BannedEvent {
            ip,
            family: AddressFamily::from(ip),
        });
    }

    /// Record a failed login. Returns true when this failure pushed the
    /// address over the threshold and a ban was placed.
    pub fn set_failed_login(&self, ip: IpAddr) -> bool {
        let opts = self.opts.lock().unwrap().clone();
        if opts.max_failures == 0 {
            return false;
        }

        let now = Instant::now();
        let banned = {
            let mut map = self.map.lock().unwrap();
            let handle = map.entry(ip).or_default();
            while let Some(front) = handle.failed_timepoints.front() {
                if now.duration_since(*front) > opts.failures_window {
                    handle.failed_timepoints.pop_front();
                } else {
                    break;
                }
            }
            handle.failed_timepoints.push_back(now);
            if handle.failed_timepoints.len() >= opts.max_failures as usize {
                handle.failed_timepoints.clear();
                handle.banned_until = Some(now + opts.ban_duration);
                true
            } else {
                false
            }
        };

        if banned {
            let family = AddressFamily::from(ip);
            slog::info!(self.logger, "Address banned after repeated login failures"; "ip" => %ip, "secs" => opts.ban_duration.as_secs());
            let _ = self.banned_tx.send(BannedEvent { ip, family });
        }
        banned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slog::o;

    fn banner(max_failures: u32, window_ms: u64, ban_ms: u64) -> Arc<Autobanner> {
        Autobanner::new(
            AutobannerOptions {
                max_failures,
                failures_window: Duration::from_millis(window_ms),
                ban_duration: Duration::from_millis(ban_ms),
            },
            Logger::root(slog::Discard, o!()),
        )
    }

    #[test]
    fn bans_once_threshold_is_reached() {
        let banner = banner(3, 10_000, 60_000);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let mut rx = banner.subscribe();

        assert!(!banner.set_failed_login(ip));
        assert!(!banner.set_failed_login(ip));
        assert!(!banner.is_banned(ip));
        assert!(banner.set_failed_login(ip));
        assert!(banner.is_banned(ip));

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            BannedEvent {
                ip,
                family: AddressFamily::V4
            }
        );
    }

    #[test]
    fn ban_expires_after_the_configured_duration() {
        let banner = banner(1, 10_000, 20);
        let ip: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(banner.set_failed_login(ip));
        assert!(banner.is_banned(ip));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!banner.is_banned(ip));
    }

    #[test]
    fn window_prunes_old_failures() {
        let banner = banner(3, 20, 60_000);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();

        assert!(!banner.set_failed_login(ip));
        assert!(!banner.set_failed_login(ip));
        std::thread::sleep(Duration::from_millis(40));
        // The two earlier failures fell out of the window.
        assert!(!banner.set_failed_login(ip));
        assert!(!banner.is_banned(ip));
    }

    #[test]
    fn zero_max_failures_disables_banning() {
        let banner = banner(0, 10, 10);
        let ip: IpAddr = "10.0.0.4".parse().unwrap();
        for _ in 0..100 {
            assert!(!banner.set_failed_login(ip));
        }
        assert!(!banner.is_banned(ip));
    }
}
