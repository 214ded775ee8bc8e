//! An authenticator wrapper that slows down repeated failures.
//!
//! Per (address, user) it keeps a window of failure timestamps. Once the
//! count exceeds `max_failures`, each further attempt must wait
//! `min(cap, delay * 2^(failures - max_failures))` from the previous failure
//! before the wrapped authenticator is even consulted.

use super::{AuthenticatedUser, AuthenticationError, Authenticator, Credentials, MethodsList};
use async_trait::async_trait;
use slog::Logger;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ThrottledOptions {
    pub max_failures: usize,
    pub failures_window: Duration,
    pub delay: Duration,
    pub cap: Duration,
}

impl Default for ThrottledOptions {
    fn default() -> Self {
        ThrottledOptions {
            max_failures: 5,
            failures_window: Duration::from_secs(60),
            delay: Duration::from_secs(5),
            cap: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Failures {
    timepoints: VecDeque<Instant>,
    next_try: Option<Instant>,
}

impl Failures {
    fn purge_old(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.timepoints.front() {
            if now.duration_since(*front) > window {
                self.timepoints.pop_front();
            } else {
                break;
            }
        }
    }

    fn record_failure(&mut self, now: Instant, opts: &ThrottledOptions) {
        self.purge_old(now, opts.failures_window);
        self.timepoints.push_back(now);
        let failures = self.timepoints.len();
        if failures > opts.max_failures {
            let exponent = (failures - opts.max_failures).min(32) as u32;
            let backoff = opts.delay.checked_mul(1u32 << exponent.min(31)).unwrap_or(opts.cap).min(opts.cap);
            self.next_try = Some(now + backoff);
        }
    }
}

#[derive(Debug)]
pub struct ThrottledAuthenticator {
    wrapped: Arc<dyn Authenticator>,
    opts: ThrottledOptions,
    failures: Mutex<HashMap<(IpAddr, String), Failures>>,
    logger: Logger,
}

impl ThrottledAuthenticator {
    pub fn new(wrapped: Arc<dyn Authenticator>, opts: ThrottledOptions, logger: Logger) -> Arc<ThrottledAuthenticator> {
        Arc::new(ThrottledAuthenticator {
            wrapped,
            opts,
            failures: Mutex::new(HashMap::new()),
            logger,
        })
    }

    fn deadline_for(&self, ip: IpAddr, user: &str) -> Option<Instant> {
        let mut map = self.failures.lock().unwrap();
        let entry = map.get_mut(&(ip, user.to_string()))?;
        entry.purge_old(Instant::now(), self.opts.failures_window);
        entry.next_try
    }

    fn record_failure(&self, ip: IpAddr, user: &str) {
        let mut map = self.failures.lock().unwrap();
        let entry = map.entry((ip, user.to_string())).or_default();
        entry.record_failure(Instant::now(), &self.opts);
    }

    fn record_success(&self, ip: IpAddr, user: &str) {
        let mut map = self.failures.lock().unwrap();
        map.remove(&(ip, user.to_string()));
    }
}

#[async_trait]
impl Authenticator for ThrottledAuthenticator {
    async fn authenticate(&self, username: &str, creds: &Credentials) -> Result<AuthenticatedUser, AuthenticationError> {
        if let Some(deadline) = self.deadline_for(creds.source_ip, username) {
            let now = Instant::now();
            if deadline > now {
                slog::debug!(self.logger, "Delaying authentication attempt";
                    "user" => username, "ip" => %creds.source_ip, "ms" => (deadline - now).as_millis() as u64);
                tokio::time::sleep_until(deadline).await;
            }
        }

        match self.wrapped.authenticate(username, creds).await {
            Ok(user) => {
                self.record_success(creds.source_ip, username);
                Ok(user)
            }
            Err(err) => {
                self.record_failure(creds.source_ip, username);
                Err(err)
            }
        }
    }

    async fn required_methods(&self, username: &str) -> MethodsList {
        self.wrapped.required_methods(username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct AlwaysFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for AlwaysFails {
        async fn authenticate(&self, _username: &str, _creds: &Credentials) -> Result<AuthenticatedUser, AuthenticationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthenticationError::bad_credentials())
        }
    }

    fn creds() -> Credentials {
        Credentials {
            password: Some("x".into()),
            source_ip: IpAddr::from([192, 0, 2, 7]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_kicks_in_after_max_failures() {
        let inner = Arc::new(AlwaysFails { calls: AtomicUsize::new(0) });
        let auth = ThrottledAuthenticator::new(
            inner.clone(),
            ThrottledOptions {
                max_failures: 2,
                failures_window: Duration::from_secs(600),
                delay: Duration::from_secs(5),
                cap: Duration::from_secs(60),
            },
            Logger::root(slog::Discard, o!()),
        );

        // The first three failures pass straight through; only the third
        // pushes the count over max_failures and arms a deadline.
        let before = Instant::now();
        auth.authenticate("eve", &creds()).await.unwrap_err();
        auth.authenticate("eve", &creds()).await.unwrap_err();
        auth.authenticate("eve", &creds()).await.unwrap_err();
        assert!(before.elapsed() < Duration::from_secs(1));

        // The fourth call must wait delay * 2^1 = 10s from the third failure.
        let before = Instant::now();
        auth.authenticate("eve", &creds()).await.unwrap_err();
        assert!(before.elapsed() >= Duration::from_secs(9), "elapsed: {:?}", before.elapsed());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let inner = Arc::new(AlwaysFails { calls: AtomicUsize::new(0) });
        let auth = ThrottledAuthenticator::new(
            inner,
            ThrottledOptions {
                max_failures: 1,
                failures_window: Duration::from_secs(3600),
                delay: Duration::from_secs(5),
                cap: Duration::from_secs(20),
            },
            Logger::root(slog::Discard, o!()),
        );

        for _ in 0..6 {
            auth.authenticate("eve", &creds()).await.unwrap_err();
        }
        // With six failures the raw backoff would be 5 * 2^5 = 160s, but the
        // cap keeps any single wait at 20s.
        let before = Instant::now();
        auth.authenticate("eve", &creds()).await.unwrap_err();
        let waited = before.elapsed();
        assert!(waited >= Duration::from_secs(19) && waited <= Duration::from_secs(25), "waited: {:?}", waited);
    }
}
