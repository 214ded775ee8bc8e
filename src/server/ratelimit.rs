//! Token-bucket rate limiting shared between the control and data channels.
//!
//! A session owns one inbound and one outbound bucket; groups can contribute
//! extra buckets. All applicable buckets must grant the bytes, so the
//! effective rate is the tightest of the set.

use crate::chan::{AdderOutcome, BufferAdder, BufferConsumer, ConsumerOutcome};
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A single token bucket. `bytes_per_second == 0` means unlimited.
#[derive(Debug)]
pub struct Bucket {
    bytes_per_second: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    pub fn new(bytes_per_second: u64) -> Arc<Bucket> {
        Arc::new(Bucket {
            bytes_per_second,
            state: Mutex::new(BucketState {
                tokens: bytes_per_second as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn unlimited() -> Arc<Bucket> {
        Bucket::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_second == 0
    }

    /// Wait until `amount` bytes may pass this bucket.
    pub async fn acquire(&self, amount: u64) {
        if self.is_unlimited() || amount == 0 {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.last_refill = now;
                // One second worth of burst at most.
                state.tokens = (state.tokens + elapsed * self.bytes_per_second as f64).min(self.bytes_per_second as f64);

                if state.tokens >= amount as f64 {
                    state.tokens -= amount as f64;
                    None
                } else {
                    let deficit = amount as f64 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.bytes_per_second as f64))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// The buckets that govern one direction of one session.
#[derive(Clone, Default)]
pub struct Buckets {
    buckets: Vec<Arc<Bucket>>,
}

impl Buckets {
    pub fn new(buckets: Vec<Arc<Bucket>>) -> Self {
        Buckets {
            buckets: buckets.into_iter().filter(|b| !b.is_unlimited()).collect(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.buckets.is_empty()
    }

    pub async fn acquire(&self, amount: u64) {
        for bucket in &self.buckets {
            bucket.acquire(amount).await;
        }
    }
}

impl std::fmt::Debug for Buckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buckets({})", self.buckets.len())
    }
}

/// Caps how much an adder may produce per invocation so that throttling
/// granularity stays reasonable.
const THROTTLE_CHUNK: usize = 8 * 1024;

/// Wraps an adder so every produced byte is paid for out of `buckets`.
pub struct ThrottledAdder<A> {
    inner: A,
    buckets: Buckets,
}

impl<A> ThrottledAdder<A> {
    pub fn new(inner: A, buckets: Buckets) -> Self {
        ThrottledAdder { inner, buckets }
    }
}

#[async_trait]
impl<A: BufferAdder> BufferAdder for ThrottledAdder<A> {
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        let budget = if self.buckets.is_unlimited() { budget } else { budget.min(THROTTLE_CHUNK) };
        let outcome = self.inner.add_to_buffer(buf, budget).await?;
        if let AdderOutcome::Added(n) = outcome {
            self.buckets.acquire(n as u64).await;
        }
        Ok(outcome)
    }
}

/// Wraps a consumer so every drained byte is paid for out of `buckets`.
pub struct ThrottledConsumer<C> {
    inner: C,
    buckets: Buckets,
}

impl<C> ThrottledConsumer<C> {
    pub fn new(inner: C, buckets: Buckets) -> Self {
        ThrottledConsumer { inner, buckets }
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

#[async_trait]
impl<C: BufferConsumer> BufferConsumer for ThrottledConsumer<C> {
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32> {
        let outcome = self.inner.consume_buffer(buf).await?;
        let ConsumerOutcome::Consumed(n) = &outcome;
        self.buckets.acquire(*n as u64).await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_bucket_never_waits() {
        let bucket = Bucket::unlimited();
        // Would otherwise take ten minutes.
        bucket.acquire(600_000_000).await;
    }

    #[tokio::test(start_paused = true)]
    async fn limited_bucket_paces_out_large_requests() {
        let bucket = Bucket::new(1000);
        let before = Instant::now();
        bucket.acquire(1000).await; // the initial burst allowance
        bucket.acquire(500).await; // must wait ~0.5s
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed: {:?}", elapsed);
    }

    #[tokio::test]
    async fn composed_buckets_apply_tightest_limit() {
        let buckets = Buckets::new(vec![Bucket::unlimited(), Bucket::new(0)]);
        assert!(buckets.is_unlimited());

        let buckets = Buckets::new(vec![Bucket::new(10_000), Bucket::unlimited()]);
        assert!(!buckets.is_unlimited());
    }
}
