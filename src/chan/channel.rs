//! A channel binds pipes to a socket. The inbound pipe runs socket → buffer →
//! consumer, the outbound pipe adder → buffer → socket. An FTP data transfer
//! uses one direction at a time; the opposite direction only ever carries the
//! EOF that ends the connection.
//!
//! On a clean outbound finish the channel shuts the write half down, which on
//! a TLS stream emits close-notify before the FIN. The done outcome is
//! produced exactly once per transfer.

use super::operators::{AdderOutcome, BufferAdder, BufferConsumer, ChanError, ConsumerOutcome, ErrorSource, SocketAdder, SocketConsumer};
use super::pipe::Pipe;
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Receives byte-count callbacks as data moves across the socket. Used to
/// feed transfer telemetry and to refresh the session activity clock.
pub trait ProgressNotifier: Send + Sync {
    fn socket_read(&self, at: Instant, amount: u64);
    fn socket_written(&self, at: Instant, amount: u64);
}

/// The terminal outcome of a channel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDone {
    pub error: ChanError,
    pub transferred: u64,
}

impl ChannelDone {
    pub fn is_ok(&self) -> bool {
        self.error.is_ok()
    }
}

pub struct Channel {
    max_buffer_size: usize,
    max_num_loops: usize,
    progress: Option<Arc<dyn ProgressNotifier>>,
}

impl Channel {
    pub fn new(max_buffer_size: usize, max_num_loops: usize) -> Self {
        Channel {
            max_buffer_size,
            max_num_loops,
            progress: None,
        }
    }

    pub fn with_progress(mut self, notifier: Arc<dyn ProgressNotifier>) -> Self {
        self.progress = Some(notifier);
        self
    }

    /// Stream `adder` out through `stream`, then shut the stream down so the
    /// peer sees close-notify (under TLS) followed by EOF.
    pub async fn send<S>(&self, stream: S, adder: &mut dyn BufferAdder) -> ChannelDone
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (_read_half, write_half) = tokio::io::split(stream);
        let mut consumer = MonitoredConsumer {
            inner: SocketConsumer::new(write_half),
            progress: self.progress.clone(),
        };

        let done = Pipe::new(self.max_buffer_size, self.max_num_loops)
            .run(adder, &mut consumer, ErrorSource::BufferAdder, ErrorSource::Socket)
            .await;

        let mut write_half = consumer.inner.into_inner();
        let error = if done.error.is_ok() {
            match write_half.shutdown().await {
                Ok(()) => ChanError::ok(ErrorSource::Socket),
                Err(e) => ChanError::new(super::operators::errno_of(&e), ErrorSource::Socket),
            }
        } else {
            done.error
        };

        ChannelDone {
            error,
            transferred: done.transferred,
        }
    }

    /// Stream bytes arriving on `stream` into `consumer` until the peer
    /// closes. The caller owns finalizing/flushing the consumer.
    pub async fn receive<S>(&self, stream: S, consumer: &mut dyn BufferConsumer) -> ChannelDone
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (read_half, _write_half) = tokio::io::split(stream);
        let mut adder = MonitoredAdder {
            inner: SocketAdder::new(read_half),
            progress: self.progress.clone(),
        };

        let done = Pipe::new(self.max_buffer_size, self.max_num_loops)
            .run(&mut adder, consumer, ErrorSource::Socket, ErrorSource::BufferConsumer)
            .await;

        ChannelDone {
            error: done.error,
            transferred: done.transferred,
        }
    }
}

struct MonitoredAdder<R> {
    inner: SocketAdder<R>,
    progress: Option<Arc<dyn ProgressNotifier>>,
}

#[async_trait]
impl<R> BufferAdder for MonitoredAdder<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        let outcome = self.inner.add_to_buffer(buf, budget).await?;
        if let (AdderOutcome::Added(n), Some(progress)) = (&outcome, &self.progress) {
            if *n > 0 {
                progress.socket_read(Instant::now(), *n as u64);
            }
        }
        Ok(outcome)
    }
}

struct MonitoredConsumer<W> {
    inner: SocketConsumer<W>,
    progress: Option<Arc<dyn ProgressNotifier>>,
}

#[async_trait]
impl<W> BufferConsumer for MonitoredConsumer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32> {
        let outcome = self.inner.consume_buffer(buf).await?;
        let ConsumerOutcome::Consumed(n) = &outcome;
        if *n > 0 {
            if let Some(progress) = &self.progress {
                progress.socket_written(Instant::now(), *n as u64);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::operators::VecAdder;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        read: AtomicU64,
        written: AtomicU64,
    }

    impl ProgressNotifier for CountingNotifier {
        fn socket_read(&self, _at: Instant, amount: u64) {
            self.read.fetch_add(amount, Ordering::Relaxed);
        }
        fn socket_written(&self, _at: Instant, amount: u64) {
            self.written.fetch_add(amount, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn send_streams_everything_and_shuts_down_once() {
        let (client, server) = tokio::io::duplex(1024);
        let notifier = Arc::new(CountingNotifier::default());
        let chan = Channel::new(8 * 1024, 4).with_progress(notifier.clone());

        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 241) as u8).collect();
        let expected = payload.clone();
        let sender = tokio::spawn(async move {
            let mut adder = VecAdder::new(payload);
            chan.send(server, &mut adder).await
        });

        let mut received = Vec::new();
        {
            use tokio::io::AsyncReadExt;
            let mut client = client;
            client.read_to_end(&mut received).await.unwrap();
        }

        let done = sender.await.unwrap();
        assert!(done.is_ok(), "done: {:?}", done);
        assert_eq!(done.transferred, expected.len() as u64);
        assert_eq!(received, expected);
        assert_eq!(notifier.written.load(Ordering::Relaxed), expected.len() as u64);
    }
}
