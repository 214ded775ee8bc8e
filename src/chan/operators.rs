//! The adder/consumer operator traits and the socket-backed implementations.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Identifies which endpoint of a channel raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Socket,
    BufferConsumer,
    BufferAdder,
}

/// Errno-style channel error: an integer code plus the side it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChanError {
    pub code: i32,
    pub source: ErrorSource,
}

impl ChanError {
    pub fn new(code: i32, source: ErrorSource) -> Self {
        ChanError { code, source }
    }

    pub fn ok(source: ErrorSource) -> Self {
        ChanError { code: 0, source }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

pub(crate) fn errno_of(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(match err.kind() {
        ErrorKind::BrokenPipe => libc_epipe(),
        ErrorKind::ConnectionReset => 104, // ECONNRESET
        ErrorKind::TimedOut => 110,       // ETIMEDOUT
        _ => 5,                           // EIO
    })
}

pub(crate) fn libc_epipe() -> i32 {
    32
}

/// What an adder did when asked to produce bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum AdderOutcome {
    /// Appended this many bytes to the buffer.
    Added(usize),
    /// The producer is exhausted; nothing further will ever be added.
    Eof,
}

/// What a consumer did when asked to drain bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// Removed this many bytes from the front of the buffer.
    Consumed(usize),
}

/// Produces bytes into a pipe's buffer.
///
/// Implementations may await internally; transient would-block conditions are
/// absorbed by the await rather than surfaced as an outcome.
#[async_trait]
pub trait BufferAdder: Send {
    /// Append at most `budget` bytes to `buf`.
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32>;
}

/// Drains bytes from a pipe's buffer.
#[async_trait]
pub trait BufferConsumer: Send {
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32>;
}

const READ_CHUNK: usize = 16 * 1024;

/// Adder that reads from the receiving half of a socket (or any byte source).
pub struct SocketAdder<R> {
    reader: R,
}

impl<R> SocketAdder<R> {
    pub fn new(reader: R) -> Self {
        SocketAdder { reader }
    }
}

#[async_trait]
impl<R> BufferAdder for SocketAdder<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        let want = budget.min(READ_CHUNK);
        if want == 0 {
            return Ok(AdderOutcome::Added(0));
        }
        let mut chunk = vec![0u8; want];
        match self.reader.read(&mut chunk).await {
            Ok(0) => Ok(AdderOutcome::Eof),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(AdderOutcome::Added(n))
            }
            Err(e) => Err(errno_of(&e)),
        }
    }
}

/// Consumer that writes into the sending half of a socket (or any byte sink).
pub struct SocketConsumer<W> {
    writer: W,
}

impl<W> SocketConsumer<W> {
    pub fn new(writer: W) -> Self {
        SocketConsumer { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> BufferConsumer for SocketConsumer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32> {
        if buf.is_empty() {
            return Ok(ConsumerOutcome::Consumed(0));
        }
        match self.writer.write(&buf[..]).await {
            Ok(0) => Err(libc_epipe()),
            Ok(n) => {
                buf.advance(n);
                Ok(ConsumerOutcome::Consumed(n))
            }
            Err(e) => Err(errno_of(&e)),
        }
    }
}

/// Adder that streams from an opened storage entry (RETR and friends).
pub struct ReaderAdder {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl ReaderAdder {
    pub fn new(reader: Box<dyn AsyncRead + Send + Sync + Unpin>) -> Self {
        ReaderAdder { reader }
    }
}

#[async_trait]
impl BufferAdder for ReaderAdder {
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        let want = budget.min(READ_CHUNK);
        if want == 0 {
            return Ok(AdderOutcome::Added(0));
        }
        let mut chunk = vec![0u8; want];
        match self.reader.read(&mut chunk).await {
            Ok(0) => Ok(AdderOutcome::Eof),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(AdderOutcome::Added(n))
            }
            Err(e) => Err(errno_of(&e)),
        }
    }
}

/// Consumer that writes into an opened storage entry (STOR and friends).
pub struct WriterConsumer {
    writer: Box<dyn AsyncWrite + Send + Sync + Unpin>,
}

impl WriterConsumer {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Sync + Unpin>) -> Self {
        WriterConsumer { writer }
    }

    pub async fn flush(&mut self) -> Result<(), i32> {
        self.writer.flush().await.map_err(|e| errno_of(&e))
    }
}

#[async_trait]
impl BufferConsumer for WriterConsumer {
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32> {
        if buf.is_empty() {
            return Ok(ConsumerOutcome::Consumed(0));
        }
        match self.writer.write(&buf[..]).await {
            Ok(0) => Err(libc_epipe()),
            Ok(n) => {
                buf.advance(n);
                Ok(ConsumerOutcome::Consumed(n))
            }
            Err(e) => Err(errno_of(&e)),
        }
    }
}

/// Adder fed from an in-memory byte vector, used for directory listings.
pub struct VecAdder {
    data: Vec<u8>,
    pos: usize,
}

impl VecAdder {
    pub fn new(data: Vec<u8>) -> Self {
        VecAdder { data, pos: 0 }
    }
}

#[async_trait]
impl BufferAdder for VecAdder {
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        if self.pos >= self.data.len() {
            return Ok(AdderOutcome::Eof);
        }
        let n = budget.min(self.data.len() - self.pos);
        if n == 0 {
            return Ok(AdderOutcome::Added(0));
        }
        buf.extend_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(AdderOutcome::Added(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn vec_adder_respects_budget_and_signals_eof() {
        let mut adder = VecAdder::new(b"hello world".to_vec());
        let mut buf = BytesMut::new();

        assert_eq!(adder.add_to_buffer(&mut buf, 5).await, Ok(AdderOutcome::Added(5)));
        assert_eq!(&buf[..], b"hello");
        assert_eq!(adder.add_to_buffer(&mut buf, 100).await, Ok(AdderOutcome::Added(6)));
        assert_eq!(&buf[..], b"hello world");
        assert_eq!(adder.add_to_buffer(&mut buf, 100).await, Ok(AdderOutcome::Eof));
    }

    #[tokio::test]
    async fn socket_consumer_drains_front_of_buffer() {
        let mut sink: Vec<u8> = Vec::new();
        let mut consumer = SocketConsumer::new(&mut sink);
        let mut buf = BytesMut::from(&b"abcdef"[..]);

        let outcome = consumer.consume_buffer(&mut buf).await.unwrap();
        let ConsumerOutcome::Consumed(n) = outcome;
        assert!(n > 0);
        assert_eq!(&sink[..n], &b"abcdef"[..n]);
    }
}
