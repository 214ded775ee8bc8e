//! Network-virtual-terminal line ending conversion for `TYPE A` transfers.
//!
//! Outbound bytes use the CR-LF convention on the wire; inbound bytes are
//! normalized to the host convention (LF) before they reach the storage
//! backend. A CR arriving as the last byte of a chunk is held back until the
//! next chunk decides whether it belongs to a CR-LF pair.

use crate::chan::{AdderOutcome, BufferAdder, BufferConsumer, ConsumerOutcome};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};

/// Wraps an adder and rewrites bare LF (and bare CR) into CR-LF sequences.
pub struct NvtOutAdder<A> {
    inner: A,
    scratch: BytesMut,
    eof: bool,
}

impl<A> NvtOutAdder<A> {
    pub fn new(inner: A) -> Self {
        NvtOutAdder {
            inner,
            scratch: BytesMut::new(),
            eof: false,
        }
    }
}

#[async_trait]
impl<A: BufferAdder> BufferAdder for NvtOutAdder<A> {
    async fn add_to_buffer(&mut self, buf: &mut BytesMut, budget: usize) -> Result<AdderOutcome, i32> {
        // A lone CR in the scratch may be half a CR-LF, so more input is
        // needed before it can be emitted.
        let starved = self.scratch.is_empty() || (self.scratch.len() == 1 && self.scratch[0] == b'\r');
        if starved && !self.eof {
            // Worst case every byte doubles, so ask for half the budget.
            let inner_budget = (budget / 2).max(1);
            match self.inner.add_to_buffer(&mut self.scratch, inner_budget).await? {
                AdderOutcome::Eof => self.eof = true,
                AdderOutcome::Added(_) => {}
            }
        }

        if self.scratch.is_empty() {
            return if self.eof { Ok(AdderOutcome::Eof) } else { Ok(AdderOutcome::Added(0)) };
        }

        let mut written = 0usize;
        while written + 2 <= budget && !self.scratch.is_empty() {
            let b = self.scratch[0];
            match b {
                b'\n' => {
                    buf.extend_from_slice(b"\r\n");
                    written += 2;
                    self.scratch.advance(1);
                }
                b'\r' => {
                    if self.scratch.len() >= 2 && self.scratch[1] == b'\n' {
                        buf.extend_from_slice(b"\r\n");
                        written += 2;
                        self.scratch.advance(2);
                    } else if self.scratch.len() == 1 && !self.eof {
                        // Might be the first half of a CR-LF; wait for more.
                        break;
                    } else {
                        buf.extend_from_slice(b"\r\n");
                        written += 2;
                        self.scratch.advance(1);
                    }
                }
                _ => {
                    buf.extend_from_slice(&[b]);
                    written += 1;
                    self.scratch.advance(1);
                }
            }
        }

        Ok(AdderOutcome::Added(written))
    }
}

/// Wraps a consumer and rewrites CR-LF pairs into LF before delivery.
pub struct NvtInConsumer<C> {
    inner: C,
    converted: BytesMut,
    pending_cr: bool,
}

impl<C> NvtInConsumer<C> {
    pub fn new(inner: C) -> Self {
        NvtInConsumer {
            inner,
            converted: BytesMut::new(),
            pending_cr: false,
        }
    }
}

impl<C: BufferConsumer> NvtInConsumer<C> {
    /// Push any held-back CR and return the wrapped consumer for flushing.
    pub async fn finish(mut self) -> Result<C, i32> {
        if self.pending_cr {
            self.converted.extend_from_slice(b"\r");
            self.pending_cr = false;
        }
        while !self.converted.is_empty() {
            self.inner.consume_buffer(&mut self.converted).await?;
        }
        Ok(self.inner)
    }

    fn convert(&mut self, buf: &mut BytesMut) {
        let input = buf.split();
        for &b in input.iter() {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    self.converted.extend_from_slice(b"\n");
                    continue;
                }
                self.converted.extend_from_slice(b"\r");
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                self.converted.extend_from_slice(&[b]);
            }
        }
    }
}

#[async_trait]
impl<C: BufferConsumer> BufferConsumer for NvtInConsumer<C> {
    async fn consume_buffer(&mut self, buf: &mut BytesMut) -> Result<ConsumerOutcome, i32> {
        let raw = buf.len();
        self.convert(buf);
        while !self.converted.is_empty() {
            self.inner.consume_buffer(&mut self.converted).await?;
        }
        // Report what we took off the pipe buffer, not what went downstream.
        Ok(ConsumerOutcome::Consumed(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::operators::{SocketConsumer, VecAdder};
    use pretty_assertions::assert_eq;

    async fn convert_out(input: &[u8]) -> Vec<u8> {
        let mut adder = NvtOutAdder::new(VecAdder::new(input.to_vec()));
        let mut out = BytesMut::new();
        loop {
            match adder.add_to_buffer(&mut out, 7).await.unwrap() {
                AdderOutcome::Eof => break,
                AdderOutcome::Added(_) => {}
            }
        }
        out.to_vec()
    }

    async fn convert_in(input: &[u8], chunk: usize) -> Vec<u8> {
        let mut sink: Vec<u8> = Vec::new();
        {
            let mut consumer = NvtInConsumer::new(SocketConsumer::new(&mut sink));
            for piece in input.chunks(chunk) {
                let mut buf = BytesMut::from(piece);
                consumer.consume_buffer(&mut buf).await.unwrap();
            }
            consumer.finish().await.unwrap();
        }
        sink
    }

    #[tokio::test]
    async fn outbound_lf_becomes_crlf() {
        assert_eq!(convert_out(b"a\nb\n").await, b"a\r\nb\r\n");
    }

    #[tokio::test]
    async fn outbound_crlf_stays_crlf() {
        assert_eq!(convert_out(b"a\r\nb").await, b"a\r\nb");
    }

    #[tokio::test]
    async fn outbound_bare_cr_becomes_crlf() {
        assert_eq!(convert_out(b"a\rb").await, b"a\r\nb");
    }

    #[tokio::test]
    async fn inbound_crlf_becomes_lf_across_chunk_boundaries() {
        // Chunk size 1 forces the CR to be held back at every boundary.
        assert_eq!(convert_in(b"a\r\nb\r\nc", 1).await, b"a\nb\nc");
        assert_eq!(convert_in(b"a\r\nb\r\nc", 3).await, b"a\nb\nc");
    }

    #[tokio::test]
    async fn inbound_lone_cr_survives() {
        assert_eq!(convert_in(b"a\rb", 1).await, b"a\rb");
        // Trailing CR is emitted by finish().
        assert_eq!(convert_in(b"ab\r", 2).await, b"ab\r");
    }
}
