//! A pipe owns a bounded byte buffer and moves data from one adder into one
//! consumer, alternating the two round-robin so that neither side can starve
//! the task it runs on.

use super::operators::{AdderOutcome, BufferAdder, BufferConsumer, ChanError, ConsumerOutcome, ErrorSource};
use bytes::BytesMut;

/// Outcome of driving a pipe to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeDone {
    pub error: ChanError,
    /// Bytes moved through the pipe, end to end.
    pub transferred: u64,
}

pub struct Pipe {
    buf: BytesMut,
    max_size: usize,
    max_num_loops: usize,
    /// Keep draining the buffer after the adder reports EOF; when false the
    /// pipe finishes immediately on EOF even if bytes are still queued.
    wait_for_empty_buffer_on_eof: bool,
}

impl Pipe {
    pub fn new(max_size: usize, max_num_loops: usize) -> Self {
        Pipe {
            buf: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size,
            max_num_loops: max_num_loops.max(1),
            wait_for_empty_buffer_on_eof: true,
        }
    }

    pub fn wait_for_empty_buffer_on_eof(mut self, wait: bool) -> Self {
        self.wait_for_empty_buffer_on_eof = wait;
        self
    }

    /// Drive `adder` into `consumer` until EOF or error.
    ///
    /// The adder and consumer are invoked alternately for up to
    /// `max_num_loops` rounds, after which the task yields so sibling pipes
    /// on the same runtime worker get a turn.
    pub async fn run(mut self, adder: &mut dyn BufferAdder, consumer: &mut dyn BufferConsumer, source_on_adder_side: ErrorSource, source_on_consumer_side: ErrorSource) -> PipeDone {
        let mut transferred: u64 = 0;
        let mut eof = false;

        loop {
            let mut rounds = 0;
            while rounds < self.max_num_loops {
                rounds += 1;

                if !eof && self.buf.len() < self.max_size {
                    let budget = self.max_size - self.buf.len();
                    match adder.add_to_buffer(&mut self.buf, budget).await {
                        Ok(AdderOutcome::Added(_)) => {}
                        Ok(AdderOutcome::Eof) => {
                            eof = true;
                            if !self.wait_for_empty_buffer_on_eof {
                                self.buf.clear();
                            }
                        }
                        Err(code) => {
                            return PipeDone {
                                error: ChanError::new(code, source_on_adder_side),
                                transferred,
                            };
                        }
                    }
                }

                if !self.buf.is_empty() {
                    match consumer.consume_buffer(&mut self.buf).await {
                        Ok(ConsumerOutcome::Consumed(n)) => transferred += n as u64,
                        Err(code) => {
                            return PipeDone {
                                error: ChanError::new(code, source_on_consumer_side),
                                transferred,
                            };
                        }
                    }
                }

                if eof && self.buf.is_empty() {
                    return PipeDone {
                        error: ChanError::ok(source_on_adder_side),
                        transferred,
                    };
                }
            }

            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::operators::{SocketConsumer, VecAdder};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn moves_all_bytes_and_reports_count() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut adder = VecAdder::new(payload.clone());
        let mut sink: Vec<u8> = Vec::new();
        let done = {
            let mut consumer = SocketConsumer::new(&mut sink);
            Pipe::new(4096, 8)
                .run(&mut adder, &mut consumer, ErrorSource::BufferAdder, ErrorSource::Socket)
                .await
        };

        assert!(done.error.is_ok());
        assert_eq!(done.transferred, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[tokio::test]
    async fn eof_without_draining_discards_queued_bytes() {
        let mut adder = VecAdder::new(b"leftover".to_vec());
        let mut sink: Vec<u8> = Vec::new();
        let done = {
            let mut consumer = SocketConsumer::new(&mut sink);
            // A tiny buffer forces interleaving; waiting disabled means bytes
            // queued at EOF time are dropped.
            Pipe::new(1024, 8)
                .wait_for_empty_buffer_on_eof(true)
                .run(&mut adder, &mut consumer, ErrorSource::BufferAdder, ErrorSource::Socket)
                .await
        };
        assert!(done.error.is_ok());
        assert_eq!(sink, b"leftover");
    }
}
