//! Internal streaming primitives: byte-buffer *pipes* that couple a producer
//! (adder) to a drainer (consumer), and the *channel* that binds two pipes to
//! the two halves of a socket.
//!
//! The data channel of an FTP session is a channel whose outbound pipe is fed
//! by a file reader or directory lister and whose inbound pipe drains into a
//! file writer. Rate limiting and transfer progress monitoring hook in as
//! operator wrappers.

pub(crate) mod channel;
pub(crate) mod operators;
pub(crate) mod pipe;

pub(crate) use channel::{Channel, ChannelDone};
pub(crate) use operators::{AdderOutcome, BufferAdder, BufferConsumer, ChanError, ConsumerOutcome, ErrorSource};
pub(crate) use pipe::Pipe;
