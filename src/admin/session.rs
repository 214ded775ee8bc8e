//! One administration session: the per-session send/dispatch masks, the
//! flow-controlled outgoing queue and the dispatch loop.

use super::codec::{AdminCodec, DecodedFrame};
use super::proto::{AnyException, ExceptionKind, Msg, POST_LOGIN_FRAME_CAP, PRE_LOGIN_FRAME_CAP, Response};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use slog::Logger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Outgoing frames queued beyond this put the session into overflow.
const OVERFLOW_WATERMARK: usize = 512;

/// A fixed bitset over the message catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMask {
    bits: [u64; 2],
}

const _: () = assert!((Msg::COUNT as usize) <= 128, "mask is two words wide");

impl MessageMask {
    pub fn none() -> MessageMask {
        MessageMask { bits: [0; 2] }
    }

    pub fn all() -> MessageMask {
        let mut mask = MessageMask::none();
        for index in 0..Msg::COUNT {
            mask.set(index, true);
        }
        mask
    }

    pub fn set(&mut self, index: u16, allowed: bool) {
        let (word, bit) = (index as usize / 64, index as usize % 64);
        if allowed {
            self.bits[word] |= 1 << bit;
        } else {
            self.bits[word] &= !(1 << bit);
        }
    }

    pub fn allows(&self, index: u16) -> bool {
        if index >= Msg::COUNT {
            return false;
        }
        let (word, bit) = (index as usize / 64, index as usize % 64);
        self.bits[word] & (1 << bit) != 0
    }
}

enum OutCmd {
    Send(Msg),
    Close,
}

struct Shared {
    sending_mask: Mutex<MessageMask>,
    dispatching_mask: Mutex<MessageMask>,
    overflow: AtomicBool,
    queued: AtomicUsize,
    cap: Arc<AtomicU32>,
    authenticated: AtomicBool,
    out_tx: mpsc::UnboundedSender<OutCmd>,
}

/// The cloneable face of a session, handed to the request handler so it can
/// answer, broadcast or hang up.
#[derive(Clone)]
pub struct AdminSessionHandle {
    shared: Arc<Shared>,
    pub id: u64,
    pub peer: std::net::SocketAddr,
}

impl AdminSessionHandle {
    /// Queue a message for sending. A no-op when the message type's sending
    /// bit is clear; silently drops low-priority broadcasts while the session
    /// is in overflow.
    pub fn send(&self, msg: Msg) {
        let index = msg.index();
        if !self.shared.sending_mask.lock().unwrap().allows(index) {
            return;
        }
        if self.shared.overflow.load(Ordering::SeqCst) && Msg::is_low_priority(index) {
            return;
        }

        let queued = self.shared.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.out_tx.send(OutCmd::Send(msg)).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        if queued > OVERFLOW_WATERMARK && !self.shared.overflow.swap(true, Ordering::SeqCst) {
            // One ack request; the client answers once it drained its side.
            self.shared.queued.fetch_add(1, Ordering::SeqCst);
            let _ = self.shared.out_tx.send(OutCmd::Send(Msg::AcknowledgeQueueFull));
        }
    }

    pub fn close(&self) {
        let _ = self.shared.out_tx.send(OutCmd::Close);
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    pub fn in_overflow(&self) -> bool {
        self.shared.overflow.load(Ordering::SeqCst)
    }

    /// Unlock the full catalog after a successful login: everything except
    /// the login pair may now be sent and dispatched, and frames may grow to
    /// the post-login cap.
    pub fn unlock_after_login(&self) {
        let mut mask = MessageMask::all();
        mask.set(1, false); // admin_login
        mask.set(2, false); // admin_login response
        *self.shared.sending_mask.lock().unwrap() = mask;
        *self.shared.dispatching_mask.lock().unwrap() = mask;
        self.shared.authenticated.store(true, Ordering::SeqCst);
        self.shared.cap.store(POST_LOGIN_FRAME_CAP, Ordering::SeqCst);
    }
}

/// What the server-side application does with dispatched messages.
#[async_trait]
pub trait AdminRequestHandler: Send + Sync {
    /// A session was accepted (not yet authenticated).
    async fn on_accepted(&self, session: &AdminSessionHandle);

    /// Handle one message; the returned message, if any, is sent back.
    async fn handle(&self, msg: Msg, session: &AdminSessionHandle) -> Option<Msg>;

    /// The client acknowledged a queue-full condition and the session left
    /// overflow; time to replay fresh snapshots.
    async fn on_overflow_cleared(&self, session: &AdminSessionHandle);

    /// The session ended.
    async fn on_closed(&self, session: &AdminSessionHandle);
}

/// Run one admin session over `stream` until either side hangs up.
pub async fn run_session<S>(stream: S, id: u64, peer: std::net::SocketAddr, handler: Arc<dyn AdminRequestHandler>, logger: Logger) -> AdminSessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let cap = Arc::new(AtomicU32::new(PRE_LOGIN_FRAME_CAP));
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    // Before login only the login exchange and exceptions pass.
    let mut sending = MessageMask::none();
    sending.set(0, true);
    sending.set(2, true);
    let mut dispatching = MessageMask::none();
    dispatching.set(0, true);
    dispatching.set(1, true);

    let shared = Arc::new(Shared {
        sending_mask: Mutex::new(sending),
        dispatching_mask: Mutex::new(dispatching),
        overflow: AtomicBool::new(false),
        queued: AtomicUsize::new(0),
        cap: cap.clone(),
        authenticated: AtomicBool::new(false),
        out_tx,
    });
    let handle = AdminSessionHandle { shared, id, peer };

    let mut framed = Framed::new(stream, AdminCodec::new(cap));
    let session = handle.clone();
    let task_logger = logger;

    tokio::spawn(async move {
        handler.on_accepted(&session).await;
        loop {
            tokio::select! {
                out = out_rx.recv() => {
                    match out {
                        Some(OutCmd::Send(msg)) => {
                            session.shared.queued.fetch_sub(1, Ordering::SeqCst);
                            if let Err(err) = framed.send(msg).await {
                                slog::debug!(task_logger, "Send failed: {}", err);
                                break;
                            }
                        }
                        Some(OutCmd::Close) => {
                            // Drain what is already queued before hanging up,
                            // so a failure response reaches the peer.
                            while let Ok(OutCmd::Send(msg)) = out_rx.try_recv() {
                                session.shared.queued.fetch_sub(1, Ordering::SeqCst);
                                if framed.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            break;
                        }
                        None => break,
                    }
                }
                frame = framed.next() => {
                    match frame {
                        None => break,
                        Some(Err(err)) => {
                            slog::warn!(task_logger, "Admin connection error: {}", err);
                            break;
                        }
                        Some(Ok(frame)) => {
                            if !dispatch_frame(frame, &session, &handler, &task_logger).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
        handler.on_closed(&session).await;
        slog::info!(task_logger, "Admin session closed"; "peer" => %session.peer);
    });

    handle
}

/// Returns false when the connection must be torn down.
async fn dispatch_frame(frame: DecodedFrame, session: &AdminSessionHandle, handler: &Arc<dyn AdminRequestHandler>, logger: &Logger) -> bool {
    let msg = match frame.result {
        Err(err) => {
            if frame.index == 0 {
                // A broken frame about an exception; answering with another
                // exception would ping-pong forever. Hang up instead.
                slog::warn!(logger, "Broken exception frame, closing: {}", err);
                return false;
            }
            slog::warn!(logger, "Could not deserialize frame {}: {}", frame.index, err);
            session.send(Msg::Exception(AnyException {
                kind: ExceptionKind::SerializationError,
                description: err.to_string(),
            }));
            return true;
        }
        Ok(msg) => msg,
    };

    let index = msg.index();
    if !session.shared.dispatching_mask.lock().unwrap().allows(index) {
        slog::debug!(logger, "Dropping message with disabled dispatching"; "index" => index);
        return true;
    }

    if let Msg::AcknowledgeQueueFullResponse(Response::Success(())) = &msg {
        session.shared.overflow.store(false, Ordering::SeqCst);
        handler.on_overflow_cleared(session).await;
        return true;
    }

    match handler.handle(msg, session).await {
        Some(response) => {
            session.send(response);
            true
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn masks_start_empty_and_unlock_spares_the_login_pair() {
        let mut mask = MessageMask::none();
        assert!(!mask.allows(0));
        mask.set(0, true);
        assert!(mask.allows(0));

        let mut all = MessageMask::all();
        all.set(1, false);
        all.set(2, false);
        assert!(all.allows(0));
        assert!(!all.allows(1));
        assert!(!all.allows(2));
        assert!(all.allows(Msg::COUNT - 1));
        assert!(!all.allows(Msg::COUNT));
    }
}
