//! The caller pool the server uses to reach an impersonator helper.
//!
//! Each caller owns one channel. A caller keeps a FIFO of outstanding
//! requests; responses must arrive in request order and with the expected
//! type, anything else kills the channel and answers every pending receiver
//! with its default response. A timeout against the earliest deadline does
//! the same.

use super::channel::ImpChannel;
use super::messages::ImpMessage;
use super::process::spawn_helper;
use super::{ImpError, ImpErrorKind};
use slog::Logger;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct ImpClientOptions {
    /// Path of the helper executable (usually our own binary).
    pub helper_exe: PathBuf,
    /// OS account the helper runs file operations as.
    pub identity: String,
    pub pool_size: usize,
    pub request_timeout: Duration,
}

type PendingReply = oneshot::Sender<(ImpMessage, Option<OwnedFd>)>;

struct Request {
    msg: ImpMessage,
    reply: PendingReply,
}

struct Caller {
    tx: mpsc::Sender<Request>,
}

struct Pending {
    expected_index: u16,
    default_response: ImpMessage,
    reply: PendingReply,
    deadline: tokio::time::Instant,
}

impl Caller {
    fn spawn(options: &ImpClientOptions, logger: Logger) -> Result<Caller, ImpError> {
        let channel = spawn_helper(&options.helper_exe, &options.identity)?;
        let (tx, rx) = mpsc::channel::<Request>(16);
        let timeout = options.request_timeout;
        tokio::spawn(run_caller(channel, rx, timeout, logger));
        Ok(Caller { tx })
    }
}

async fn run_caller(mut channel: ImpChannel, mut rx: mpsc::Receiver<Request>, timeout: Duration, logger: Logger) {
    let mut pending: VecDeque<Pending> = VecDeque::new();

    'outer: loop {
        let earliest = pending.front().map(|p| p.deadline);
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                let Some(expected_index) = request.msg.expected_response_index() else {
                    slog::error!(logger, "Not a request message"; "index" => request.msg.index());
                    continue;
                };
                let default_response = match ImpMessage::default_response_for(&request.msg) {
                    Some(d) => d,
                    None => continue,
                };
                if let Err(err) = channel.send(&request.msg, None).await {
                    slog::warn!(logger, "Impersonator send failed: {}", err);
                    let _ = request.reply.send((default_response, None));
                    break;
                }
                pending.push_back(Pending {
                    expected_index,
                    default_response,
                    reply: request.reply,
                    deadline: tokio::time::Instant::now() + timeout,
                });
            }

            received = channel.recv(), if !pending.is_empty() => {
                match received {
                    Ok(Some((msg, fd))) => {
                        let front = pending.pop_front().expect("pending checked non-empty");
                        if msg.index() != front.expected_index {
                            // Out-of-order or mistyped response: the channel
                            // can no longer be trusted.
                            slog::error!(logger, "Impersonator response out of order"; "got" => msg.index(), "want" => front.expected_index);
                            let _ = front.reply.send((front.default_response, None));
                            break 'outer;
                        }
                        let _ = front.reply.send((msg, fd));
                    }
                    Ok(None) | Err(_) => {
                        slog::warn!(logger, "Impersonator channel closed mid-flight");
                        break;
                    }
                }
            }

            _ = sleep_until_or_forever(earliest) => {
                slog::warn!(logger, "Impersonator request timed out; tearing the channel down");
                break;
            }
        }
    }

    // Whatever is still outstanding gets its default response.
    for p in pending {
        let _ = p.reply.send((p.default_response, None));
    }
}

async fn sleep_until_or_forever(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The pooled client. `call` borrows a free caller, creating one on demand up
/// to `pool_size`, and blocks when all are busy.
pub struct ImpClient {
    options: ImpClientOptions,
    free: Mutex<Vec<Caller>>,
    slots: Semaphore,
    logger: Logger,
}

impl std::fmt::Debug for ImpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpClient").field("pool_size", &self.options.pool_size).finish_non_exhaustive()
    }
}

impl ImpClient {
    pub fn new(options: ImpClientOptions, logger: Logger) -> Arc<ImpClient> {
        let slots = Semaphore::new(options.pool_size.max(1));
        Arc::new(ImpClient {
            options,
            free: Mutex::new(Vec::new()),
            slots,
            logger,
        })
    }

    /// Issue one request and wait for its response (or its default, when the
    /// channel dies or the deadline fires).
    pub async fn call(&self, msg: ImpMessage) -> Result<(ImpMessage, Option<OwnedFd>), ImpError> {
        let default_response = ImpMessage::default_response_for(&msg).ok_or_else(|| ImpError::new(ImpErrorKind::Frame("not a request message".into())))?;

        let _slot = self.slots.acquire().await.map_err(|_| ImpError::new(ImpErrorKind::ChannelClosed))?;

        let caller = {
            let mut free = self.free.lock().await;
            match free.pop() {
                Some(caller) => caller,
                None => Caller::spawn(&self.options, self.logger.clone())?,
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if caller.tx.send(Request { msg, reply: reply_tx }).await.is_err() {
            // The caller's task died; its channel does not go back into the
            // pool, and the request is answered with the default.
            return Ok((default_response, None));
        }

        match reply_rx.await {
            Ok((response, fd)) => {
                self.free.lock().await.push(caller);
                Ok((response, fd))
            }
            // The caller task tore down (timeout, close, out-of-order); it
            // answered us with the default already being returned here, and
            // the caller itself is not reusable.
            Err(_) => Ok((default_response, None)),
        }
    }
}
