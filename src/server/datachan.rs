//! The FTP *data* channel: waits for the transfer command belonging to a
//! freshly established data connection, runs it through the pipe/channel
//! machinery and reports the outcome to the control loop.

use crate::chan::operators::{ReaderAdder, VecAdder, WriterConsumer};
use crate::chan::{BufferAdder, Channel, ChannelDone, ErrorSource, channel::ProgressNotifier};
use crate::notification::SessionEvent;
use crate::server::ascii::{NvtInConsumer, NvtOutAdder};
use crate::server::chancomms::{ControlChanMsg, DataChanCmd};
use crate::server::controlchan::command::TypeParam;
use crate::server::ratelimit::{ThrottledAdder, ThrottledConsumer};
use crate::server::session::SharedSession;
use crate::server::stream::DataStream;
use crate::server::tls::FtpsConfig;
use crate::storage;
use slog::Logger;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio_rustls::TlsAcceptor;

const DATA_BUFFER_SIZE: usize = 64 * 1024;
const DATA_MAX_LOOPS: usize = 8;

/// Updates the session activity clock as bytes move, so activity timeouts
/// see data transfers too.
struct ActivityProgress {
    last_activity: Arc<StdMutex<Instant>>,
}

impl ProgressNotifier for ActivityProgress {
    fn socket_read(&self, at: Instant, _amount: u64) {
        *self.last_activity.lock().unwrap() = at;
    }
    fn socket_written(&self, at: Instant, _amount: u64) {
        *self.last_activity.lock().unwrap() = at;
    }
}

/// Where the data socket comes from: passive mode accepts it up front,
/// active mode dials out only once a transfer command arrives.
pub enum SocketSource {
    Established(TcpStream),
    ConnectTo(std::net::SocketAddr),
}

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Take over the data connection for this session. Waits for the control
/// side to say what to do with it, then does it.
pub fn spawn_processing(logger: Logger, session: SharedSession, tx: Sender<ControlChanMsg>, source: SocketSource, ftps: FtpsConfig) {
    tokio::spawn(async move {
        let (mut cmd_rx, mut abort_rx) = {
            let mut session = session.lock().await;
            match (session.data_cmd_rx.take(), session.data_abort_rx.take()) {
                (Some(cmd_rx), Some(abort_rx)) => (cmd_rx, abort_rx),
                _ => {
                    slog::warn!(logger, "Data connection established but no transfer pending");
                    return;
                }
            }
        };

        let cmd = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => return, // control channel went away
            },
            _ = abort_rx.recv() => {
                let _ = tx.send(ControlChanMsg::TransferAborted).await;
                return;
            }
        };

        let socket = match source {
            SocketSource::Established(socket) => socket,
            SocketSource::ConnectTo(dest) => match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(dest)).await {
                Ok(Ok(socket)) => socket,
                Ok(Err(err)) => {
                    slog::warn!(logger, "Connecting to {} for active mode failed: {}", dest, err);
                    let _ = tx.send(ControlChanMsg::DataConnectionNotEstablished).await;
                    return;
                }
                Err(_) => {
                    slog::warn!(logger, "Connecting to {} for active mode timed out", dest);
                    let _ = tx.send(ControlChanMsg::DataConnectionNotEstablished).await;
                    return;
                }
            },
        };

        let stream = match secure_if_requested(&logger, &session, socket, &ftps).await {
            Ok(stream) => stream,
            Err(()) => {
                let _ = tx.send(ControlChanMsg::DataConnectionNotEstablished).await;
                return;
            }
        };

        {
            let mut s = session.lock().await;
            s.data_busy = true;
        }

        let result = tokio::select! {
            result = execute(&logger, &session, &tx, stream, cmd) => result,
            _ = abort_rx.recv() => {
                slog::info!(logger, "Transfer aborted by client");
                let _ = tx.send(ControlChanMsg::TransferAborted).await;
                Ok(())
            }
        };

        {
            let mut s = session.lock().await;
            s.data_busy = false;
            s.start_pos = 0;
        }

        if let Err(err) = result {
            let _ = tx.send(ControlChanMsg::StorageError(err)).await;
        }
    });
}

async fn secure_if_requested(logger: &Logger, session: &SharedSession, socket: TcpStream, ftps: &FtpsConfig) -> Result<DataStream, ()> {
    let wants_tls = session.lock().await.data_tls;
    if !wants_tls {
        return Ok(DataStream::Plain(socket));
    }
    match ftps {
        FtpsConfig::On { tls_config } => {
            let acceptor = TlsAcceptor::from(tls_config.clone());
            match acceptor.accept(socket).await {
                Ok(stream) => Ok(DataStream::Tls(Box::new(stream))),
                Err(err) => {
                    slog::warn!(logger, "TLS handshake on data connection failed: {}", err);
                    Err(())
                }
            }
        }
        _ => {
            slog::error!(logger, "PROT P active but no TLS configuration available");
            Err(())
        }
    }
}

async fn execute(logger: &Logger, session: &SharedSession, tx: &Sender<ControlChanMsg>, stream: DataStream, cmd: DataChanCmd) -> storage::Result<()> {
    match cmd {
        DataChanCmd::Retr { path } => retrieve(logger, session, tx, stream, path).await,
        DataChanCmd::Stor { path } => store(logger, session, tx, stream, path, false).await,
        DataChanCmd::Appe { path } => store(logger, session, tx, stream, path, true).await,
        DataChanCmd::List { path } => list(logger, session, tx, stream, path, Listing::Ls).await,
        DataChanCmd::Nlst { path } => list(logger, session, tx, stream, path, Listing::Names).await,
        DataChanCmd::Mlsd { path } => list(logger, session, tx, stream, path, Listing::Facts).await,
    }
}

struct TransferSetup {
    storage: Arc<dyn storage::StorageBackend>,
    path: PathBuf,
    start_pos: u64,
    ascii: bool,
    inbound: crate::server::ratelimit::Buckets,
    outbound: crate::server::ratelimit::Buckets,
    channel: Channel,
    entry_id: u64,
}

async fn setup(session: &SharedSession, path: &str) -> storage::Result<TransferSetup> {
    let mut s = session.lock().await;
    let storage = s.storage.clone().ok_or(storage::ErrorKind::LocalError)?;
    let resolved = s.resolve(path);
    let entry_id = s.next_entry_id();
    let channel = Channel::new(DATA_BUFFER_SIZE, DATA_MAX_LOOPS).with_progress(Arc::new(ActivityProgress {
        last_activity: s.last_activity.clone(),
    }));
    Ok(TransferSetup {
        storage,
        path: resolved,
        start_pos: s.start_pos,
        ascii: s.transfer_type == TypeParam::Ascii,
        inbound: s.user.as_ref().map(|u| u.inbound_buckets.clone()).unwrap_or_default(),
        outbound: s.user.as_ref().map(|u| u.outbound_buckets.clone()).unwrap_or_default(),
        channel,
        entry_id,
    })
}

fn done_code(done: &ChannelDone) -> i32 {
    done.error.code
}

async fn retrieve(logger: &Logger, session: &SharedSession, tx: &Sender<ControlChanMsg>, stream: DataStream, path: String) -> storage::Result<()> {
    let setup = setup(session, &path).await?;
    let size = setup.storage.metadata(&setup.path).await.map(|m| m.len as i64).unwrap_or(-1);
    let reader = setup.storage.open_read(&setup.path, setup.start_pos).await?;

    {
        let s = session.lock().await;
        s.notify(SessionEvent::EntryOpen {
            entry_id: setup.entry_id,
            path: setup.path.to_string_lossy().into_owned(),
            size,
        })
        .await;
    }

    let mut adder: Box<dyn BufferAdder> = if setup.ascii {
        Box::new(ThrottledAdder::new(NvtOutAdder::new(ReaderAdder::new(reader)), setup.outbound))
    } else {
        Box::new(ThrottledAdder::new(ReaderAdder::new(reader), setup.outbound))
    };

    let done = setup.channel.send(stream, adder.as_mut()).await;

    {
        let s = session.lock().await;
        s.notify(SessionEvent::EntryRead {
            entry_id: setup.entry_id,
            amount: done.transferred,
        })
        .await;
        s.notify(SessionEvent::EntryClose {
            entry_id: setup.entry_id,
            error: done_code(&done),
        })
        .await;
    }

    if done.is_ok() {
        slog::info!(logger, "RETR finished"; "path" => %setup.path.display(), "bytes" => done.transferred);
        let _ = tx.send(ControlChanMsg::SentData { bytes: done.transferred }).await;
    } else {
        slog::warn!(logger, "RETR failed"; "path" => %setup.path.display(), "err" => done.error.code);
        let _ = tx.send(ControlChanMsg::ConnectionReset).await;
    }
    Ok(())
}

async fn store(logger: &Logger, session: &SharedSession, tx: &Sender<ControlChanMsg>, stream: DataStream, path: String, append: bool) -> storage::Result<()> {
    let setup = setup(session, &path).await?;
    let writer = setup.storage.open_write(&setup.path, setup.start_pos, append).await?;

    {
        let s = session.lock().await;
        s.notify(SessionEvent::EntryOpen {
            entry_id: setup.entry_id,
            path: setup.path.to_string_lossy().into_owned(),
            size: -1,
        })
        .await;
    }

    let done = if setup.ascii {
        let mut consumer = ThrottledConsumer::new(NvtInConsumer::new(WriterConsumer::new(writer)), setup.inbound);
        let done = setup.channel.receive(stream, &mut consumer).await;
        if done.is_ok() {
            let nvt = std::mem::replace(consumer.inner_mut(), NvtInConsumer::new(WriterConsumer::new(Box::new(Vec::<u8>::new()))));
            match nvt.finish().await {
                Ok(mut writer) => match writer.flush().await {
                    Ok(()) => done,
                    Err(code) => ChannelDone {
                        error: crate::chan::ChanError::new(code, ErrorSource::BufferConsumer),
                        transferred: done.transferred,
                    },
                },
                Err(code) => ChannelDone {
                    error: crate::chan::ChanError::new(code, ErrorSource::BufferConsumer),
                    transferred: done.transferred,
                },
            }
        } else {
            done
        }
    } else {
        let mut consumer = ThrottledConsumer::new(WriterConsumer::new(writer), setup.inbound);
        let done = setup.channel.receive(stream, &mut consumer).await;
        if done.is_ok() {
            match consumer.inner_mut().flush().await {
                Ok(()) => done,
                Err(code) => ChannelDone {
                    error: crate::chan::ChanError::new(code, ErrorSource::BufferConsumer),
                    transferred: done.transferred,
                },
            }
        } else {
            done
        }
    };

    let actual_size = setup.storage.metadata(&setup.path).await.map(|m| m.len).unwrap_or(0);
    {
        let s = session.lock().await;
        s.notify(SessionEvent::EntryWritten {
            entry_id: setup.entry_id,
            amount: done.transferred,
            actual_entry_size: actual_size,
        })
        .await;
        s.notify(SessionEvent::EntryClose {
            entry_id: setup.entry_id,
            error: done_code(&done),
        })
        .await;
    }

    if done.is_ok() {
        slog::info!(logger, "STOR finished"; "path" => %setup.path.display(), "bytes" => done.transferred);
        let _ = tx.send(ControlChanMsg::WrittenData { bytes: done.transferred }).await;
    } else {
        slog::warn!(logger, "STOR failed"; "path" => %setup.path.display(), "err" => done.error.code);
        let _ = tx.send(ControlChanMsg::ConnectionReset).await;
    }
    Ok(())
}

enum Listing {
    Ls,
    Names,
    Facts,
}

async fn list(logger: &Logger, session: &SharedSession, tx: &Sender<ControlChanMsg>, stream: DataStream, path: Option<String>, kind: Listing) -> storage::Result<()> {
    let path = path.unwrap_or_default();
    let setup = setup(session, &path).await?;
    let entries = setup.storage.list(&setup.path).await?;

    let mut text = String::new();
    for info in &entries {
        let line = match kind {
            Listing::Ls => info.format_ls(),
            Listing::Names => info.path.to_string_lossy().into_owned(),
            Listing::Facts => info.format_mlsx(),
        };
        text.push_str(&line);
        text.push_str("\r\n");
    }

    let mut adder = ThrottledAdder::new(VecAdder::new(text.into_bytes()), setup.outbound);
    let done = setup.channel.send(stream, &mut adder).await;

    if done.is_ok() {
        slog::debug!(logger, "Directory listed"; "path" => %setup.path.display(), "entries" => entries.len());
        let _ = tx.send(ControlChanMsg::DirectoryListed).await;
    } else {
        let _ = tx.send(ControlChanMsg::ConnectionReset).await;
    }
    Ok(())
}
