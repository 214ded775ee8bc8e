//! The per-connection control channel loop: reads commands, enforces the
//! command flag table, dispatches handlers, relays data-channel outcomes and
//! performs the AUTH TLS upgrade.

use crate::auth::Authenticator;
use crate::notification::{SessionEvent, SessionListener};
use crate::server::autobanner::{AddressFamily, Autobanner};
use crate::server::chancomms::ControlChanMsg;
use crate::server::controlchan::command::Command;
use crate::server::controlchan::commands;
use crate::server::controlchan::handler::{CommandContext, CommandHandler, StorageFactory};
use crate::server::controlchan::{ControlChanError, ControlChanErrorKind, FtpCodec, Reply, ReplyCode};
use crate::server::ftpserver::options::{FtpsRequired, PassiveHost, WelcomeMessage};
use crate::server::portmgr::PortManager;
use crate::server::registry::{SessionInfo, SessionRegistry};
use crate::server::session::{Session, SessionState, SharedSession};
use crate::server::stream::DataStream;
use crate::server::tls::FtpsConfig;
use crate::storage;
use futures_util::{SinkExt, StreamExt};
use slog::Logger;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

/// Everything a single control loop needs to run.
pub struct LoopConfig {
    pub authenticator: Arc<dyn Authenticator>,
    pub storage_factory: StorageFactory,
    pub ftps_config: FtpsConfig,
    pub ftps_required: FtpsRequired,
    pub welcome: WelcomeMessage,
    pub login_timeout: Duration,
    pub activity_timeout: Duration,
    pub passive_ports: RangeInclusive<u16>,
    pub passive_host: PassiveHost,
    pub port_manager: Arc<PortManager>,
    pub autobanner: Arc<Autobanner>,
    pub notifier: Arc<dyn SessionListener>,
    pub registry: Arc<SessionRegistry>,
    pub logger: Logger,
}

/// Take ownership of a fresh control connection and run its session until it
/// ends. Returns immediately; the loop runs as its own task.
pub fn spawn_loop(config: LoopConfig, tcp_stream: TcpStream) -> Result<(), ControlChanError> {
    let peer = tcp_stream.peer_addr()?;
    let local_addr = tcp_stream.local_addr()?;

    let session = Arc::new(Mutex::new(Session::new(peer, config.notifier.clone())));
    tokio::spawn(async move {
        run_loop(config, session, DataStream::Plain(tcp_stream), local_addr).await;
    });
    Ok(())
}

/// Like [`spawn_loop`], for a connection that already completed an implicit
/// TLS handshake.
pub fn spawn_loop_tls(config: LoopConfig, tls_stream: tokio_rustls::server::TlsStream<TcpStream>) -> Result<(), ControlChanError> {
    let peer = tls_stream.get_ref().0.peer_addr()?;
    let local_addr = tls_stream.get_ref().0.local_addr()?;

    let session = Arc::new(Mutex::new(Session::new(peer, config.notifier.clone())));
    tokio::spawn(async move {
        {
            let mut s = session.lock().await;
            s.cmd_tls = true;
        }
        run_loop(config, session, DataStream::Tls(Box::new(tls_stream)), local_addr).await;
    });
    Ok(())
}

async fn run_loop(config: LoopConfig, session: SharedSession, stream: DataStream, local_addr: std::net::SocketAddr) {
    let (session_id, peer, start_time, last_activity, started_at) = {
        let s = session.lock().await;
        (s.id, s.source, s.start_time, s.last_activity.clone(), s.started_at)
    };
    let logger = config.logger.new(slog::o!("session" => session_id, "peer" => peer.to_string()));

    let mut kill_rx = config.registry.register(SessionInfo {
        id: session_id,
        peer_ip: peer.ip(),
        start_time,
        username: None,
    });

    {
        let s = session.lock().await;
        s.notify(SessionEvent::Start {
            start_time,
            peer_ip: peer.ip(),
            family: AddressFamily::from(peer.ip()),
        })
        .await;
    }

    let (control_tx, mut control_rx) = mpsc::channel::<ControlChanMsg>(16);
    let mut framed = Framed::new(stream, FtpCodec::new());

    if framed.send(greeting(&config.welcome)).await.is_err() {
        finish(&config, &session, session_id, &logger).await;
        return;
    }

    loop {
        let authenticated = { session.lock().await.state == SessionState::WaitCmd };
        let deadline = if authenticated {
            let last = *last_activity.lock().unwrap();
            tokio::time::Instant::from_std(last + config.activity_timeout)
        } else {
            tokio::time::Instant::from_std(started_at + config.login_timeout)
        };

        tokio::select! {
            biased;

            _ = kill_rx.recv() => {
                slog::info!(logger, "Session ended by administrator");
                let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Connection terminated by administrator")).await;
                break;
            }

            Some(msg) = control_rx.recv() => {
                match handle_internal_msg(msg, &session, &config, &logger, &mut framed).await {
                    MsgOutcome::Continue => {}
                    MsgOutcome::Upgrade => {
                        match upgrade_to_tls(&config, framed, &logger).await {
                            Ok(new_framed) => {
                                framed = new_framed;
                                let mut s = session.lock().await;
                                s.cmd_tls = true;
                                let info = s.protocol_info();
                                s.notify(SessionEvent::ProtocolInfo { info }).await;
                            }
                            Err(()) => break,
                        }
                    }
                    MsgOutcome::Close => break,
                }
            }

            cmd = framed.next() => {
                match cmd {
                    None => {
                        slog::debug!(logger, "Client closed the control connection");
                        break;
                    }
                    Some(Err(err)) => {
                        let reply = error_reply(&err);
                        slog::warn!(logger, "Control channel error: {}", err);
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                        if matches!(err.kind(), ControlChanErrorKind::IoError) {
                            break;
                        }
                    }
                    Some(Ok(cmd)) => {
                        { session.lock().await.touch(); }
                        let reply = process_command(cmd, &config, &session, &control_tx, local_addr, &logger).await;
                        match reply {
                            Ok(reply) => {
                                if framed.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                slog::warn!(logger, "Handler error: {}", err);
                                let _ = framed.send(Reply::new(ReplyCode::LocalError, "Internal server error")).await;
                            }
                        }
                    }
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                slog::info!(logger, "Session timed out");
                let _ = framed.send(Reply::new(ReplyCode::ServiceNotAvailable, "Session timed out. Closing control connection")).await;
                break;
            }
        }
    }

    finish(&config, &session, session_id, &logger).await;
}

async fn finish(config: &LoopConfig, session: &SharedSession, session_id: u64, logger: &Logger) {
    {
        let mut s = session.lock().await;
        // Dropping the abort sender wakes a waiting data task, dropping the
        // command channels starves one that never started.
        if let Some(tx) = s.data_abort_tx.take() {
            let _ = tx.try_send(());
        }
        s.data_cmd_tx = None;
        s.data_cmd_rx = None;
        s.data_abort_rx = None;
        s.notify(SessionEvent::Stop).await;
    }
    config.registry.deregister(session_id);
    slog::info!(logger, "Session closed");
}

fn greeting(welcome: &WelcomeMessage) -> Reply {
    let lines = welcome.render();
    if lines.len() == 1 {
        Reply::new(ReplyCode::ServiceReady, &lines[0])
    } else {
        Reply::new_multiline(ReplyCode::ServiceReady, lines)
    }
}

enum MsgOutcome {
    Continue,
    Upgrade,
    Close,
}

async fn handle_internal_msg(
    msg: ControlChanMsg,
    session: &SharedSession,
    config: &LoopConfig,
    logger: &Logger,
    framed: &mut Framed<DataStream, FtpCodec>,
) -> MsgOutcome {
    use ControlChanMsg::*;

    let reply = match msg {
        SentData { .. } => Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete"),
        WrittenData { .. } => Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete"),
        DirectoryListed => Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete"),
        DataConnectionNotEstablished => Reply::new(ReplyCode::CantOpenDataConnection, "Could not open data connection"),
        ConnectionReset => Reply::new(ReplyCode::ConnectionClosed, "Data connection unexpectedly closed"),
        TransferAborted => {
            let _ = framed.send(Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted")).await;
            Reply::new(ReplyCode::ClosingDataConnection, "ABOR successful")
        }
        StorageError(err) => storage_error_reply(&err),
        SecureControlChannel => return MsgOutcome::Upgrade,
        AuthSuccess => {
            let s = session.lock().await;
            if let Some(username) = &s.username {
                config.registry.set_username(s.id, username);
            }
            let info = s.protocol_info();
            s.notify(SessionEvent::ProtocolInfo { info }).await;
            Reply::none()
        }
        AuthFailed => Reply::none(),
        Banned => {
            let _ = framed
                .send(Reply::new(ReplyCode::ServiceNotAvailable, "Too many failed login attempts. Closing control connection"))
                .await;
            return MsgOutcome::Close;
        }
        Quit => {
            let _ = framed.send(Reply::new(ReplyCode::ClosingControlConnection, "Goodbye")).await;
            return MsgOutcome::Close;
        }
    };

    match framed.send(reply).await {
        Ok(()) => MsgOutcome::Continue,
        Err(err) => {
            slog::debug!(logger, "Could not send reply: {}", err);
            MsgOutcome::Close
        }
    }
}

async fn upgrade_to_tls(config: &LoopConfig, framed: Framed<DataStream, FtpCodec>, logger: &Logger) -> Result<Framed<DataStream, FtpCodec>, ()> {
    let FtpsConfig::On { tls_config } = &config.ftps_config else {
        slog::error!(logger, "AUTH TLS accepted but no TLS configuration available");
        return Err(());
    };

    let parts = framed.into_parts();
    if !parts.read_buf.is_empty() {
        // The client started its handshake before reading our 234; anything
        // already buffered cannot be replayed into the TLS layer.
        slog::warn!(logger, "Discarding {} bytes received before the TLS handshake", parts.read_buf.len());
    }
    let stream = match parts.io {
        DataStream::Plain(stream) => stream,
        DataStream::Tls(_) => {
            slog::error!(logger, "Control channel is already secure");
            return Err(());
        }
    };

    let acceptor = TlsAcceptor::from(tls_config.clone());
    match acceptor.accept(stream).await {
        Ok(tls_stream) => {
            slog::info!(logger, "Control channel upgraded to TLS");
            Ok(Framed::new(DataStream::Tls(Box::new(tls_stream)), FtpCodec::new()))
        }
        Err(err) => {
            slog::warn!(logger, "TLS handshake failed: {}", err);
            Err(())
        }
    }
}

async fn process_command(
    cmd: Command,
    config: &LoopConfig,
    session: &SharedSession,
    control_tx: &mpsc::Sender<ControlChanMsg>,
    local_addr: std::net::SocketAddr,
    logger: &Logger,
) -> Result<Reply, ControlChanError> {
    slog::debug!(logger, "Processing command"; "verb" => cmd.verb());

    let flags = cmd.flags();
    {
        let session = session.lock().await;

        let tls_demanded = matches!(config.ftps_required, FtpsRequired::All | FtpsRequired::Accounts);
        if config.ftps_config.is_enabled() && tls_demanded && !session.cmd_tls && !cmd.allowed_before_security() {
            return Ok(Reply::new(ReplyCode::FtpsRequired, "A secure connection is required; use AUTH TLS"));
        }
        if flags.contains(crate::server::controlchan::CommandFlags::NEEDS_SECURITY) && !session.cmd_tls {
            return Ok(Reply::new(ReplyCode::FtpsRequired, "This command requires a secure connection"));
        }
        if flags.contains(crate::server::controlchan::CommandFlags::NEEDS_AUTH) && session.state != SessionState::WaitCmd {
            return Ok(Reply::new(ReplyCode::NotLoggedIn, "Please authenticate"));
        }
    }

    let handler: Box<dyn CommandHandler> = match &cmd {
        Command::User { .. } => Box::new(commands::User),
        Command::Pass { .. } => Box::new(commands::Pass),
        Command::Auth { .. } => Box::new(commands::Auth),
        Command::Adat { .. } => Box::new(commands::Adat),
        Command::Clnt { .. } => Box::new(commands::Clnt),
        Command::Syst => Box::new(commands::Syst),
        Command::Stat { .. } => Box::new(commands::Stat),
        Command::Feat => Box::new(commands::Feat),
        Command::Help => Box::new(commands::Help),
        Command::Noop => Box::new(commands::Noop),
        Command::Quit => Box::new(commands::Quit),
        Command::Type { .. } => Box::new(commands::Type),
        Command::Stru { .. } => Box::new(commands::Stru),
        Command::Mode { .. } => Box::new(commands::Mode),
        Command::Port { .. } => Box::new(commands::Port),
        Command::Eprt { .. } => Box::new(commands::Eprt),
        Command::Pasv => Box::new(commands::Pasv),
        Command::Epsv { .. } => Box::new(commands::Epsv),
        Command::Retr { .. } => Box::new(commands::Retr),
        Command::Stor { .. } => Box::new(commands::Stor),
        Command::Appe { .. } => Box::new(commands::Appe),
        Command::Allo { .. } => Box::new(commands::Allo),
        Command::List { .. } => Box::new(commands::List),
        Command::Nlst { .. } => Box::new(commands::Nlst),
        Command::Mlsd { .. } => Box::new(commands::Mlsd),
        Command::Mlst { .. } => Box::new(commands::Mlst),
        Command::Pwd => Box::new(commands::Pwd),
        Command::Cwd { .. } => Box::new(commands::Cwd),
        Command::Cdup => Box::new(commands::Cdup),
        Command::Mkd { .. } => Box::new(commands::Mkd),
        Command::Rmd { .. } => Box::new(commands::Rmd),
        Command::Dele { .. } => Box::new(commands::Dele),
        Command::Rnfr { .. } => Box::new(commands::Rnfr),
        Command::Rnto { .. } => Box::new(commands::Rnto),
        Command::Size { .. } => Box::new(commands::Size),
        Command::Mdtm { .. } => Box::new(commands::Mdtm),
        Command::Mfmt { .. } => Box::new(commands::Mfmt),
        Command::Rest { .. } => Box::new(commands::Rest),
        Command::Opts { .. } => Box::new(commands::Opts),
        Command::Pbsz {} => Box::new(commands::Pbsz),
        Command::Prot { .. } => Box::new(commands::Prot),
        Command::Abor => Box::new(commands::Abor),
    };

    let context = CommandContext {
        parsed_command: cmd,
        session: session.clone(),
        authenticator: config.authenticator.clone(),
        ftps_config: config.ftps_config.clone(),
        passive_ports: config.passive_ports.clone(),
        passive_host: config.passive_host.clone(),
        port_manager: config.port_manager.clone(),
        autobanner: config.autobanner.clone(),
        tx_control_chan: control_tx.clone(),
        local_addr,
        storage_factory: config.storage_factory.clone(),
        logger: logger.clone(),
    };

    handler.handle(context).await
}

fn error_reply(err: &ControlChanError) -> Reply {
    match err.kind() {
        ControlChanErrorKind::UnknownCommand { .. } => Reply::new(ReplyCode::CommandSyntaxError, "Command not implemented"),
        ControlChanErrorKind::Utf8Error => Reply::new(ReplyCode::CommandSyntaxError, "Invalid UTF8 in command"),
        ControlChanErrorKind::LineTooLong => Reply::new(ReplyCode::CommandSyntaxError, "Line too long"),
        ControlChanErrorKind::InvalidCommand => Reply::new(ReplyCode::ParameterSyntaxError, "Invalid parameter"),
        ControlChanErrorKind::ControlChannelTimeout => Reply::new(ReplyCode::ServiceNotAvailable, "Session timed out. Closing control connection"),
        _ => Reply::new(ReplyCode::LocalError, "Unknown internal server error, please try again later"),
    }
}

fn storage_error_reply(err: &storage::Error) -> Reply {
    match err.kind() {
        storage::ErrorKind::PermanentFileNotAvailable => Reply::new(ReplyCode::FileError, "File not found"),
        storage::ErrorKind::TransientFileNotAvailable => Reply::new(ReplyCode::TransientFileError, "File temporarily unavailable"),
        storage::ErrorKind::PermissionDenied => Reply::new(ReplyCode::FileError, "Permission denied"),
        storage::ErrorKind::FileNameNotAllowed => Reply::new(ReplyCode::BadFileName, "File name not allowed"),
        storage::ErrorKind::InsufficientStorage => Reply::new(ReplyCode::OutOfSpace, "Insufficient storage space"),
        storage::ErrorKind::LocalError => Reply::new(ReplyCode::LocalError, "Local error"),
    }
}
