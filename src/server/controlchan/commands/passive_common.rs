//! Shared plumbing for entering passive mode (PASV and EPSV): lease a port,
//! bind a listener on the control connection's interface, and hand the
//! accepted socket to the data channel.

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::CommandContext;
use crate::server::datachan;
use crate::server::ftpserver::options::PassiveHost;
use crate::server::portmgr::{PortLease, PortRandomizer};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::channel;

/// How long a freshly advertised passive port waits for the peer.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// How many distinct leased ports we try to bind before giving up.
const BIND_RETRIES: usize = 10;

/// The address details a PASV/EPSV reply is built from.
pub struct PassiveBinding {
    pub external_ip: IpAddr,
    pub port: u16,
}

// Wires up the channels over which the control loop tells the data side what
// to transfer.
async fn setup_data_loop_comms(args: &CommandContext) {
    let (cmd_tx, cmd_rx) = channel::<DataChanCmd>(1);
    let (abort_tx, abort_rx) = channel::<()>(1);

    let mut session = args.session.lock().await;
    session.data_cmd_tx = Some(cmd_tx);
    session.data_cmd_rx = Some(cmd_rx);
    session.data_abort_tx = Some(abort_tx);
    session.data_abort_rx = Some(abort_rx);
    session.data_dest = None;
}

async fn try_bind(args: &CommandContext, peer_ip: IpAddr) -> Option<(TcpListener, PortLease)> {
    let randomizer = PortRandomizer::new(args.port_manager.clone(), peer_ip, *args.passive_ports.start(), *args.passive_ports.end());
    for _ in 0..BIND_RETRIES {
        let lease = randomizer.get_port()?;
        match TcpListener::bind(SocketAddr::new(args.local_addr.ip(), lease.port())).await {
            Ok(listener) => return Some((listener, lease)),
            Err(_) => continue, // lease drops, port freed immediately
        }
    }
    None
}

/// The IP a passive reply should advertise: the configured override when the
/// peer would actually be able to reach it, otherwise the address the control
/// connection came in on.
async fn external_ip(args: &CommandContext, peer_ip: IpAddr) -> IpAddr {
    match &args.passive_host {
        PassiveHost::FromConnection => args.local_addr.ip(),
        PassiveHost::Ip(ip) => {
            if peer_ip.is_loopback() {
                args.local_addr.ip()
            } else {
                IpAddr::V4(*ip)
            }
        }
        PassiveHost::Dns(name) => match tokio::net::lookup_host((name.as_str(), 0)).await {
            Ok(mut addrs) => addrs.find(|a| a.is_ipv4()).map(|a| a.ip()).unwrap_or_else(|| args.local_addr.ip()),
            Err(_) => args.local_addr.ip(),
        },
    }
}

/// Enter passive mode: returns what to advertise, or `None` when no port
/// could be secured.
pub async fn enter_passive_mode(args: &CommandContext) -> Result<Option<PassiveBinding>, ControlChanError> {
    let peer_ip = { args.session.lock().await.source.ip() };

    let Some((listener, mut lease)) = try_bind(args, peer_ip).await else {
        slog::warn!(args.logger, "No passive port available"; "peer" => %peer_ip);
        return Ok(None);
    };
    let port = lease.port();

    setup_data_loop_comms(args).await;

    let session = args.session.clone();
    let tx = args.tx_control_chan.clone();
    let logger = args.logger.clone();
    let ftps = args.ftps_config.clone();

    // Accept in the background; the client must first learn the port from
    // our reply before it can connect.
    tokio::spawn(async move {
        match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((socket, peer))) => {
                slog::debug!(logger, "Data connection accepted"; "peer" => %peer, "port" => port);
                lease.set_connected();
                datachan::spawn_processing(logger, session, tx, datachan::SocketSource::Established(socket), ftps);
            }
            Ok(Err(err)) => {
                slog::warn!(logger, "Accepting data connection failed: {}", err);
                clear_data_comms(&session).await;
            }
            Err(_) => {
                slog::debug!(logger, "Peer never connected to passive port"; "port" => port);
                clear_data_comms(&session).await;
            }
        }
    });

    let external_ip = external_ip(args, peer_ip).await;
    Ok(Some(PassiveBinding { external_ip, port }))
}

pub async fn clear_data_comms(session: &crate::server::session::SharedSession) {
    let mut session = session.lock().await;
    session.data_cmd_tx = None;
    session.data_cmd_rx = None;
    session.data_abort_tx = None;
    session.data_abort_rx = None;
}

/// Set up active mode: remember the peer's address; the data task dials out
/// only once a transfer command arrives.
pub async fn enter_active_mode(args: &CommandContext, dest: SocketAddr) {
    setup_data_loop_comms(args).await;
    {
        let mut session = args.session.lock().await;
        session.data_dest = Some(dest);
    }

    datachan::spawn_processing(
        args.logger.clone(),
        args.session.clone(),
        args.tx_control_chan.clone(),
        datachan::SocketSource::ConnectTo(dest),
        args.ftps_config.clone(),
    );
}
