//! The RFC 959 Data Port (`PORT`) command
//
// The argument is a HOST-PORT specification for the data port
// to be used in data connection. Defaults exist for both the
// user and server data ports, and under normal circumstances
// this command and its reply are not needed.

use super::passive_common;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug)]
pub struct Port;

/// Parse the `h1,h2,h3,h4,p1,p2` HOST-PORT form.
pub fn parse_host_port(spec: &str) -> Option<SocketAddr> {
    let parts: Vec<u8> = spec.split(',').map(|p| p.trim().parse::<u8>()).collect::<Result<_, _>>().ok()?;
    if parts.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = u16::from(parts[4]) << 8 | u16::from(parts[5]);
    if port == 0 {
        return None;
    }
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

#[async_trait]
impl CommandHandler for Port {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let spec = match &args.parsed_command {
            Command::Port { addr } => addr.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let peer_ip = {
            let session = args.session.lock().await;
            if session.epsv_all {
                return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "PORT not allowed after EPSV ALL"));
            }
            session.source.ip()
        };

        let Some(dest) = parse_host_port(&spec) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid PORT argument"));
        };

        // Refuse bounce attacks: the address must belong to the control peer.
        if dest.ip() != peer_ip {
            slog::warn!(args.logger, "PORT address does not match control peer"; "given" => %dest.ip(), "peer" => %peer_ip);
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "PORT address must match the control connection"));
        }

        passive_common::enter_active_mode(&args, dest).await;
        Ok(Reply::new(ReplyCode::CommandOkay, "PORT command successful"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn host_port_happy_path() {
        assert_eq!(parse_host_port("127,0,0,1,200,10"), Some("127.0.0.1:51210".parse().unwrap()));
    }

    #[test]
    fn host_port_rejects_garbage() {
        assert_eq!(parse_host_port("127,0,0,1,200"), None);
        assert_eq!(parse_host_port("300,0,0,1,200,10"), None);
        assert_eq!(parse_host_port("127,0,0,1,0,0"), None);
        assert_eq!(parse_host_port("bananas"), None);
    }
}
