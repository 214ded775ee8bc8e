//! The RFC 2428 Extended Data Port (`EPRT`) command
//
// EPRT allows the specification of an extended address: the network
// protocol as well as the IP address and TCP port, in the form
// `<d><proto><d><addr><d><port><d>`.

use super::passive_common;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

#[derive(Debug)]
pub struct Eprt;

/// Parse `|1|132.235.1.2|6275|` or `|2|1080::8:800:200C:417A|5282|`.
pub fn parse_extended_address(spec: &str) -> Option<SocketAddr> {
    let delim = spec.chars().next()?;
    let mut parts = spec.split(delim);
    parts.next()?; // leading empty field
    let proto = parts.next()?;
    let addr = parts.next()?;
    let port = parts.next()?;

    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    let ip: IpAddr = addr.parse().ok()?;
    match (proto, &ip) {
        ("1", IpAddr::V4(_)) | ("2", IpAddr::V6(_)) => Some(SocketAddr::new(ip, port)),
        _ => None,
    }
}

#[async_trait]
impl CommandHandler for Eprt {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let spec = match &args.parsed_command {
            Command::Eprt { addr } => addr.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let peer_ip = {
            let session = args.session.lock().await;
            if session.epsv_all {
                return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "EPRT not allowed after EPSV ALL"));
            }
            session.source.ip()
        };

        let Some(dest) = parse_extended_address(&spec) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid EPRT argument"));
        };

        if dest.ip() != peer_ip {
            slog::warn!(args.logger, "EPRT address does not match control peer"; "given" => %dest.ip(), "peer" => %peer_ip);
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "EPRT address must match the control connection"));
        }

        passive_common::enter_active_mode(&args, dest).await;
        Ok(Reply::new(ReplyCode::CommandOkay, "EPRT command successful"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_ipv4_and_ipv6_forms() {
        assert_eq!(parse_extended_address("|1|132.235.1.2|6275|"), Some("132.235.1.2:6275".parse().unwrap()));
        assert_eq!(
            parse_extended_address("|2|1080::8:800:200C:417A|5282|"),
            Some("[1080::8:800:200C:417A]:5282".parse().unwrap())
        );
    }

    #[test]
    fn rejects_protocol_address_mismatch() {
        assert_eq!(parse_extended_address("|2|132.235.1.2|6275|"), None);
        assert_eq!(parse_extended_address("|1|::1|6275|"), None);
        assert_eq!(parse_extended_address("nonsense"), None);
    }
}
