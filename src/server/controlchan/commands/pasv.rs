//! The RFC 959 Passive (`PASV`) command
//
// This command requests the server-DTP to "listen" on a data
// port (which is not its default data port) and to wait for a
// connection rather than initiate one upon receipt of a
// transfer command.  The response to this command includes the
// host and port address this server is listening on.

use super::passive_common;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;
use std::net::IpAddr;

#[derive(Debug)]
pub struct Pasv;

#[async_trait]
impl CommandHandler for Pasv {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        {
            let session = args.session.lock().await;
            if session.epsv_all {
                return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "PASV not allowed after EPSV ALL"));
            }
        }

        let Some(binding) = passive_common::enter_passive_mode(&args).await? else {
            return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established"));
        };

        let octets = match binding.external_ip {
            IpAddr::V4(ip) => ip.octets(),
            IpAddr::V6(_) => {
                // PASV cannot express an IPv6 address; the client should have
                // used EPSV.
                return Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Use EPSV on IPv6"));
            }
        };
        let p1 = binding.port >> 8;
        let p2 = binding.port & 0xff;

        Ok(Reply::new_with_string(
            ReplyCode::EnteringPassiveMode,
            format!("Entering Passive Mode ({},{},{},{},{},{})", octets[0], octets[1], octets[2], octets[3], p1, p2),
        ))
    }
}
