//! The RFC 2428 Extended Passive (`EPSV`) command
//
// The EPSV command requests that a server listen on a data port and
// wait for a connection. The response to this command includes only
// the TCP port number of the listening connection.

use super::passive_common;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Epsv;

#[async_trait]
impl CommandHandler for Epsv {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        if let Command::Epsv { all: true } = args.parsed_command {
            let mut session = args.session.lock().await;
            session.epsv_all = true;
            return Ok(Reply::new(ReplyCode::CommandOkay, "EPSV ALL accepted"));
        }

        let Some(binding) = passive_common::enter_passive_mode(&args).await? else {
            return Ok(Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established"));
        };

        Ok(Reply::new_with_string(
            ReplyCode::EnteringExtendedPassiveMode,
            format!("Entering Extended Passive Mode (|||{}|)", binding.port),
        ))
    }
}
