//! The RFC 959 File Structure (`STRU`) command

use crate::server::controlchan::command::StruParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Stru;

#[async_trait]
impl CommandHandler for Stru {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        match &args.parsed_command {
            Command::Stru { structure: StruParam::File } => Ok(Reply::new(ReplyCode::CommandOkay, "Structure set to File")),
            Command::Stru { .. } => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only File structure is supported")),
            _ => Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        }
    }
}
