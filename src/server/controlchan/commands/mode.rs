//! The RFC 959 Transfer Mode (`MODE`) command

use crate::server::controlchan::command::ModeParam;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mode;

#[async_trait]
impl CommandHandler for Mode {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        match &args.parsed_command {
            Command::Mode { mode: ModeParam::Stream } => Ok(Reply::new(ReplyCode::CommandOkay, "Mode set to Stream")),
            Command::Mode { .. } => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only Stream mode is supported")),
            _ => Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        }
    }
}
