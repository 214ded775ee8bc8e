//! The RFC 2389 Options (`OPTS`) command

use crate::server::controlchan::command::Opt;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Opts;

#[async_trait]
impl CommandHandler for Opts {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        match &args.parsed_command {
            // Paths are UTF-8 regardless; the toggle only exists to keep
            // clients that insist on sending it happy.
            Command::Opts { option: Opt::Utf8 { on: true } } => Ok(Reply::new(ReplyCode::CommandOkay, "Always in UTF8 mode")),
            Command::Opts { option: Opt::Utf8 { on: false } } => Ok(Reply::new(ReplyCode::CommandOkay, "Always in UTF8 mode")),
            _ => Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        }
    }
}
