//! The RFC 959 System (`SYST`) command
//
// Used to find out the operating system of the server; clients mostly use
// the answer to decide how to parse LIST output.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Syst;

#[async_trait]
impl CommandHandler for Syst {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::SystemType, "UNIX Type: L8"))
    }
}
