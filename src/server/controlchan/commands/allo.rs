//! The RFC 959 Allocate (`ALLO`) command
//
// Storage is not preallocated, so this is a pleasantry.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Allo;

#[async_trait]
impl CommandHandler for Allo {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkayNotImplemented, "ALLO is obsolete"))
    }
}
