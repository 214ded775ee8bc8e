//! The RFC 2228 Protection Buffer Size (`PBSZ`) command.
//
// For TLS the only meaningful value is 0; anything the client sends is
// normalized to that.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pbsz;

#[async_trait]
impl CommandHandler for Pbsz {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkay, "PBSZ=0"))
    }
}
