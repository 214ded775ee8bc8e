//! The RFC 2228 Authentication/Security Data (`ADAT`) command.
//
// AUTH TLS carries no security data exchange, so there is never an ADAT
// conversation in progress to continue.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Adat;

#[async_trait]
impl CommandHandler for Adat {
    async fn handle(&self, _args: CommandContext) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::BadCommandSequence, "No security exchange in progress"))
    }
}
