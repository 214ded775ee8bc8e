//! The RFC 3659 Restart of Interrupted Transfer (`REST`) command
//
// To avoid having to resend the entire file if the file is only
// partially transferred, both sides need some way to agree on where in
// the data stream to restart the data transfer.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rest;

#[async_trait]
impl CommandHandler for Rest {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let offset = match &args.parsed_command {
            Command::Rest { offset } => *offset,
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };
        let mut session = args.session.lock().await;
        session.start_pos = offset;
        Ok(Reply::new_with_string(
            ReplyCode::FileActionPending,
            format!("Restarting at {}. Now send STORE or RETRIEVE", offset),
        ))
    }
}
