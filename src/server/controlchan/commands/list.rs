//! The RFC 959 List (`LIST`) command

use super::retr::start_transfer;
use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply};
use async_trait::async_trait;

#[derive(Debug)]
pub struct List;

#[async_trait]
impl CommandHandler for List {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            // Options like -la are accepted and ignored.
            Command::List { path, .. } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };
        Ok(start_transfer(&args, DataChanCmd::List { path }).await)
    }
}
