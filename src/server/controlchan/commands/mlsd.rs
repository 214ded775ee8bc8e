//! The RFC 3659 Machine-Readable Listing (`MLSD`) command

use super::retr::start_transfer;
use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mlsd;

#[async_trait]
impl CommandHandler for Mlsd {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Mlsd { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };
        Ok(start_transfer(&args, DataChanCmd::Mlsd { path }).await)
    }
}
