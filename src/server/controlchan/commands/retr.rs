//! The RFC 959 Retrieve (`RETR`) command

use crate::server::chancomms::DataChanCmd;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Retr;

/// Hand a transfer command to the data side and announce the transfer. The
/// sender is consumed: one data connection carries one transfer.
pub async fn start_transfer(args: &CommandContext, cmd: DataChanCmd) -> Reply {
    let tx = {
        let mut session = args.session.lock().await;
        session.data_cmd_tx.take()
    };
    match tx {
        Some(tx) => {
            if tx.send(cmd).await.is_err() {
                return Reply::new(ReplyCode::CantOpenDataConnection, "No data connection established");
            }
            Reply::new(ReplyCode::FileStatusOkay, "Opening data connection")
        }
        None => Reply::new(ReplyCode::CantOpenDataConnection, "Use PORT or PASV first"),
    }
}

#[async_trait]
impl CommandHandler for Retr {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Retr { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };
        Ok(start_transfer(&args, DataChanCmd::Retr { path }).await)
    }
}
