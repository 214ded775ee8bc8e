//! The RFC 959 Abort (`ABOR`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Abor;

#[async_trait]
impl CommandHandler for Abor {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let (abort_tx, busy) = {
            let mut session = args.session.lock().await;
            (session.data_abort_tx.take(), session.data_busy)
        };
        match abort_tx {
            Some(tx) if busy => {
                // The data task answers with TransferAborted, which the loop
                // turns into 426 followed by this command's 226.
                let _ = tx.send(()).await;
                Ok(Reply::none())
            }
            _ => Ok(Reply::new(ReplyCode::ClosingDataConnection, "ABOR successful; no transfer in progress")),
        }
    }
}
