//! The RFC 959 Logout (`QUIT`) command
//
// This command terminates a USER and if file transfer is not
// in progress, the server closes the control connection.

use crate::server::chancomms::ControlChanMsg;
use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::Reply;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        // The loop replies 221 and tears the session down; replying here too
        // would double up.
        let _ = args.tx_control_chan.send(ControlChanMsg::Quit).await;
        Ok(Reply::none())
    }
}
