//! The RFC 959 Print Working Directory (`PWD`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Pwd;

#[async_trait]
impl CommandHandler for Pwd {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let session = args.session.lock().await;
        // Double quotes inside the path are doubled, per RFC 959 appendix II.
        let cwd = session.cwd.to_string_lossy().replace('"', "\"\"");
        Ok(Reply::new_with_string(ReplyCode::DirCreated, format!("\"{}\"", cwd)))
    }
}
