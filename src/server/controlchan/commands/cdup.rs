//! The RFC 959 Change To Parent Directory (`CDUP`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Cdup;

#[async_trait]
impl CommandHandler for Cdup {
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let mut session = args.session.lock().await;
        session.cwd.pop();
        if session.cwd.as_os_str().is_empty() {
            session.cwd = "/".into();
        }
        Ok(Reply::new(ReplyCode::FileActionOkay, "Directory changed"))
    }
}
