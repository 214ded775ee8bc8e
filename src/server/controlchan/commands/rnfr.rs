//! The RFC 959 Rename From (`RNFR`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rnfr;

#[async_trait]
impl CommandHandler for Rnfr {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let file = match &args.parsed_command {
            Command::Rnfr { file } => file.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let mut session = args.session.lock().await;
        let resolved = session.resolve(&file);
        session.rename_from = Some(resolved);
        Ok(Reply::new(ReplyCode::FileActionPending, "Tell me, what would you like the new name to be?"))
    }
}
