//! The RFC 959 Remove Directory (`RMD`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rmd;

#[async_trait]
impl CommandHandler for Rmd {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Rmd { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&path))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.rmd(&resolved).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Directory removed")),
            Err(err) => {
                slog::debug!(args.logger, "RMD failed: {}", err);
                Ok(Reply::new(ReplyCode::TransientFileError, "Failed to remove directory"))
            }
        }
    }
}
