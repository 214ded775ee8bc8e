//! The RFC 959 Delete (`DELE`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Dele;

#[async_trait]
impl CommandHandler for Dele {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Dele { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&path))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.del(&resolved).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "File successfully removed")),
            Err(err) => {
                slog::debug!(args.logger, "DELE failed: {}", err);
                Ok(Reply::new(ReplyCode::TransientFileError, "Failed to delete the file"))
            }
        }
    }
}
