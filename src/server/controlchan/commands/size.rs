//! The RFC 3659 File Size (`SIZE`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Size;

#[async_trait]
impl CommandHandler for Size {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let file = match &args.parsed_command {
            Command::Size { file } => file.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&file))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.metadata(&resolved).await {
            Ok(meta) if meta.is_file => Ok(Reply::new_with_string(ReplyCode::FileStatus, meta.len.to_string())),
            Ok(_) => Ok(Reply::new(ReplyCode::FileError, "Not a regular file")),
            Err(err) => {
                slog::debug!(args.logger, "SIZE failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Could not get file size"))
            }
        }
    }
}
