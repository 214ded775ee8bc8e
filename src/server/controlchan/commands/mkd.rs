//! The RFC 959 Make Directory (`MKD`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mkd;

#[async_trait]
impl CommandHandler for Mkd {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Mkd { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&path))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.mkd(&resolved).await {
            Ok(()) => Ok(Reply::new_with_string(ReplyCode::DirCreated, format!("\"{}\"", resolved.to_string_lossy().replace('"', "\"\"")))),
            Err(err) => {
                slog::debug!(args.logger, "MKD failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Failed to create directory"))
            }
        }
    }
}
