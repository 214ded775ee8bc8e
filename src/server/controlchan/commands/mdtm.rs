//! The RFC 3659 Modification Time (`MDTM`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub struct Mdtm;

#[async_trait]
impl CommandHandler for Mdtm {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let file = match &args.parsed_command {
            Command::Mdtm { file } => file.clone(),
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
            Ok(meta) => {
                let modified: DateTime<Utc> = meta.modified_or_epoch().into();
                Ok(Reply::new_with_string(ReplyCode::FileStatus, modified.format("%Y%m%d%H%M%S").to_string()))
            }
            Err(err) => {
                slog::debug!(args.logger, "MDTM failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Could not get modification time"))
            }
        }
    }
}
