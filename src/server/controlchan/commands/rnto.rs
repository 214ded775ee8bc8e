//! The RFC 959 Rename To (`RNTO`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Rnto;

#[async_trait]
impl CommandHandler for Rnto {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let file = match &args.parsed_command {
            Command::Rnto { file } => file.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, from, to) = {
            let mut session = args.session.lock().await;
            let to = session.resolve(&file);
            (session.storage.clone(), session.rename_from.take(), to)
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };
        let Some(from) = from else {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Please tell me what file you want to rename first"));
        };

        match storage.rename(&from, &to).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Renamed")),
            Err(err) => {
                slog::debug!(args.logger, "RNTO failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Failed to rename"))
            }
        }
    }
}
