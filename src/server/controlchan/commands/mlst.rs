//! The RFC 3659 Machine-Readable Status (`MLST`) command
//
// Unlike MLSD, the facts travel over the control connection.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use crate::storage::Fileinfo;
use async_trait::async_trait;

#[derive(Debug)]
pub struct Mlst;

#[async_trait]
impl CommandHandler for Mlst {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Mlst { path } => path.clone().unwrap_or_default(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&path))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.metadata(&resolved).await {
            Ok(metadata) => {
                let info = Fileinfo {
                    path: resolved.clone(),
                    metadata,
                };
                // The facts line must carry exactly one leading space; the
                // multi-line encoder supplies it.
                let lines = vec!["Listing:".to_string(), info.format_mlsx(), "END".to_string()];
                Ok(Reply::new_multiline(ReplyCode::FileActionOkay, lines))
            }
            Err(err) => {
                slog::debug!(args.logger, "MLST failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "File or directory not found"))
            }
        }
    }
}
