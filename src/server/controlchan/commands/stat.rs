//! The RFC 959 Status (`STAT`) command
//
// Without an argument it reports session status over the control
// connection; with a path it behaves like LIST but sends the listing over
// the control connection instead of a data connection.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;

#[derive(Debug)]
pub struct Stat;

#[async_trait]
impl CommandHandler for Stat {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Stat { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        match path {
            None => {
                let session = args.session.lock().await;
                let lines = vec![
                    "Server status:".to_string(),
                    format!("Connected from {}", session.source),
                    format!("Logged in as {}", session.username.as_deref().unwrap_or("-")),
                    "END".to_string(),
                ];
                Ok(Reply::new_multiline(ReplyCode::SystemStatus, lines))
            }
            Some(path) => {
                let (storage, resolved) = {
                    let session = args.session.lock().await;
                    (session.storage.clone(), session.resolve(&path))
                };
                let Some(storage) = storage else {
                    return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
                };
                match storage.list(&resolved).await {
                    Ok(entries) => {
                        let mut lines = vec![format!("Status of {}:", path)];
                        lines.extend(entries.iter().map(|e| e.format_ls()));
                        lines.push("END".to_string());
                        Ok(Reply::new_multiline(ReplyCode::DirectoryStatus, lines))
                    }
                    Err(err) => {
                        slog::debug!(args.logger, "STAT listing failed: {}", err);
                        Ok(Reply::new(ReplyCode::FileError, "Could not list"))
                    }
                }
            }
        }
    }
}
