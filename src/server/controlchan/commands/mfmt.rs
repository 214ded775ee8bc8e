//! The `MFMT` command (Modify Fact: Modification Time), as commonly
//! implemented after draft-somers-ftp-mfxx.

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use std::time::SystemTime;

#[derive(Debug)]
pub struct Mfmt;

fn parse_mtime(stamp: &str) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;
    let utc = Utc.from_utc_datetime(&naive);
    Some(SystemTime::from(utc))
}

#[async_trait]
impl CommandHandler for Mfmt {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let (stamp, file) = match &args.parsed_command {
            Command::Mfmt { mtime, file } => (mtime.clone(), file.clone()),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let Some(mtime) = parse_mtime(&stamp) else {
            return Ok(Reply::new(ReplyCode::ParameterSyntaxError, "Invalid time value"));
        };

        let (storage, resolved) = {
            let session = args.session.lock().await;
            (session.storage.clone(), session.resolve(&file))
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.set_mtime(&resolved, mtime).await {
            Ok(()) => Ok(Reply::new_with_string(
                ReplyCode::FileStatus,
                format!("Modify={}; {}", stamp, resolved.to_string_lossy()),
            )),
            Err(err) => {
                slog::debug!(args.logger, "MFMT failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Could not set modification time"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_parse_and_garbage_does_not() {
        assert!(parse_mtime("20240131120000").is_some());
        assert!(parse_mtime("20241332120000").is_none());
        assert!(parse_mtime("not-a-time").is_none());
    }
}
