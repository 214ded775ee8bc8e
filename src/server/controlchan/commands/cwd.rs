//! The RFC 959 Change Working Directory (`CWD`) command

use crate::server::controlchan::error::ControlChanError;
use crate::server::controlchan::handler::{CommandContext, CommandHandler};
use crate::server::controlchan::{Command, Reply, ReplyCode};
use async_trait::async_trait;
use std::path::{Component, PathBuf};

#[derive(Debug)]
pub struct Cwd;

/// Normalize a virtual path lexically: resolve `.` and `..` without touching
/// the filesystem, never climbing above `/`.
pub fn normalize_virtual(path: &std::path::Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {}
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[async_trait]
impl CommandHandler for Cwd {
    #[tracing_attributes::instrument]
    async fn handle(&self, args: CommandContext) -> Result<Reply, ControlChanError> {
        let path = match &args.parsed_command {
            Command::Cwd { path } => path.clone(),
            _ => return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into()),
        };

        let (storage, target) = {
            let session = args.session.lock().await;
            let target = normalize_virtual(&session.resolve(&path));
            (session.storage.clone(), target)
        };
        let Some(storage) = storage else {
            return Err(crate::server::controlchan::ControlChanErrorKind::IllegalState.into());
        };

        match storage.cwd(&target).await {
            Ok(()) => {
                let mut session = args.session.lock().await;
                session.cwd = target;
                Ok(Reply::new(ReplyCode::FileActionOkay, "Directory changed"))
            }
            Err(err) => {
                slog::debug!(args.logger, "CWD failed: {}", err);
                Ok(Reply::new(ReplyCode::FileError, "Failed to change directory"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn normalization_is_lexical_and_rooted() {
        assert_eq!(normalize_virtual(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_virtual(Path::new("/../..")), PathBuf::from("/"));
        assert_eq!(normalize_virtual(Path::new("/a/./b")), PathBuf::from("/a/b"));
    }
}
