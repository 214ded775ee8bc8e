//! Spawning the impersonator helper process and the helper's own serving
//! loop.
//!
//! Parent and child share one socketpair; the child's end becomes its stdin.
//! A helper started by a privileged server drops to the target identity
//! before it answers the first request.

use super::channel::ImpChannel;
use super::messages::{ImpMessage, ImpResult, InfoReply, OpenMode};
use super::{ImpError, ImpErrorKind};
use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;

/// Spawn the helper and return the parent's end of the channel.
pub fn spawn_helper(helper_exe: &Path, identity: &str) -> Result<ImpChannel, ImpError> {
    let (parent_end, child_end) = std::os::unix::net::UnixStream::pair().map_err(ImpError::from)?;

    let child_fd: OwnedFd = child_end.into();
    let mut command = tokio::process::Command::new(helper_exe);
    command.arg("--impersonator-helper").arg(identity).stdin(Stdio::from(child_fd)).stdout(Stdio::null());
    command.spawn().map_err(ImpError::from)?;

    ImpChannel::from_std(parent_end).map_err(ImpError::from)
}

/// Entry point of the helper process: adopt the target identity, then serve
/// requests from the socket on stdin until it closes.
pub async fn run_helper(identity: &str) -> Result<(), ImpError> {
    drop_to_identity(identity)?;

    let stdin = std::io::stdin();
    let fd = std::os::fd::AsFd::as_fd(&stdin).try_clone_to_owned().map_err(ImpError::from)?;
    let stream = std::os::unix::net::UnixStream::from(fd);
    let mut channel = ImpChannel::from_std(stream)?;

    while let Some((request, _fd)) = channel.recv().await? {
        let (response, fd) = execute(request).await;
        let borrowed = fd.as_ref().map(std::os::fd::AsFd::as_fd);
        channel.send(&response, borrowed).await?;
    }
    Ok(())
}

fn drop_to_identity(identity: &str) -> Result<(), ImpError> {
    use nix::unistd::{Uid, User, setgid, setuid};

    if !Uid::effective().is_root() {
        // Not privileged; serve as whoever we already are. Useful for tests
        // and single-user setups.
        return Ok(());
    }

    let user = User::from_name(identity)
        .map_err(|e| ImpError::new(ImpErrorKind::Io(e.to_string())))?
        .ok_or_else(|| ImpError::new(ImpErrorKind::Io(format!("unknown user {identity}"))))?;
    setgid(user.gid).map_err(|e| ImpError::new(ImpErrorKind::Io(e.to_string())))?;
    setuid(user.uid).map_err(|e| ImpError::new(ImpErrorKind::Io(e.to_string())))?;
    Ok(())
}

async fn execute(request: ImpMessage) -> (ImpMessage, Option<OwnedFd>) {
    match request {
        ImpMessage::OpenFile { path, mode } => {
            let mut options = std::fs::OpenOptions::new();
            match mode {
                OpenMode::Read => {
                    options.read(true);
                }
                OpenMode::Write { create, truncate } => {
                    options.write(true).create(create).truncate(truncate);
                }
                OpenMode::Append => {
                    options.append(true).create(true);
                }
            }
            match options.open(&path) {
                Ok(file) => (ImpMessage::OpenResponse { result: ImpResult::OK }, Some(file.into())),
                Err(err) => (
                    ImpMessage::OpenResponse {
                        result: ImpResult::from_io(&err),
                    },
                    None,
                ),
            }
        }
        ImpMessage::OpenDirectory { path } => match std::fs::File::open(&path) {
            Ok(file) => (ImpMessage::OpenResponse { result: ImpResult::OK }, Some(file.into())),
            Err(err) => (
                ImpMessage::OpenResponse {
                    result: ImpResult::from_io(&err),
                },
                None,
            ),
        },
        ImpMessage::Rename { from, to } => {
            let result = match std::fs::rename(&from, &to) {
                Ok(()) => ImpResult::OK,
                Err(err) => ImpResult::from_io(&err),
            };
            (ImpMessage::RenameResponse { result }, None)
        }
        ImpMessage::RemoveFile { path } => {
            let result = match std::fs::remove_file(&path) {
                Ok(()) => ImpResult::OK,
                Err(err) => ImpResult::from_io(&err),
            };
            (ImpMessage::RemoveResponse { result }, None)
        }
        ImpMessage::RemoveDirectory { path } => {
            let result = match std::fs::remove_dir(&path) {
                Ok(()) => ImpResult::OK,
                Err(err) => ImpResult::from_io(&err),
            };
            (ImpMessage::RemoveResponse { result }, None)
        }
        ImpMessage::Info { path, follow_links } => {
            let lookup = if follow_links { std::fs::metadata(&path) } else { std::fs::symlink_metadata(&path) };
            match lookup {
                Ok(meta) => {
                    use std::os::unix::fs::{MetadataExt, PermissionsExt};
                    let kind = if meta.is_dir() {
                        1
                    } else if meta.is_file() {
                        0
                    } else {
                        2
                    };
                    (
                        ImpMessage::InfoResponse(InfoReply {
                            result: ImpResult::OK,
                            is_link: meta.file_type().is_symlink(),
                            kind,
                            size: meta.len() as i64,
                            mtime_unix: meta.mtime(),
                            mode: meta.permissions().mode() & 0o7777,
                        }),
                        None,
                    )
                }
                Err(err) => {
                    let mut reply = InfoReply::not_available();
                    reply.result = ImpResult::from_io(&err);
                    (ImpMessage::InfoResponse(reply), None)
                }
            }
        }
        ImpMessage::Mkdir { path, recurse, permissions } => {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(recurse).mode(permissions);
            let result = match builder.create(&path) {
                Ok(()) => ImpResult::OK,
                Err(err) => ImpResult::from_io(&err),
            };
            (ImpMessage::MkdirResponse { result }, None)
        }
        ImpMessage::SetMtime { path, mtime_unix } => {
            let result = set_mtime(&path, mtime_unix);
            (ImpMessage::SetMtimeResponse { result }, None)
        }
        other => (
            ImpMessage::Exception {
                description: format!("not a request: index {}", other.index()),
            },
            None,
        ),
    }
}

fn set_mtime(path: &Path, mtime_unix: i64) -> ImpResult {
    let mtime = if mtime_unix >= 0 {
        std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(mtime_unix as u64)
    } else {
        return ImpResult::OTHER;
    };
    match std::fs::File::options().write(true).open(path).and_then(|f| f.set_modified(mtime)) {
        Ok(()) => ImpResult::OK,
        Err(err) => ImpResult::from_io(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn helper_executes_basic_requests() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, "twelve bytes").unwrap();

        let (response, fd) = execute(ImpMessage::OpenFile {
            path: file_path.clone(),
            mode: OpenMode::Read,
        })
        .await;
        assert_eq!(response, ImpMessage::OpenResponse { result: ImpResult::OK });
        assert!(fd.is_some());

        let (response, _) = execute(ImpMessage::Info {
            path: file_path.clone(),
            follow_links: true,
        })
        .await;
        match response {
            ImpMessage::InfoResponse(info) => {
                assert!(info.result.is_ok());
                assert_eq!(info.kind, 0);
                assert_eq!(info.size, 12);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        let (response, _) = execute(ImpMessage::RemoveFile { path: file_path.clone() }).await;
        assert_eq!(response, ImpMessage::RemoveResponse { result: ImpResult::OK });
        assert!(!file_path.exists());
    }

    #[tokio::test]
    async fn open_missing_file_reports_errno() {
        let (response, fd) = execute(ImpMessage::OpenFile {
            path: "/definitely/not/here".into(),
            mode: OpenMode::Read,
        })
        .await;
        assert!(fd.is_none());
        match response {
            ImpMessage::OpenResponse { result } => assert!(!result.is_ok()),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
