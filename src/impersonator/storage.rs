//! A storage backend whose file operations execute in the impersonator
//! helper, under the user's OS identity. Only descriptors cross the process
//! boundary; the bytes themselves flow through regular file I/O on this side.

use super::client::ImpClient;
use super::messages::{ImpMessage, ImpResult, InfoReply, OpenMode};
use crate::storage::{EntryMeta, Error, ErrorKind, Fileinfo, Result, StorageBackend};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncSeekExt;

#[derive(Debug)]
pub struct ImpersonatedFilesystem {
    client: Arc<ImpClient>,
    root: PathBuf,
}

impl ImpersonatedFilesystem {
    pub fn new(client: Arc<ImpClient>, root: PathBuf) -> ImpersonatedFilesystem {
        ImpersonatedFilesystem { client, root }
    }

    fn real_path(&self, virtual_path: &Path) -> Result<PathBuf> {
        let mut real = self.root.clone();
        for component in virtual_path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => real.push(part),
                Component::ParentDir => {
                    if !real.pop() || !real.starts_with(&self.root) {
                        return Err(Error::new(ErrorKind::PermissionDenied));
                    }
                }
                Component::Prefix(_) => return Err(Error::new(ErrorKind::FileNameNotAllowed)),
            }
        }
        if !real.starts_with(&self.root) {
            return Err(Error::new(ErrorKind::PermissionDenied));
        }
        Ok(real)
    }

    async fn info(&self, real: PathBuf, follow_links: bool) -> Result<InfoReply> {
        let (response, _) = self
            .client
            .call(ImpMessage::Info { path: real, follow_links })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::InfoResponse(info) => {
                map_result(info.result)?;
                Ok(info)
            }
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }
}

fn map_result(result: ImpResult) -> Result<()> {
    if result.is_ok() {
        return Ok(());
    }
    let kind = match result.0 {
        2 => ErrorKind::PermanentFileNotAvailable, // ENOENT
        13 => ErrorKind::PermissionDenied,         // EACCES
        17 => ErrorKind::FileNameNotAllowed,       // EEXIST
        28 => ErrorKind::InsufficientStorage,      // ENOSPC
        _ => ErrorKind::LocalError,
    };
    Err(Error::new(kind))
}

fn meta_from_info(info: &InfoReply) -> EntryMeta {
    EntryMeta {
        len: info.size.max(0) as u64,
        is_dir: info.kind == 1,
        is_file: info.kind == 0,
        is_symlink: info.is_link,
        modified: (info.mtime_unix >= 0).then(|| UNIX_EPOCH + Duration::from_secs(info.mtime_unix as u64)),
        mode: info.mode,
        uid: 0,
        gid: 0,
    }
}

#[async_trait]
impl StorageBackend for ImpersonatedFilesystem {
    async fn metadata(&self, path: &Path) -> Result<EntryMeta> {
        let real = self.real_path(path)?;
        let info = self.info(real, true).await?;
        Ok(meta_from_info(&info))
    }

    async fn list(&self, path: &Path) -> Result<Vec<Fileinfo>> {
        let real = self.real_path(path)?;

        // The directory descriptor proves the identity may read it; the
        // entries are then enumerated through that same descriptor.
        let (response, fd) = self
            .client
            .call(ImpMessage::OpenDirectory { path: real.clone() })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::OpenResponse { result } => map_result(result)?,
            _ => return Err(Error::new(ErrorKind::LocalError)),
        }
        let fd = fd.ok_or_else(|| Error::new(ErrorKind::LocalError))?;

        let names: Vec<String> = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<String>, std::io::Error> {
            let mut dir = nix::dir::Dir::from_fd(fd).map_err(std::io::Error::from)?;
            let mut names = Vec::new();
            for entry in dir.iter() {
                let entry = entry.map_err(std::io::Error::from)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name != "." && name != ".." {
                    names.push(name);
                }
            }
            Ok(names)
        })
        .await
        .map_err(|e| Error::with_source(ErrorKind::LocalError, e))??;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let info = self.info(real.join(&name), false).await?;
            infos.push(Fileinfo {
                path: PathBuf::from(name),
                metadata: meta_from_info(&info),
            });
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn open_read(&self, path: &Path, start_pos: u64) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>> {
        let real = self.real_path(path)?;
        let (response, fd) = self
            .client
            .call(ImpMessage::OpenFile {
                path: real,
                mode: OpenMode::Read,
            })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::OpenResponse { result } => map_result(result)?,
            _ => return Err(Error::new(ErrorKind::LocalError)),
        }
        let fd = fd.ok_or_else(|| Error::new(ErrorKind::LocalError))?;
        let mut file = tokio::fs::File::from_std(std::fs::File::from(fd));
        if start_pos > 0 {
            file.seek(SeekFrom::Start(start_pos)).await.map_err(Error::from)?;
        }
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &Path, start_pos: u64, append: bool) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>> {
        let real = self.real_path(path)?;
        let mode = if append {
            OpenMode::Append
        } else {
            OpenMode::Write {
                create: true,
                truncate: start_pos == 0,
            }
        };
        let (response, fd) = self
            .client
            .call(ImpMessage::OpenFile { path: real, mode })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::OpenResponse { result } => map_result(result)?,
            _ => return Err(Error::new(ErrorKind::LocalError)),
        }
        let fd = fd.ok_or_else(|| Error::new(ErrorKind::LocalError))?;
        let mut file = tokio::fs::File::from_std(std::fs::File::from(fd));
        if !append && start_pos > 0 {
            file.seek(SeekFrom::Start(start_pos)).await.map_err(Error::from)?;
        }
        Ok(Box::new(file))
    }

    async fn del(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        let (response, _) = self
            .client
            .call(ImpMessage::RemoveFile { path: real })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::RemoveResponse { result } => map_result(result),
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }

    async fn mkd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        let (response, _) = self
            .client
            .call(ImpMessage::Mkdir {
                path: real,
                recurse: false,
                permissions: 0o755,
            })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::MkdirResponse { result } => map_result(result),
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }

    async fn rmd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        let (response, _) = self
            .client
            .call(ImpMessage::RemoveDirectory { path: real })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::RemoveResponse { result } => map_result(result),
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.real_path(from)?;
        let to = self.real_path(to)?;
        let (response, _) = self
            .client
            .call(ImpMessage::Rename { from, to })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::RenameResponse { result } => map_result(result),
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }

    async fn cwd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        let info = self.info(real, true).await?;
        if info.kind == 1 { Ok(()) } else { Err(Error::new(ErrorKind::PermanentFileNotAvailable)) }
    }

    async fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<()> {
        let real = self.real_path(path)?;
        let mtime_unix = mtime.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        let (response, _) = self
            .client
            .call(ImpMessage::SetMtime { path: real, mtime_unix })
            .await
            .map_err(|e| Error::with_source(ErrorKind::LocalError, e))?;
        match response {
            ImpMessage::SetMtimeResponse { result } => map_result(result),
            _ => Err(Error::new(ErrorKind::LocalError)),
        }
    }
}
