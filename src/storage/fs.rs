//! The plain local-filesystem backend.

use super::{EntryMeta, Error, ErrorKind, Fileinfo, Result, StorageBackend};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncSeekExt;

/// Serves a directory tree rooted at `root`. Virtual paths are resolved
/// lexically below the root; `..` components that would escape are refused.
#[derive(Debug)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Filesystem {
        Filesystem { root: root.into() }
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
}

fn meta_from_std(meta: &std::fs::Metadata) -> EntryMeta {
    EntryMeta {
        len: meta.len(),
        is_dir: meta.is_dir(),
        is_file: meta.is_file(),
        is_symlink: meta.file_type().is_symlink(),
        modified: meta.modified().ok(),
        mode: meta.permissions().mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
    }
}

#[async_trait]
impl StorageBackend for Filesystem {
    async fn metadata(&self, path: &Path) -> Result<EntryMeta> {
        let real = self.real_path(path)?;
        let meta = tokio::fs::metadata(real).await?;
        Ok(meta_from_std(&meta))
    }

    async fn list(&self, path: &Path) -> Result<Vec<Fileinfo>> {
        let real = self.real_path(path)?;
        let mut entries = tokio::fs::read_dir(real).await?;
        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            infos.push(Fileinfo {
                path: PathBuf::from(entry.file_name()),
                metadata: meta_from_std(&meta),
            });
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn open_read(&self, path: &Path, start_pos: u64) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>> {
        let real = self.real_path(path)?;
        let mut file = tokio::fs::File::open(real).await?;
        if start_pos > 0 {
            file.seek(SeekFrom::Start(start_pos)).await?;
        }
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &Path, start_pos: u64, append: bool) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>> {
        let real = self.real_path(path)?;
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else if start_pos == 0 {
            options.truncate(true);
        }
        let mut file = options.open(real).await?;
        if !append && start_pos > 0 {
            file.set_len(start_pos).await.ok();
            file.seek(SeekFrom::Start(start_pos)).await?;
        }
        Ok(Box::new(file))
    }

    async fn del(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        tokio::fs::remove_file(real).await?;
        Ok(())
    }

    async fn mkd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        tokio::fs::create_dir(real).await?;
        Ok(())
    }

    async fn rmd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        tokio::fs::remove_dir(real).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = self.real_path(from)?;
        let to = self.real_path(to)?;
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn cwd(&self, path: &Path) -> Result<()> {
        let real = self.real_path(path)?;
        let meta = tokio::fs::metadata(real).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::PermanentFileNotAvailable))
        }
    }

    async fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<()> {
        let real = self.real_path(path)?;
        let file = std::fs::File::options().write(true).open(real)?;
        file.set_modified(mtime)?;
        file.sync_all().ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn backend() -> (tempfile::TempDir, Filesystem) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Filesystem::new(dir.path());
        (dir, fs)
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (_dir, fs) = backend().await;
        {
            let mut w = fs.open_write(Path::new("/hello.txt"), 0, false).await.unwrap();
            w.write_all(b"hello world").await.unwrap();
            w.flush().await.unwrap();
        }
        let mut r = fs.open_read(Path::new("/hello.txt"), 6).await.unwrap();
        let mut out = String::new();
        r.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "world");
    }

    #[tokio::test]
    async fn traversal_above_the_root_is_refused() {
        let (_dir, fs) = backend().await;
        let err = fs.metadata(Path::new("/../../etc/passwd")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn zero_byte_file_reports_zero_size() {
        let (_dir, fs) = backend().await;
        {
            let mut w = fs.open_write(Path::new("/empty"), 0, false).await.unwrap();
            w.flush().await.unwrap();
        }
        let meta = fs.metadata(Path::new("/empty")).await.unwrap();
        assert_eq!(meta.len, 0);
    }

    #[tokio::test]
    async fn list_returns_sorted_names() {
        let (_dir, fs) = backend().await;
        for name in ["/b.txt", "/a.txt", "/c.txt"] {
            let mut w = fs.open_write(Path::new(name), 0, false).await.unwrap();
            w.write_all(b"x").await.unwrap();
            w.flush().await.unwrap();
        }
        let names: Vec<String> = fs.list(Path::new("/")).await.unwrap().iter().map(|i| i.path.to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn mkd_rmd_and_rename() {
        let (_dir, fs) = backend().await;
        fs.mkd(Path::new("/sub")).await.unwrap();
        fs.cwd(Path::new("/sub")).await.unwrap();
        fs.rename(Path::new("/sub"), Path::new("/moved")).await.unwrap();
        fs.rmd(Path::new("/moved")).await.unwrap();
        assert!(fs.cwd(Path::new("/moved")).await.is_err());
    }
}
