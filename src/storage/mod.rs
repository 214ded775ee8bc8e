//! The virtual filesystem a session serves files through.
//!
//! Backends are object-safe so a session can swap between the plain local
//! filesystem and the impersonated one without generic plumbing. All paths
//! crossing this interface are absolute *virtual* paths ("/dir/file"); each
//! backend anchors them to its own root.

pub mod error;
pub mod fs;

pub use error::{Error, ErrorKind, Result};
pub use fs::Filesystem;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Metadata for one directory entry.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub len: u64,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub modified: Option<SystemTime>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl EntryMeta {
    pub fn modified_or_epoch(&self) -> SystemTime {
        self.modified.unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// One listed entry: its name within the listed directory plus metadata.
#[derive(Debug, Clone)]
pub struct Fileinfo {
    pub path: PathBuf,
    pub metadata: EntryMeta,
}

impl Fileinfo {
    fn file_name(&self) -> String {
        self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Render in `ls -l` form, the de-facto LIST output format.
    pub fn format_ls(&self) -> String {
        let meta = &self.metadata;
        let kind = if meta.is_dir {
            'd'
        } else if meta.is_symlink {
            'l'
        } else {
            '-'
        };
        let mut perms = String::with_capacity(9);
        for shift in [6u32, 3, 0] {
            let bits = (meta.mode >> shift) & 0o7;
            perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        let modified: DateTime<Local> = meta.modified_or_epoch().into();
        format!(
            "{}{} {:>3} {:>8} {:>8} {:>12} {} {}",
            kind,
            perms,
            1,
            meta.uid,
            meta.gid,
            meta.len,
            modified.format("%b %d %H:%M"),
            self.file_name()
        )
    }

    /// Render as RFC 3659 machine-readable facts (MLSD/MLST).
    pub fn format_mlsx(&self) -> String {
        let meta = &self.metadata;
        let kind = if meta.is_dir { "dir" } else { "file" };
        let modified: DateTime<chrono::Utc> = meta.modified_or_epoch().into();
        if meta.is_dir {
            format!("type={};modify={}; {}", kind, modified.format("%Y%m%d%H%M%S"), self.file_name())
        } else {
            format!("type={};size={};modify={}; {}", kind, meta.len, modified.format("%Y%m%d%H%M%S"), self.file_name())
        }
    }
}

/// The storage operations a session needs. Implementations must treat every
/// path as rooted at the backend's own root and must refuse traversal above
/// it.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    async fn metadata(&self, path: &Path) -> Result<EntryMeta>;

    async fn list(&self, path: &Path) -> Result<Vec<Fileinfo>>;

    async fn open_read(&self, path: &Path, start_pos: u64) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>>;

    /// Open for writing at `start_pos`; `append` positions at the end
    /// regardless of `start_pos`.
    async fn open_write(&self, path: &Path, start_pos: u64, append: bool) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>>;

    async fn del(&self, path: &Path) -> Result<()>;

    async fn mkd(&self, path: &Path) -> Result<()>;

    async fn rmd(&self, path: &Path) -> Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Verify `path` exists and is a directory a session may change into.
    async fn cwd(&self, path: &Path) -> Result<()>;

    async fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(len: u64, is_dir: bool, name: &str) -> Fileinfo {
        Fileinfo {
            path: PathBuf::from(name),
            metadata: EntryMeta {
                len,
                is_dir,
                is_file: !is_dir,
                is_symlink: false,
                modified: Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)),
                mode: 0o644,
                uid: 1000,
                gid: 1000,
            },
        }
    }

    #[test]
    fn ls_line_carries_kind_permissions_and_name() {
        let line = info(1234, false, "notes.txt").format_ls();
        assert!(line.starts_with("-rw-r--r--"), "line: {line}");
        assert!(line.ends_with("notes.txt"), "line: {line}");
        assert!(line.contains("1234"), "line: {line}");
    }

    #[test]
    fn mlsx_facts_for_a_file_include_size() {
        let line = info(42, false, "a.bin").format_mlsx();
        assert!(line.starts_with("type=file;size=42;modify="), "line: {line}");
        assert!(line.ends_with(" a.bin"), "line: {line}");
    }

    #[test]
    fn mlsx_facts_for_a_directory_omit_size() {
        let line = info(0, true, "sub").format_mlsx();
        assert!(line.starts_with("type=dir;modify="), "line: {line}");
        assert_eq!(line.contains("size="), false, "line: {line}");
    }
}
