//! The archiver façade: versioned load/save of configuration documents.
//!
//! Every persisted document carries a flavour tag and a version integer. On a
//! mismatch the archiver either refuses, rewrites after making numbered
//! backups, or ignores the mismatch, as configured. The concrete storage
//! encoding behind the façade is JSON; richer encoders plug in behind the
//! same envelope.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use slog::Logger;
use std::path::{Path, PathBuf};

/// The flavour tag all documents written by this server carry.
pub const FLAVOUR: &str = "ironftpd";

/// Bumped whenever any persisted document shape changes.
pub const CONFIG_VERSION: u32 = 1;

/// What to do when a document's version does not match ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionCheck {
    /// Refuse to load; the caller should treat this as a startup error.
    #[default]
    Error,
    /// Load anyway.
    Ignore,
    /// Make a `.bak.N` backup, then load and let the next save rewrite.
    Backup,
}

impl std::str::FromStr for VersionCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(VersionCheck::Error),
            "ignore" => Ok(VersionCheck::Ignore),
            "backup" => Ok(VersionCheck::Backup),
            other => Err(format!("unknown version check mode: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a valid configuration document: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} has flavour {found}, expected {expected}")]
    WrongFlavour { path: PathBuf, found: String, expected: String },
    #[error("{path} has version {found}, expected {expected}")]
    WrongVersion { path: PathBuf, found: u32, expected: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    flavour: String,
    version: u32,
    body: T,
}

/// Loads and saves versioned configuration documents under one directory.
#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    version_check: VersionCheck,
    logger: Logger,
}

impl Archiver {
    pub fn new<P: Into<PathBuf>>(dir: P, version_check: VersionCheck, logger: Logger) -> Archiver {
        Archiver {
            dir: dir.into(),
            version_check,
            logger,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load `name`, or produce the default when the file does not exist yet.
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, ArchiverError> {
        let path = self.path_of(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(ArchiverError::Io { path, source: err }),
        };

        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|source| ArchiverError::Malformed {
            path: path.clone(),
            source,
        })?;

        if envelope.flavour != FLAVOUR {
            return Err(ArchiverError::WrongFlavour {
                path,
                found: envelope.flavour,
                expected: FLAVOUR.to_string(),
            });
        }

        if envelope.version != CONFIG_VERSION {
            match self.version_check {
                VersionCheck::Error => {
                    return Err(ArchiverError::WrongVersion {
                        path,
                        found: envelope.version,
                        expected: CONFIG_VERSION,
                    });
                }
                VersionCheck::Ignore => {
                    slog::warn!(self.logger, "Ignoring version mismatch"; "file" => name, "found" => envelope.version);
                }
                VersionCheck::Backup => {
                    self.backup(&path)?;
                }
            }
        }

        Ok(envelope.body)
    }

    /// Save `value` under `name` with the current flavour and version.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ArchiverError> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArchiverError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let envelope = Envelope {
            flavour: FLAVOUR.to_string(),
            version: CONFIG_VERSION,
            body: value,
        };
        let text = serde_json::to_string_pretty(&envelope).map_err(|source| ArchiverError::Malformed {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| ArchiverError::Io { path, source })?;
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<(), ArchiverError> {
        for n in 1u32.. {
            let candidate = path.with_extension(format!("bak.{n}"));
            if !candidate.exists() {
                std::fs::copy(path, &candidate).map_err(|source| ArchiverError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                slog::warn!(self.logger, "Backed up mismatching configuration"; "file" => %path.display(), "backup" => %candidate.display());
                return Ok(());
            }
        }
        unreachable!("u32 backup counter exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;
    use pretty_assertions::assert_eq;
    use slog::o;

    fn archiver(dir: &Path, check: VersionCheck) -> Archiver {
        Archiver::new(dir, check, Logger::root(slog::Discard, o!()))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver(dir.path(), VersionCheck::Error);

        let mut settings = Settings::default();
        settings.ftp.welcome_message = "hi".into();
        archiver.save("settings.json", &settings).unwrap();

        let loaded: Settings = archiver.load("settings.json").unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_yields_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = archiver(dir.path(), VersionCheck::Error);
        let loaded: Settings = archiver.load("settings.json").unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn version_mismatch_behaviors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let doc = serde_json::json!({
            "flavour": FLAVOUR,
            "version": CONFIG_VERSION + 1,
            "body": Settings::default(),
        });
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let strict = archiver(dir.path(), VersionCheck::Error);
        assert!(matches!(strict.load::<Settings>("settings.json"), Err(ArchiverError::WrongVersion { .. })));

        let lenient = archiver(dir.path(), VersionCheck::Ignore);
        assert!(lenient.load::<Settings>("settings.json").is_ok());

        let backing = archiver(dir.path(), VersionCheck::Backup);
        assert!(backing.load::<Settings>("settings.json").is_ok());
        assert!(path.with_extension("bak.1").exists());
    }

    #[test]
    fn wrong_flavour_is_always_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let doc = serde_json::json!({
            "flavour": "somethingelse",
            "version": CONFIG_VERSION,
            "body": Settings::default(),
        });
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let lenient = archiver(dir.path(), VersionCheck::Ignore);
        assert!(matches!(lenient.load::<Settings>("settings.json"), Err(ArchiverError::WrongFlavour { .. })));
    }
}
