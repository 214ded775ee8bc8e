//! The authenticator backed by the local user/group database.

use super::db::{StoredCredentials, UserDb};
use super::{AuthenticatedUser, AuthenticationError, AuthenticationErrorKind, Authenticator, Credentials};
use crate::server::ratelimit::{Bucket, Buckets};
use async_trait::async_trait;
use slog::Logger;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct FileBasedAuthenticator {
    db: RwLock<UserDb>,
    logger: Logger,
}

impl FileBasedAuthenticator {
    pub fn new(db: UserDb, logger: Logger) -> Arc<FileBasedAuthenticator> {
        Arc::new(FileBasedAuthenticator {
            db: RwLock::new(db),
            logger,
        })
    }

    /// Load the database from a JSON file written by the archiver.
    pub async fn from_file<P: AsRef<Path>>(path: P, logger: Logger) -> std::io::Result<Arc<FileBasedAuthenticator>> {
        let text = tokio::fs::read_to_string(path).await?;
        let db: UserDb = serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(db, logger))
    }

    /// Snapshot of the current database, for the admin plane.
    pub async fn db(&self) -> UserDb {
        self.db.read().await.clone()
    }

    /// Replace the database after validation. Only the admin `set_groups_and_users`
    /// path mutates users and groups.
    pub async fn replace_db(&self, incoming: UserDb) -> Result<(), super::db::UserDbError> {
        {
            let current = self.db.read().await;
            current.validate_replacement(&incoming)?;
        }
        *self.db.write().await = incoming;
        slog::info!(self.logger, "User database replaced");
        Ok(())
    }
}

#[async_trait]
impl Authenticator for FileBasedAuthenticator {
    async fn authenticate(&self, username: &str, creds: &Credentials) -> Result<AuthenticatedUser, AuthenticationError> {
        let db = self.db.read().await;

        let Some(user) = db.find_user(username) else {
            slog::debug!(self.logger, "Login attempt for unknown user"; "user" => username);
            return Err(AuthenticationError::bad_credentials());
        };

        if !user.enabled {
            return Err(AuthenticationError::new(AuthenticationErrorKind::Disabled));
        }

        let verified = match (&user.credentials, &creds.password) {
            (StoredCredentials::Impersonation { .. }, Some(_)) => {
                // The impersonator helper is the judge of system passwords;
                // here the account is only matched up. A server without an
                // impersonator cannot serve such accounts.
                return Err(AuthenticationError::new(AuthenticationErrorKind::ImpersonationUnavailable));
            }
            (_, Some(password)) => user.credentials.verify(password),
            (_, None) => false,
        };

        if !verified {
            slog::debug!(self.logger, "Password verification failed"; "user" => username);
            return Err(AuthenticationError::bad_credentials());
        }

        let vfs_root = db.effective_vfs_root(user).unwrap_or_else(|| PathBuf::from("/"));

        let mut inbound = vec![Bucket::new(user.speed_limits.upload)];
        let mut outbound = vec![Bucket::new(user.speed_limits.download)];
        for group_name in &user.groups {
            if let Some(group) = db.find_group(group_name) {
                inbound.push(Bucket::new(group.speed_limits.upload));
                outbound.push(Bucket::new(group.speed_limits.download));
            }
        }

        Ok(AuthenticatedUser {
            username: user.name.clone(),
            vfs_root,
            impersonation: user.impersonation.clone(),
            inbound_buckets: Buckets::new(inbound),
            outbound_buckets: Buckets::new(outbound),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::db::{SpeedLimits, User};
    use pretty_assertions::assert_eq;
    use slog::o;
    use std::net::IpAddr;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn creds(password: &str) -> Credentials {
        Credentials {
            password: Some(password.to_string()),
            source_ip: IpAddr::from([127, 0, 0, 1]),
        }
    }

    fn db_with_alice() -> UserDb {
        UserDb {
            users: vec![User {
                name: "alice".into(),
                enabled: true,
                groups: vec![],
                credentials: StoredCredentials::from_password("s3cret"),
                vfs_root: Some("/srv/ftp/alice".into()),
                impersonation: None,
                speed_limits: SpeedLimits::default(),
            }],
            groups: vec![],
        }
    }

    #[tokio::test]
    async fn valid_password_yields_user_with_root() {
        let auth = FileBasedAuthenticator::new(db_with_alice(), test_logger());
        let user = auth.authenticate("alice", &creds("s3cret")).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.vfs_root, PathBuf::from("/srv/ftp/alice"));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_identical() {
        let auth = FileBasedAuthenticator::new(db_with_alice(), test_logger());
        let e1 = auth.authenticate("alice", &creds("nope")).await.unwrap_err();
        let e2 = auth.authenticate("nobody", &creds("nope")).await.unwrap_err();
        assert_eq!(e1.kind(), e2.kind());
    }

    #[tokio::test]
    async fn disabled_account_is_refused() {
        let mut db = db_with_alice();
        db.users[0].enabled = false;
        let auth = FileBasedAuthenticator::new(db, test_logger());
        let err = auth.authenticate("alice", &creds("s3cret")).await.unwrap_err();
        assert_eq!(err.kind(), &AuthenticationErrorKind::Disabled);
    }
}
