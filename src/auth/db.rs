//! The user and group records the server authenticates against, plus the
//! serde shapes they persist as.

use super::password;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How an account proves itself, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum StoredCredentials {
    /// No credentials: the account cannot log in with a password at all.
    None,
    Pbkdf2Sha256 {
        #[serde(with = "base64_bytes")]
        salt: Vec<u8>,
        #[serde(with = "base64_bytes")]
        key: Vec<u8>,
        iterations: u32,
    },
    /// Verified for migrated databases; never created anew.
    LegacyMd5 {
        #[serde(with = "base64_bytes")]
        digest: Vec<u8>,
    },
    /// Verified for migrated databases; never created anew.
    LegacySaltedSha512 {
        #[serde(with = "base64_bytes")]
        salt: Vec<u8>,
        #[serde(with = "base64_bytes")]
        digest: Vec<u8>,
    },
    /// The system password of the impersonated OS account is the credential.
    /// `login_only` distinguishes a token that is good for the login exchange
    /// only from one kept for the lifetime of the session.
    Impersonation { login_only: bool },
}

impl StoredCredentials {
    pub fn from_password(cleartext: &str) -> StoredCredentials {
        let record = password::generate(cleartext, password::MIN_PBKDF2_ITERATIONS);
        StoredCredentials::Pbkdf2Sha256 {
            salt: record.salt,
            key: record.key,
            iterations: record.iterations,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StoredCredentials::LegacyMd5 { .. } | StoredCredentials::LegacySaltedSha512 { .. })
    }

    /// Verify a cleartext password against this record. `None` and
    /// `Impersonation` records never verify here; impersonation is checked
    /// against the OS by the impersonator.
    pub fn verify(&self, cleartext: &str) -> bool {
        match self {
            StoredCredentials::None => false,
            StoredCredentials::Pbkdf2Sha256 { salt, key, iterations } => password::verify_pbkdf2(cleartext, salt, key, *iterations),
            StoredCredentials::LegacyMd5 { digest } => password::verify_legacy_md5(cleartext, digest),
            StoredCredentials::LegacySaltedSha512 { salt, digest } => password::verify_legacy_salted_sha512(cleartext, salt, digest),
            StoredCredentials::Impersonation { .. } => false,
        }
    }
}

/// Per-direction speed limits in bytes per second; 0 = unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub download: u64,
    pub upload: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    pub credentials: StoredCredentials,
    /// Overrides the group-supplied virtual filesystem root when set.
    #[serde(default)]
    pub vfs_root: Option<PathBuf>,
    /// OS account name for impersonated file access.
    #[serde(default)]
    pub impersonation: Option<String>,
    #[serde(default)]
    pub speed_limits: SpeedLimits,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    /// Template root inherited by members; `{user}` expands to the user name.
    #[serde(default)]
    pub vfs_root: Option<String>,
    #[serde(default)]
    pub speed_limits: SpeedLimits,
}

/// The whole database, as handed around through the admin plane and the
/// configuration archiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDb {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
}

/// A database update that failed validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserDbError {
    #[error("duplicate user name: {0}")]
    DuplicateUser(String),
    #[error("duplicate group name: {0}")]
    DuplicateGroup(String),
    #[error("user {user} references unknown group {group}")]
    UnknownGroup { user: String, group: String },
    #[error("user {0}: legacy credential schemes can no longer be assigned")]
    LegacyCredentialsCreated(String),
}

impl UserDb {
    pub fn find_user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// The effective virtual filesystem root for `user`: the user's own root
    /// if present, otherwise the first group template, expanded.
    pub fn effective_vfs_root(&self, user: &User) -> Option<PathBuf> {
        if let Some(root) = &user.vfs_root {
            return Some(root.clone());
        }
        for group_name in &user.groups {
            if let Some(group) = self.find_group(group_name) {
                if let Some(template) = &group.vfs_root {
                    return Some(PathBuf::from(template.replace("{user}", &user.name)));
                }
            }
        }
        None
    }

    /// Validate an incoming replacement database against the current one.
    ///
    /// Legacy credential records survive only for users that already carried
    /// exactly that record; any other appearance of a legacy scheme is a
    /// creation attempt and is refused.
    pub fn validate_replacement(&self, incoming: &UserDb) -> Result<(), UserDbError> {
        let mut seen_users: HashMap<&str, ()> = HashMap::new();
        for user in &incoming.users {
            if seen_users.insert(user.name.as_str(), ()).is_some() {
                return Err(UserDbError::DuplicateUser(user.name.clone()));
            }
        }
        let mut seen_groups: HashMap<&str, ()> = HashMap::new();
        for group in &incoming.groups {
            if seen_groups.insert(group.name.as_str(), ()).is_some() {
                return Err(UserDbError::DuplicateGroup(group.name.clone()));
            }
        }
        for user in &incoming.users {
            for group in &user.groups {
                if !incoming.groups.iter().any(|g| &g.name == group) {
                    return Err(UserDbError::UnknownGroup {
                        user: user.name.clone(),
                        group: group.clone(),
                    });
                }
            }
            if user.credentials.is_legacy() {
                let carried_over = self.find_user(&user.name).map(|old| old.credentials == user.credentials).unwrap_or(false);
                if !carried_over {
                    return Err(UserDbError::LegacyCredentialsCreated(user.name.clone()));
                }
            }
        }
        Ok(())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user(name: &str, credentials: StoredCredentials) -> User {
        User {
            name: name.to_string(),
            enabled: true,
            groups: vec![],
            credentials,
            vfs_root: Some(PathBuf::from(format!("/srv/ftp/{name}"))),
            impersonation: None,
            speed_limits: SpeedLimits::default(),
        }
    }

    #[test]
    fn pbkdf2_credentials_round_trip_through_json() {
        let db = UserDb {
            users: vec![user("alice", StoredCredentials::from_password("s3cret"))],
            groups: vec![],
        };
        let text = serde_json::to_string(&db).unwrap();
        let back: UserDb = serde_json::from_str(&text).unwrap();
        assert_eq!(db, back);
        assert!(back.users[0].credentials.verify("s3cret"));
    }

    #[test]
    fn group_template_expands_user_name() {
        let db = UserDb {
            users: vec![User {
                vfs_root: None,
                groups: vec!["tenants".into()],
                ..user("bob", StoredCredentials::None)
            }],
            groups: vec![Group {
                name: "tenants".into(),
                vfs_root: Some("/srv/tenants/{user}".into()),
                speed_limits: SpeedLimits::default(),
            }],
        };
        assert_eq!(db.effective_vfs_root(&db.users[0]), Some(PathBuf::from("/srv/tenants/bob")));
    }

    #[test]
    fn replacement_refuses_new_legacy_credentials() {
        let current = UserDb::default();
        let incoming = UserDb {
            users: vec![user("mallory", StoredCredentials::LegacyMd5 { digest: vec![0; 16] })],
            groups: vec![],
        };
        assert_eq!(
            current.validate_replacement(&incoming),
            Err(UserDbError::LegacyCredentialsCreated("mallory".into()))
        );
    }

    #[test]
    fn replacement_keeps_existing_legacy_credentials() {
        let legacy = StoredCredentials::LegacyMd5 { digest: vec![7; 16] };
        let current = UserDb {
            users: vec![user("old-timer", legacy.clone())],
            groups: vec![],
        };
        let incoming = current.clone();
        assert_eq!(current.validate_replacement(&incoming), Ok(()));

        // Changing the digest counts as creating a new legacy record.
        let mut altered = incoming;
        altered.users[0].credentials = StoredCredentials::LegacyMd5 { digest: vec![8; 16] };
        assert!(current.validate_replacement(&altered).is_err());
    }
}
