//! Authentication: the local user/group database, password verification and
//! the authenticator stack (file-backed wrapped by the throttler).

pub mod db;
pub mod file_based;
pub mod methods;
pub mod password;
pub mod throttled;

pub use db::{Group, StoredCredentials, User, UserDb};
pub use file_based::FileBasedAuthenticator;
pub use methods::{AuthMethods, MethodsList};
pub use throttled::{ThrottledAuthenticator, ThrottledOptions};

use crate::server::ratelimit::Buckets;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::IpAddr;
use std::path::PathBuf;

/// What the client supplied so far.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub password: Option<String>,
    pub source_ip: IpAddr,
}

/// A user that passed authentication, with everything a session needs to
/// serve it.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    /// Root of the virtual filesystem this user sees.
    pub vfs_root: PathBuf,
    /// OS identity file operations should execute under, when impersonation
    /// is configured for this account.
    pub impersonation: Option<String>,
    pub inbound_buckets: Buckets,
    pub outbound_buckets: Buckets,
}

/// The error type for failed authentication.
#[derive(Debug, thiserror::Error)]
#[error("authentication error: {kind}")]
pub struct AuthenticationError {
    kind: AuthenticationErrorKind,
}

/// What went wrong. Unknown-user and wrong-password are deliberately folded
/// together so probing reveals nothing.
#[derive(Debug, PartialEq, Eq, derive_more::Display)]
pub enum AuthenticationErrorKind {
    #[display("Invalid credentials")]
    BadCredentials,
    /// The account exists but is switched off.
    #[display("Account disabled")]
    Disabled,
    /// The account requires impersonation but no impersonator is available.
    #[display("Impersonation not available")]
    ImpersonationUnavailable,
    #[display("Internal authenticator error")]
    Internal,
}

impl AuthenticationError {
    pub fn new(kind: AuthenticationErrorKind) -> Self {
        AuthenticationError { kind }
    }

    pub fn bad_credentials() -> Self {
        AuthenticationError::new(AuthenticationErrorKind::BadCredentials)
    }

    pub fn kind(&self) -> &AuthenticationErrorKind {
        &self.kind
    }
}

/// Asynchronously authenticates a user by name and supplied credentials.
#[async_trait]
pub trait Authenticator: Send + Sync + Debug {
    async fn authenticate(&self, username: &str, creds: &Credentials) -> Result<AuthenticatedUser, AuthenticationError>;

    /// The method sets this user must complete. The default is a single
    /// password round for everyone.
    async fn required_methods(&self, _username: &str) -> MethodsList {
        MethodsList::password_only()
    }
}
