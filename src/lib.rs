#![deny(clippy::all)]

//! ironftpd is an async, multi-tenant FTP(S) server with an embedded,
//! separately authenticated administration control plane.
//!
//! The FTP plane accepts client connections on one or more listeners,
//! authenticates users against a local user/group database and serves files
//! through a per-user virtual filesystem, optionally executed under an
//! impersonated OS identity. The administration plane speaks a
//! length-prefixed binary RPC over TLS through which users, groups, IP
//! filters, listeners and certificates (including ACME issuance) are managed
//! and live session telemetry is observed.
//!
//! It runs on top of the Tokio asynchronous run-time and tries to make use of
//! async IO as much as possible.

pub mod acme;
pub mod admin;
pub mod auth;
pub(crate) mod chan;
pub mod config;
pub mod impersonator;
pub mod notification;
pub(crate) mod server;
pub mod storage;

pub use crate::server::{BindAddress, ListenerEvent, ListenerStatus, Server, ServerError, options};
pub use crate::server::{autobanner, portmgr, ratelimit, registry, tls};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
