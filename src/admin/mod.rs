//! The administration control plane: a versioned, variant-typed binary RPC
//! over TLS, with per-session send/dispatch masks and flow-controlled
//! broadcasting.

pub mod administrator;
pub mod codec;
pub mod proto;
pub mod server;
pub mod session;
pub mod wire;

pub use administrator::Administrator;
pub use proto::{Msg, PROTOCOL_VERSION};
pub use server::AdminServer;
pub use session::{AdminRequestHandler, AdminSessionHandle, MessageMask};
