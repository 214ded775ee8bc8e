//! Session telemetry events.
//!
//! FTP sessions report their lifecycle and transfer progress through a
//! [`SessionListener`]; the administration plane's notifier implements it to
//! fan the events out to connected admin clients. The default listener does
//! nothing.

pub(crate) mod event;
pub(crate) mod nop;

pub use event::{EventMeta, ProtocolInfo, SessionEvent, SessionListener, SessionStatus};
pub use nop::NopListener;
