//! Everything pertaining to the FTP *control* channel.

pub mod command;
pub(crate) use command::{Command, CommandFlags};

pub(crate) mod handler;

pub(crate) mod control_loop;

pub(super) mod commands;

pub(crate) mod line_parser;

pub(crate) mod codecs;
pub(crate) use codecs::FtpCodec;

pub(crate) mod reply;
pub(crate) use reply::{Reply, ReplyCode};

mod error;
pub(crate) use error::{ControlChanError, ControlChanErrorKind};
