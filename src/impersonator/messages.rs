//! The impersonator request/response catalog. Same framing as the admin
//! plane, but with a tight 64 KiB cap and file descriptors travelling next to
//! `Open*Response` frames.

use crate::admin::wire::{WireErrorKind, WireReader, WireResult, WireWriter};
use std::path::PathBuf;

/// Frame cap on the impersonator channel.
pub const FRAME_CAP: u32 = 64 * 1024;

/// errno-like outcome; zero is success. [`ImpResult::OTHER`] is the value
/// receivers are answered with when the channel dies under them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpResult(pub i32);

impl ImpResult {
    pub const OK: ImpResult = ImpResult(0);
    pub const OTHER: ImpResult = ImpResult(-1);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn from_io(err: &std::io::Error) -> ImpResult {
        ImpResult(err.raw_os_error().unwrap_or(-1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write { create: bool, truncate: bool },
    Append,
}

impl OpenMode {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            OpenMode::Read => w.u8(0),
            OpenMode::Write { create, truncate } => {
                w.u8(1);
                w.bool(*create);
                w.bool(*truncate);
            }
            OpenMode::Append => w.u8(2),
        }
    }

    fn decode(r: &mut WireReader) -> WireResult<OpenMode> {
        match r.u8()? {
            0 => Ok(OpenMode::Read),
            1 => Ok(OpenMode::Write {
                create: r.bool()?,
                truncate: r.bool()?,
            }),
            2 => Ok(OpenMode::Append),
            tag => Err(WireErrorKind::BadTag { tag: tag as u64 }.into()),
        }
    }
}

/// What `Info` reports about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoReply {
    pub result: ImpResult,
    pub is_link: bool,
    /// 0 = file, 1 = dir, 2 = other.
    pub kind: u8,
    pub size: i64,
    pub mtime_unix: i64,
    pub mode: u32,
}

impl InfoReply {
    pub fn not_available() -> InfoReply {
        InfoReply {
            result: ImpResult::OTHER,
            is_link: false,
            kind: 2,
            size: 0,
            mtime_unix: 0,
            mode: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpMessage {
    Exception { description: String },

    OpenFile { path: PathBuf, mode: OpenMode },
    OpenDirectory { path: PathBuf },
    /// The descriptor itself arrives via SCM_RIGHTS alongside this frame.
    OpenResponse { result: ImpResult },

    Rename { from: PathBuf, to: PathBuf },
    RenameResponse { result: ImpResult },

    RemoveFile { path: PathBuf },
    RemoveDirectory { path: PathBuf },
    RemoveResponse { result: ImpResult },

    Info { path: PathBuf, follow_links: bool },
    InfoResponse(InfoReply),

    Mkdir { path: PathBuf, recurse: bool, permissions: u32 },
    MkdirResponse { result: ImpResult },

    SetMtime { path: PathBuf, mtime_unix: i64 },
    SetMtimeResponse { result: ImpResult },
}

fn put_path(w: &mut WireWriter, path: &std::path::Path) {
    w.string(&path.to_string_lossy());
}

fn get_path(r: &mut WireReader) -> WireResult<PathBuf> {
    Ok(PathBuf::from(r.string()?))
}

impl ImpMessage {
    pub fn index(&self) -> u16 {
        use ImpMessage::*;
        match self {
            Exception { .. } => 0,
            OpenFile { .. } => 1,
            OpenDirectory { .. } => 2,
            OpenResponse { .. } => 3,
            Rename { .. } => 4,
            RenameResponse { .. } => 5,
            RemoveFile { .. } => 6,
            RemoveDirectory { .. } => 7,
            RemoveResponse { .. } => 8,
            Info { .. } => 9,
            InfoResponse(_) => 10,
            Mkdir { .. } => 11,
            MkdirResponse { .. } => 12,
            SetMtime { .. } => 13,
            SetMtimeResponse { .. } => 14,
        }
    }

    /// The response slot a request expects, enforced on arrival order.
    pub fn expected_response_index(&self) -> Option<u16> {
        use ImpMessage::*;
        match self {
            OpenFile { .. } | OpenDirectory { .. } => Some(3),
            Rename { .. } => Some(5),
            RemoveFile { .. } | RemoveDirectory { .. } => Some(8),
            Info { .. } => Some(10),
            Mkdir { .. } => Some(12),
            SetMtime { .. } => Some(14),
            _ => None,
        }
    }

    /// The default-constructed response a pending receiver gets when the
    /// channel dies before the real one arrives.
    pub fn default_response_for(request: &ImpMessage) -> Option<ImpMessage> {
        use ImpMessage::*;
        match request {
            OpenFile { .. } | OpenDirectory { .. } => Some(OpenResponse { result: ImpResult::OTHER }),
            Rename { .. } => Some(RenameResponse { result: ImpResult::OTHER }),
            RemoveFile { .. } | RemoveDirectory { .. } => Some(RemoveResponse { result: ImpResult::OTHER }),
            Info { .. } => Some(InfoResponse(InfoReply::not_available())),
            Mkdir { .. } => Some(MkdirResponse { result: ImpResult::OTHER }),
            SetMtime { .. } => Some(SetMtimeResponse { result: ImpResult::OTHER }),
            _ => None,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        use ImpMessage::*;
        let mut w = WireWriter::new();
        match self {
            Exception { description } => w.string(description),
            OpenFile { path, mode } => {
                put_path(&mut w, path);
                mode.encode(&mut w);
            }
            OpenDirectory { path } => put_path(&mut w, path),
            OpenResponse { result } => w.i32(result.0),
            Rename { from, to } => {
                put_path(&mut w, from);
                put_path(&mut w, to);
            }
            RenameResponse { result } => w.i32(result.0),
            RemoveFile { path } | RemoveDirectory { path } => put_path(&mut w, path),
            RemoveResponse { result } => w.i32(result.0),
            Info { path, follow_links } => {
                put_path(&mut w, path);
                w.bool(*follow_links);
            }
            InfoResponse(info) => {
                w.i32(info.result.0);
                w.bool(info.is_link);
                w.u8(info.kind);
                w.i64(info.size);
                w.i64(info.mtime_unix);
                w.u32(info.mode);
            }
            Mkdir { path, recurse, permissions } => {
                put_path(&mut w, path);
                w.bool(*recurse);
                w.u32(*permissions);
            }
            MkdirResponse { result } => w.i32(result.0),
            SetMtime { path, mtime_unix } => {
                put_path(&mut w, path);
                w.i64(*mtime_unix);
            }
            SetMtimeResponse { result } => w.i32(result.0),
        }
        w.into_bytes()
    }

    pub fn decode(index: u16, r: &mut WireReader) -> WireResult<ImpMessage> {
        use ImpMessage::*;
        let msg = match index {
            0 => Exception { description: r.string()? },
            1 => OpenFile {
                path: get_path(r)?,
                mode: OpenMode::decode(r)?,
            },
            2 => OpenDirectory { path: get_path(r)? },
            3 => OpenResponse { result: ImpResult(r.i32()?) },
            4 => Rename {
                from: get_path(r)?,
                to: get_path(r)?,
            },
            5 => RenameResponse { result: ImpResult(r.i32()?) },
            6 => RemoveFile { path: get_path(r)? },
            7 => RemoveDirectory { path: get_path(r)? },
            8 => RemoveResponse { result: ImpResult(r.i32()?) },
            9 => Info {
                path: get_path(r)?,
                follow_links: r.bool()?,
            },
            10 => InfoResponse(InfoReply {
                result: ImpResult(r.i32()?),
                is_link: r.bool()?,
                kind: r.u8()?,
                size: r.i64()?,
                mtime_unix: r.i64()?,
                mode: r.u32()?,
            }),
            11 => Mkdir {
                path: get_path(r)?,
                recurse: r.bool()?,
                permissions: r.u32()?,
            },
            12 => MkdirResponse { result: ImpResult(r.i32()?) },
            13 => SetMtime {
                path: get_path(r)?,
                mtime_unix: r.i64()?,
            },
            14 => SetMtimeResponse { result: ImpResult(r.i32()?) },
            _ => return Err(WireErrorKind::BadTag { tag: index as u64 }.into()),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(msg: ImpMessage) {
        let payload = msg.encode_payload();
        let mut r = WireReader::new(&payload, false);
        assert_eq!(ImpMessage::decode(msg.index(), &mut r).unwrap(), msg);
    }

    #[test]
    fn messages_round_trip() {
        round_trip(ImpMessage::OpenFile {
            path: "/srv/ftp/alice/report.pdf".into(),
            mode: OpenMode::Write { create: true, truncate: false },
        });
        round_trip(ImpMessage::OpenResponse { result: ImpResult::OK });
        round_trip(ImpMessage::Info {
            path: "/etc/hostname".into(),
            follow_links: true,
        });
        round_trip(ImpMessage::InfoResponse(InfoReply {
            result: ImpResult::OK,
            is_link: false,
            kind: 0,
            size: 512,
            mtime_unix: 1_700_000_000,
            mode: 0o644,
        }));
        round_trip(ImpMessage::Mkdir {
            path: "/srv/new".into(),
            recurse: true,
            permissions: 0o755,
        });
    }

    #[test]
    fn default_responses_carry_the_other_result() {
        let request = ImpMessage::Rename {
            from: "/a".into(),
            to: "/b".into(),
        };
        assert_eq!(
            ImpMessage::default_response_for(&request),
            Some(ImpMessage::RenameResponse { result: ImpResult::OTHER })
        );
        assert_eq!(ImpMessage::default_response_for(&ImpMessage::Exception { description: String::new() }), None);
    }

    #[test]
    fn expected_response_indices_match_the_catalog() {
        let open = ImpMessage::OpenDirectory { path: "/".into() };
        assert_eq!(open.expected_response_index(), Some(3));
        let mkdir = ImpMessage::Mkdir {
            path: "/x".into(),
            recurse: false,
            permissions: 0o755,
        };
        assert_eq!(mkdir.expected_response_index(), Some(12));
    }
}
