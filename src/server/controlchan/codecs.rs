//! The tokio codec that frames the control channel: CR-LF delimited command
//! lines in, rendered replies out.

use super::command::Command;
use super::error::{ControlChanError, ControlChanErrorKind};
use super::line_parser;
use super::reply::Reply;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Longest command line we accept, terminator included.
pub const MAX_LINE_LEN: usize = 8 * 1024;

pub struct FtpCodec {
    // Stored index of the next index to examine for a '\n' character. This is
    // used to optimize searching. For example, if `decode` was called with
    // `abc`, it would hold `3`, because that is the next index to examine.
    next_index: usize,
}

impl FtpCodec {
    pub fn new() -> Self {
        FtpCodec { next_index: 0 }
    }
}

impl Decoder for FtpCodec {
    type Item = Command;
    type Error = ControlChanError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Command>, Self::Error> {
        if let Some(newline_offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let newline_index = newline_offset + self.next_index;
            let line = buf.split_to(newline_index + 1);
            self.next_index = 0;
            if line.len() > MAX_LINE_LEN {
                return Err(ControlChanErrorKind::LineTooLong.into());
            }
            Ok(Some(line_parser::parse(line)?))
        } else {
            if buf.len() > MAX_LINE_LEN {
                return Err(ControlChanErrorKind::LineTooLong.into());
            }
            self.next_index = buf.len();
            Ok(None)
        }
    }
}

impl Encoder<Reply> for FtpCodec {
    type Error = ControlChanError;

    fn encode(&mut self, reply: Reply, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let mut out = String::new();
        match reply {
            Reply::None => return Ok(()),
            Reply::CodeAndMsg { code, msg } => {
                if msg.is_empty() {
                    out = format!("{}\r\n", code as u32);
                } else {
                    out = format!("{} {}\r\n", code as u32, msg);
                }
            }
            Reply::MultiLine { code, lines } => {
                if lines.is_empty() {
                    out = format!("{}\r\n", code as u32);
                } else if lines.len() == 1 {
                    out = format!("{} {}\r\n", code as u32, lines[0]);
                } else {
                    for (i, line) in lines.iter().enumerate() {
                        if i == 0 {
                            out.push_str(&format!("{}-{}\r\n", code as u32, line));
                        } else if i == lines.len() - 1 {
                            out.push_str(&format!("{} {}\r\n", code as u32, line));
                        } else {
                            out.push_str(&format!(" {}\r\n", line));
                        }
                    }
                }
            }
        }
        buf.put(out.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::reply::ReplyCode;
    use super::*;
    use pretty_assertions::assert_eq;

    fn encoded(reply: Reply) -> String {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(reply, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn single_line_reply() {
        assert_eq!(encoded(Reply::new(ReplyCode::CommandOkay, "Ok")), "200 Ok\r\n");
    }

    #[test]
    fn multi_line_reply_uses_dash_and_indent() {
        // Intermediate lines get exactly one leading space, the RFC 2389
        // feature marker.
        let reply = Reply::new_multiline(ReplyCode::SystemStatus, vec!["Extensions supported:", "SIZE", "END"]);
        assert_eq!(encoded(reply), "211-Extensions supported:\r\n SIZE\r\n211 END\r\n");
    }

    #[test]
    fn none_reply_writes_nothing() {
        assert_eq!(encoded(Reply::none()), "");
    }

    #[test]
    fn decode_waits_for_a_full_line() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::from(&b"NOOP"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put(&b"\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Command::Noop));
    }

    #[test]
    fn oversized_line_is_an_error() {
        let mut codec = FtpCodec::new();
        let mut buf = BytesMut::new();
        buf.put(vec![b'A'; MAX_LINE_LEN + 1].as_slice());
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), &ControlChanErrorKind::LineTooLong);
    }
}
