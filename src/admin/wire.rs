//! The binary wire format of the administration (and impersonator) planes.
//!
//! Frames are length-prefixed: `u8 little_endian_flag | u32 payload_size |
//! u16 message_index | payload`, where `payload_size` counts the index and
//! payload bytes. The encoder always writes little-endian and says so in the
//! flag; a decoder on the other byte order swaps every integer it reads.

use bytes::{BufMut, BytesMut};
use derive_more::Display;
use thiserror::Error;

/// Frame header length on the wire: flag + size + message index.
pub const HEADER_LEN: usize = 1 + 4 + 2;

#[derive(Debug, Error)]
#[error("wire error: {kind}")]
pub struct WireError {
    kind: WireErrorKind,
}

#[derive(Debug, PartialEq, Eq, Display)]
pub enum WireErrorKind {
    /// Fewer bytes than the value needs.
    #[display("truncated payload")]
    Truncated,
    #[display("invalid UTF-8 in string")]
    BadUtf8,
    /// An enum tag or variant index not in the catalog.
    #[display("invalid tag: {}", tag)]
    BadTag { tag: u64 },
    /// A frame larger than the negotiated cap.
    #[display("frame too large: {} bytes", size)]
    FrameTooLarge { size: u64 },
    /// Trailing bytes after a complete message.
    #[display("trailing bytes in payload")]
    TrailingBytes,
}

impl WireError {
    pub fn new(kind: WireErrorKind) -> WireError {
        WireError { kind }
    }

    pub fn kind(&self) -> &WireErrorKind {
        &self.kind
    }
}

impl From<WireErrorKind> for WireError {
    fn from(kind: WireErrorKind) -> WireError {
        WireError { kind }
    }
}

pub type WireResult<T> = Result<T, WireError>;

/// Serializes message payloads. Always little-endian.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> WireWriter {
        WireWriter::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn string(&mut self, v: &str) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn opt_string(&mut self, v: &Option<String>) {
        match v {
            Some(s) => {
                self.bool(true);
                self.string(s);
            }
            None => self.bool(false),
        }
    }

    pub fn string_list(&mut self, v: &[String]) {
        self.u32(v.len() as u32);
        for s in v {
            self.string(s);
        }
    }

    pub fn u64_list(&mut self, v: &[u64]) {
        self.u32(v.len() as u32);
        for x in v {
            self.u64(*x);
        }
    }
}

/// Deserializes message payloads, swapping byte order when the frame was
/// written on a machine of the opposite endianness.
pub struct WireReader<'a> {
    buf: &'a [u8],
    swap: bool,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], swap: bool) -> WireReader<'a> {
        WireReader { buf, swap }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(&self) -> WireResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireErrorKind::TrailingBytes.into())
        }
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(WireErrorKind::Truncated.into());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> WireResult<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> WireResult<u16> {
        let raw = self.take(2)?;
        let v = u16::from_le_bytes([raw[0], raw[1]]);
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn u32(&mut self) -> WireResult<u32> {
        let raw = self.take(4)?;
        let v = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn u64(&mut self) -> WireResult<u64> {
        let raw = self.take(8)?;
        let v = u64::from_le_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7]]);
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    pub fn i32(&mut self) -> WireResult<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn i64(&mut self) -> WireResult<i64> {
        Ok(self.u64()? as i64)
    }

    pub fn string(&mut self) -> WireResult<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireErrorKind::BadUtf8.into())
    }

    pub fn bytes(&mut self) -> WireResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn opt_string(&mut self) -> WireResult<Option<String>> {
        if self.bool()? { Ok(Some(self.string()?)) } else { Ok(None) }
    }

    pub fn string_list(&mut self) -> WireResult<Vec<String>> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(self.string()?);
        }
        Ok(out)
    }

    pub fn u64_list(&mut self) -> WireResult<Vec<u64>> {
        let len = self.u32()? as usize;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(self.u64()?);
        }
        Ok(out)
    }
}

/// A complete frame ready to hit the socket.
pub fn encode_frame(out: &mut BytesMut, msg_index: u16, payload: &[u8]) {
    let size = (2 + payload.len()) as u32;
    out.put_u8(1); // encoder is little-endian
    out.put_u32_le(size);
    out.put_u16_le(msg_index);
    out.put_slice(payload);
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub swap: bool,
    /// Bytes following the size field (index + payload).
    pub size: u32,
    pub msg_index: u16,
}

/// Parse a header from the first [`HEADER_LEN`] bytes, enforcing `max_size`.
pub fn decode_header(raw: &[u8], max_size: u32) -> WireResult<FrameHeader> {
    if raw.len() < HEADER_LEN {
        return Err(WireErrorKind::Truncated.into());
    }
    let little_endian = raw[0] != 0;
    let swap = little_endian != cfg!(target_endian = "little");
    let size = {
        let v = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]);
        if swap { v.swap_bytes() } else { v }
    };
    if size >= max_size {
        return Err(WireErrorKind::FrameTooLarge { size: size as u64 }.into());
    }
    if size < 2 {
        return Err(WireErrorKind::Truncated.into());
    }
    let msg_index = {
        let v = u16::from_le_bytes([raw[5], raw[6]]);
        if swap { v.swap_bytes() } else { v }
    };
    Ok(FrameHeader { swap, size, msg_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalar_round_trip() {
        let mut w = WireWriter::new();
        w.u8(7);
        w.bool(true);
        w.u16(0x1234);
        w.u32(0xdead_beef);
        w.u64(0x0102_0304_0506_0708);
        w.i32(-42);
        w.i64(-1);
        w.string("héllo");
        w.opt_string(&None);
        w.opt_string(&Some("x".into()));
        w.string_list(&["a".into(), "b".into()]);
        w.u64_list(&[1, 2, 3]);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes, false);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.bool().unwrap(), true);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert_eq!(r.u32().unwrap(), 0xdead_beef);
        assert_eq!(r.u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.i32().unwrap(), -42);
        assert_eq!(r.i64().unwrap(), -1);
        assert_eq!(r.string().unwrap(), "héllo");
        assert_eq!(r.opt_string().unwrap(), None);
        assert_eq!(r.opt_string().unwrap(), Some("x".into()));
        assert_eq!(r.string_list().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(r.u64_list().unwrap(), vec![1, 2, 3]);
        r.finish().unwrap();
    }

    #[test]
    fn swapped_reader_unswaps_integers() {
        // Bytes as a big-endian writer would have produced for 0x1234.
        let bytes = [0x12u8, 0x34];
        let mut r = WireReader::new(&bytes, true);
        assert_eq!(r.u16().unwrap(), 0x1234);
    }

    #[test]
    fn header_round_trip() {
        let mut out = BytesMut::new();
        encode_frame(&mut out, 5, b"abc");
        let header = decode_header(&out, 1024).unwrap();
        assert_eq!(
            header,
            FrameHeader {
                swap: false,
                size: 5,
                msg_index: 5
            }
        );
    }

    #[test]
    fn oversized_frame_is_refused() {
        let mut out = BytesMut::new();
        encode_frame(&mut out, 1, &[0u8; 64]);
        let err = decode_header(&out, 32).unwrap_err();
        assert_eq!(err.kind(), &WireErrorKind::FrameTooLarge { size: 66 });
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut w = WireWriter::new();
        w.u32(100); // promises 100 bytes
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes, false);
        assert_eq!(r.string().unwrap_err().kind(), &WireErrorKind::Truncated);
    }
}
