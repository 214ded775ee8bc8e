//! tokio codec for administration frames.
//!
//! Payload decode errors are surfaced *inside* the item rather than as a
//! stream error, because the session must answer them with an exception
//! frame (or tear the connection down when the broken frame itself carried an
//! exception). Only framing violations (oversized frames) kill the stream.

use super::proto::Msg;
use super::wire::{self, FrameHeader, WireError, WireErrorKind, WireReader};
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::codec::{Decoder, Encoder};

/// One decoded frame: the claimed index plus the decode outcome.
#[derive(Debug)]
pub struct DecodedFrame {
    pub index: u16,
    pub result: Result<Msg, WireError>,
}

pub struct AdminCodec {
    /// Shared so the session can raise the cap after login.
    cap: Arc<AtomicU32>,
}

impl AdminCodec {
    pub fn new(cap: Arc<AtomicU32>) -> AdminCodec {
        AdminCodec { cap }
    }
}

impl Decoder for AdminCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<DecodedFrame>, io::Error> {
        if buf.len() < wire::HEADER_LEN {
            return Ok(None);
        }
        let header: FrameHeader = match wire::decode_header(&buf[..wire::HEADER_LEN], self.cap.load(Ordering::Relaxed)) {
            Ok(header) => header,
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        };

        let frame_len = 1 + 4 + header.size as usize;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(frame_len);
        let payload = &frame[wire::HEADER_LEN..];
        let mut reader = WireReader::new(payload, header.swap);
        let result = Msg::decode(header.msg_index, &mut reader);

        Ok(Some(DecodedFrame {
            index: header.msg_index,
            result,
        }))
    }
}

impl Encoder<Msg> for AdminCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Msg, buf: &mut BytesMut) -> Result<(), io::Error> {
        let payload = msg.encode_payload();
        if 2 + payload.len() >= self.cap.load(Ordering::Relaxed) as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                WireError::new(WireErrorKind::FrameTooLarge {
                    size: (2 + payload.len()) as u64,
                }),
            ));
        }
        wire::encode_frame(buf, msg.index(), &payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::proto::{AdminLogin, PROTOCOL_VERSION};
    use pretty_assertions::assert_eq;

    fn cap(n: u32) -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(n))
    }

    #[test]
    fn encode_then_decode_yields_the_message() {
        let mut codec = AdminCodec::new(cap(1024));
        let mut buf = BytesMut::new();
        let msg = Msg::AdminLogin(AdminLogin {
            protocol_version: PROTOCOL_VERSION,
            password: "pw".into(),
        });
        codec.encode(msg.clone(), &mut buf).unwrap();

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.index, 1);
        assert_eq!(frame.result.unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let mut codec = AdminCodec::new(cap(1024));
        let mut full = BytesMut::new();
        codec.encode(Msg::AcknowledgeQueueFull, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..4]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_terminates_the_stream() {
        let mut codec = AdminCodec::new(cap(8));
        let mut buf = BytesMut::new();
        let mut writer = AdminCodec::new(cap(u32::MAX));
        writer
            .encode(
                Msg::AdminLogin(AdminLogin {
                    protocol_version: PROTOCOL_VERSION,
                    password: "a-very-long-password".into(),
                }),
                &mut buf,
            )
            .unwrap();
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_payload_is_an_in_band_error() {
        let mut codec = AdminCodec::new(cap(1024));
        let mut buf = BytesMut::new();
        // A frame claiming index 1 (admin_login) with a truncated payload.
        crate::admin::wire::encode_frame(&mut buf, 1, &[0x01]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.index, 1);
        assert!(frame.result.is_err());
    }
}
