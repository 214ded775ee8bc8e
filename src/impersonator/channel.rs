//! The framed message channel on top of the fd-passing socket.

use super::fdpass;
use super::messages::{FRAME_CAP, ImpMessage};
use super::{ImpError, ImpErrorKind};
use crate::admin::wire::{self, WireReader};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};
use tokio::net::UnixStream;

pub struct ImpChannel {
    stream: UnixStream,
    read_buf: BytesMut,
    /// Descriptors that arrived before their frame was complete.
    pending_fds: VecDeque<OwnedFd>,
}

impl ImpChannel {
    pub fn new(stream: UnixStream) -> ImpChannel {
        ImpChannel {
            stream,
            read_buf: BytesMut::with_capacity(8 * 1024),
            pending_fds: VecDeque::new(),
        }
    }

    pub fn from_std(stream: std::os::unix::net::UnixStream) -> std::io::Result<ImpChannel> {
        stream.set_nonblocking(true)?;
        Ok(ImpChannel::new(UnixStream::from_std(stream)?))
    }

    /// Send one message, attaching `fd` when present.
    pub async fn send(&mut self, msg: &ImpMessage, fd: Option<BorrowedFd<'_>>) -> Result<(), ImpError> {
        let payload = msg.encode_payload();
        if 2 + payload.len() >= FRAME_CAP as usize {
            return Err(ImpErrorKind::Frame(format!("frame of {} bytes exceeds the cap", payload.len())).into());
        }
        let mut frame = BytesMut::new();
        wire::encode_frame(&mut frame, msg.index(), &payload);
        fdpass::send_with_fd(&self.stream, &frame, fd).await?;
        Ok(())
    }

    /// Receive the next message plus whatever descriptor travelled with it.
    /// `Ok(None)` means the peer closed cleanly between frames.
    pub async fn recv(&mut self) -> Result<Option<(ImpMessage, Option<OwnedFd>)>, ImpError> {
        loop {
            if self.read_buf.len() >= wire::HEADER_LEN {
                let header =
                    wire::decode_header(&self.read_buf[..wire::HEADER_LEN], FRAME_CAP).map_err(|e| ImpError::new(ImpErrorKind::Frame(e.to_string())))?;
                let frame_len = 1 + 4 + header.size as usize;
                if self.read_buf.len() >= frame_len {
                    let frame = self.read_buf.split_to(frame_len);
                    let payload = &frame[wire::HEADER_LEN..];
                    let mut reader = WireReader::new(payload, header.swap);
                    let msg = ImpMessage::decode(header.msg_index, &mut reader).map_err(|e| ImpError::new(ImpErrorKind::Frame(e.to_string())))?;
                    let fd = self.pending_fds.pop_front();
                    return Ok(Some((msg, fd)));
                }
            }

            let mut chunk = [0u8; 8 * 1024];
            let mut fds = Vec::new();
            let n = fdpass::recv_with_fd(&self.stream, &mut chunk, &mut fds).await?;
            for fd in fds {
                self.pending_fds.push_back(fd);
            }
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ImpErrorKind::ChannelClosed.into());
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impersonator::messages::{ImpResult, OpenMode};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[tokio::test]
    async fn request_and_fd_response_round_trip() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = ImpChannel::new(a);
        let mut right = ImpChannel::new(b);

        let request = ImpMessage::OpenFile {
            path: "/data/x".into(),
            mode: OpenMode::Read,
        };
        left.send(&request, None).await.unwrap();
        let (received, fd) = right.recv().await.unwrap().unwrap();
        assert_eq!(received, request);
        assert!(fd.is_none());

        // Answer with an fd riding along.
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"fd payload").unwrap();
        let owned: OwnedFd = file.into();
        right
            .send(&ImpMessage::OpenResponse { result: ImpResult::OK }, Some(owned.as_fd()))
            .await
            .unwrap();

        let (response, fd) = left.recv().await.unwrap().unwrap();
        assert_eq!(response, ImpMessage::OpenResponse { result: ImpResult::OK });
        assert!(fd.is_some());
    }
}
