//! Sending byte frames with file descriptors attached over a Unix socket,
//! via `sendmsg`/`recvmsg` with `SCM_RIGHTS`.

use nix::cmsg_space;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use tokio::io::Interest;
use tokio::net::UnixStream;

/// Write all of `bytes`; `fd`, if any, rides along with the first chunk.
pub async fn send_with_fd(stream: &UnixStream, bytes: &[u8], fd: Option<BorrowedFd<'_>>) -> std::io::Result<()> {
    let mut offset = 0usize;
    let mut fd = fd;

    while offset < bytes.len() {
        let written = stream
            .async_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&bytes[offset..])];
                let raw_fds;
                let cmsgs: &[ControlMessage] = match &fd {
                    Some(borrowed) => {
                        raw_fds = [borrowed.as_raw_fd()];
                        &[ControlMessage::ScmRights(&raw_fds)]
                    }
                    None => &[],
                };
                sendmsg::<()>(stream.as_fd().as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None).map_err(std::io::Error::from)
            })
            .await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
        }
        offset += written;
        fd = None; // attached once
    }
    Ok(())
}

/// Read up to `buf.len()` bytes. Descriptors that arrived with the data are
/// appended to `fds`. A zero return is end-of-stream.
pub async fn recv_with_fd(stream: &UnixStream, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> std::io::Result<usize> {
    stream
        .async_io(Interest::READABLE, || {
            let mut cmsg_buf = cmsg_space!([std::os::fd::RawFd; 4]);
            let mut iov = [IoSliceMut::new(buf)];
            let msg = recvmsg::<()>(stream.as_fd().as_raw_fd(), &mut iov, Some(&mut cmsg_buf), MsgFlags::empty()).map_err(std::io::Error::from)?;

            for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
                if let ControlMessageOwned::ScmRights(received) = cmsg {
                    for raw in received {
                        // recvmsg hands us ownership of these descriptors.
                        #[allow(unsafe_code)]
                        fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                    }
                }
            }
            Ok(msg.bytes)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[tokio::test]
    async fn frame_and_descriptor_cross_the_socketpair() {
        let (left, right) = UnixStream::pair().unwrap();

        // Something identifiable to pass: a temp file with bytes in it.
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"through the wormhole").unwrap();
        file.flush().unwrap();

        let payload = b"frame-bytes".to_vec();
        let fd_owned: OwnedFd = file.into();
        send_with_fd(&left, &payload, Some(fd_owned.as_fd())).await.unwrap();

        let mut buf = vec![0u8; 64];
        let mut fds = Vec::new();
        let n = recv_with_fd(&right, &mut buf, &mut fds).await.unwrap();
        assert_eq!(&buf[..n], b"frame-bytes");
        assert_eq!(fds.len(), 1);

        // The received descriptor really is the same file.
        let mut received = std::fs::File::from(fds.pop().unwrap());
        received.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "through the wormhole");
    }
}
