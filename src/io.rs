//! Non-blocking datagram socket with a bounded-timeout receive.
//!
//! Mirrors the teacher's `tcp/ioutil.rs` + `segment_loop` pattern of a
//! readiness wait (`nix::poll`) followed by a non-blocking read, applied to
//! a plain UDP socket instead of a TUN device fd.

use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;

use nix::poll::{poll, PollFd, PollFlags};

use crate::err::Error;
use crate::segment::MAX_SEGMENT_LEN;

/// Outcome of a bounded-timeout receive.
pub enum RecvOutcome {
    Bytes(usize, SocketAddr),
    Timeout,
}

/// A bound UDP socket used in non-blocking, poll-then-read mode.
pub struct DatagramSocket {
    sock: UdpSocket,
}

impl DatagramSocket {
    pub fn bind(addr: SocketAddr) -> Result<DatagramSocket, Error> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        Ok(DatagramSocket { sock })
    }

    /// Binds to an ephemeral local port, for client use.
    pub fn bind_ephemeral() -> Result<DatagramSocket, Error> {
        DatagramSocket::bind(([0, 0, 0, 0], 0).into())
    }

    pub fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Result<usize, Error> {
        Ok(self.sock.send_to(buf, peer)?)
    }

    /// Waits up to `timeout_ms` for a datagram to arrive, then performs a
    /// single non-blocking receive. Never returns a partial datagram: UDP
    /// delivers whole datagrams or none.
    pub fn recv_with_timeout(
        &self,
        buf: &mut [u8; MAX_SEGMENT_LEN],
        timeout_ms: u64,
    ) -> Result<RecvOutcome, Error> {
        let mut pfd = [PollFd::new(self.sock.as_raw_fd(), PollFlags::POLLIN)];

        let ready = poll(&mut pfd[..], timeout_ms as i32)?;

        if ready == 0 {
            return Ok(RecvOutcome::Timeout);
        }

        match self.sock.recv_from(buf) {
            Ok((n, peer)) => Ok(RecvOutcome::Bytes(n, peer)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(RecvOutcome::Timeout),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.sock.local_addr()?)
    }
}
