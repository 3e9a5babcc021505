//! Client-side connection state machine (§3.3, §4.3).
//!
//! Grounded on the teacher's `tcp/tcb.rs` per-state dispatch and
//! `tcp/stream.rs` blocking-call shape, collapsed to the single
//! cooperative event loop §5 mandates (no threads, no condvars — the
//! client simply blocks on its own socket's timeout).

use std::net::SocketAddr;
use std::time::Duration;

use crate::err::Error;
use crate::io::{DatagramSocket, RecvOutcome};
use crate::segment::{Flags, Segment, MAX_SEGMENT_LEN, MSS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    SendSyn,
    AwaitSynAck,
    SendAck,
    Sending,
    SendFin,
    AwaitFinAck,
    Done,
}

/// Tunables §4.3 calls out as "SHOULD be parameterized", gathered the same
/// way as `ServerConfig`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub data_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_addr,
            data_timeout_ms: 1000,
            handshake_timeout_ms: 10_000,
        }
    }
}

/// Outcome of a completed transfer (§4.3 AWAIT_FINACK: "on RST -> DONE with
/// failure indication").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Reset,
}

/// Drives one upload against one server. Holds just enough state to resume
/// after any timeout: the current FSM state, the confirmed stream offset,
/// and the peer's last advertised window.
pub struct ClientSession<'a> {
    config: ClientConfig,
    socket: DatagramSocket,
    state: State,
    ackbytes: u16,
    window: u16,
    payload: &'a [u8],
}

impl<'a> ClientSession<'a> {
    pub fn new(config: ClientConfig, payload: &'a [u8]) -> Result<ClientSession<'a>, Error> {
        Ok(ClientSession {
            socket: DatagramSocket::bind_ephemeral()?,
            state: State::SendSyn,
            ackbytes: 0,
            window: 0,
            payload,
            config,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drives the FSM from SEND_SYN through to DONE, retransmitting on every
    /// timeout or malformed reply with no maximum retry count (§4.3,
    /// §9 open question: implemented as specified).
    pub fn run(&mut self) -> Result<Outcome, Error> {
        loop {
            if let Some(outcome) = self.step()? {
                return Ok(outcome);
            }
        }
    }

    /// Executes one FSM transition; returns `Some(outcome)` once DONE.
    pub fn step(&mut self) -> Result<Option<Outcome>, Error> {
        match self.state {
            State::SendSyn => {
                self.send(Segment::control(Flags::SYN, 0, 0, 0))?;
                self.state = State::AwaitSynAck;
                Ok(None)
            }
            State::AwaitSynAck => {
                match self.recv(self.config.handshake_timeout_ms)? {
                    Some(seg) if seg.flags.is_syn() && seg.flags.is_ack() => {
                        self.window = seg.window;
                        self.state = State::SendAck;
                        println!("sdtp: handshake complete, server window={}", self.window);
                    }
                    _ => {
                        println!("sdtp: SYN-ACK timed out, retransmitting SYN");
                        self.state = State::SendSyn;
                    }
                }
                Ok(None)
            }
            State::SendAck => {
                self.send(Segment::control(Flags::ACK, 0, 0, 0))?;
                self.ackbytes = 0;
                self.state = State::Sending;
                Ok(None)
            }
            State::Sending => {
                let remaining = &self.payload[self.ackbytes as usize..];
                if remaining.is_empty() {
                    self.state = State::SendFin;
                    return Ok(None);
                }

                let n = remaining.len().min(self.window as usize).min(MSS);
                if n == 0 {
                    // window = 0 stalls transmission but must still honor
                    // the retransmission timer (§4.3 payload windowing).
                    if self.recv(self.config.data_timeout_ms)?.is_none() {
                        println!("sdtp: stalled on window=0, probing server");
                    }
                    return Ok(None);
                }

                let chunk = remaining[..n].to_vec();
                let seq = self.ackbytes;
                self.send(Segment::data(seq, 0, 0, chunk))?;

                match self.recv(self.config.data_timeout_ms)? {
                    Some(seg)
                        if seg.flags.is_ack()
                            && seg.flags.0 == Flags::ACK.0
                            && seg.acknum == seq.wrapping_add(n as u16) =>
                    {
                        self.ackbytes = seg.acknum;
                        self.window = seg.window;
                    }
                    Some(_) => {
                        println!("sdtp: mismatched ACK at offset {seq}, retransmitting");
                    }
                    None => {
                        println!("sdtp: data segment at offset {seq} timed out, retransmitting");
                    }
                }
                Ok(None)
            }
            State::SendFin => {
                self.send(Segment::control(Flags::FIN, self.ackbytes, 0, 0))?;
                self.state = State::AwaitFinAck;
                Ok(None)
            }
            State::AwaitFinAck => match self.recv(self.config.handshake_timeout_ms)? {
                Some(seg) if seg.flags.is_ack() && seg.flags.0 == Flags::ACK.0 => {
                    self.state = State::Done;
                    Ok(Some(Outcome::Success))
                }
                Some(seg) if seg.flags.is_rst() => {
                    self.state = State::Done;
                    Ok(Some(Outcome::Reset))
                }
                _ => {
                    println!("sdtp: FIN-ACK timed out, retransmitting FIN");
                    self.state = State::SendFin;
                    Ok(None)
                }
            },
            State::Done => Ok(Some(Outcome::Success)),
        }
    }

    fn send(&self, segment: Segment) -> Result<(), Error> {
        let mut buf = [0u8; MAX_SEGMENT_LEN];
        let n = segment.encode(&mut buf)?;
        self.socket.send_to(&buf[..n], self.config.server_addr)?;
        Ok(())
    }

    /// Receives and decodes one reply within `timeout_ms`, treating a
    /// timeout, a corrupt checksum, and a malformed segment identically:
    /// `None`, driving the caller back to its retransmission branch.
    fn recv(&self, timeout_ms: u64) -> Result<Option<Segment>, Error> {
        let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let mut buf = [0u8; MAX_SEGMENT_LEN];
            match self
                .socket
                .recv_with_timeout(&mut buf, remaining.as_millis() as u64)?
            {
                RecvOutcome::Timeout => return Ok(None),
                RecvOutcome::Bytes(n, peer) => {
                    if peer != self.config.server_addr {
                        continue;
                    }
                    return Ok(Segment::decode(&buf[..n]));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(payload: &[u8]) -> ClientSession<'_> {
        let config = ClientConfig::new("127.0.0.1:1".parse().unwrap());
        ClientSession::new(config, payload).unwrap()
    }

    #[test]
    fn starts_in_send_syn() {
        let s = session(b"data");
        assert_eq!(s.state(), State::SendSyn);
    }

    #[test]
    fn sending_advances_to_send_fin_once_payload_exhausted() {
        let mut s = session(b"");
        s.state = State::Sending;
        s.ackbytes = 0;
        s.window = 255;

        assert_eq!(s.step().unwrap(), None);
        assert_eq!(s.state(), State::SendFin);
    }

    #[test]
    fn chunk_size_is_bounded_by_window_mss_and_remaining() {
        let payload = vec![0u8; 1000];
        let mut s = session(&payload);
        s.state = State::Sending;
        s.window = 40;

        // Can't fully drive a network round-trip in a unit test without a
        // live peer; this asserts the windowing arithmetic directly.
        let remaining = &s.payload[s.ackbytes as usize..];
        let n = remaining.len().min(s.window as usize).min(MSS);
        assert_eq!(n, 40);
    }
}
