//! Server-side connection table and per-connection state machine (§3.2,
//! §4.4, §4.5).
//!
//! Grounded on the teacher's `Manager`/`NetStack` (`src/lib.rs`) for the
//! struct-with-explicit-lifecycle shape and on `tcp/tcb.rs` for the
//! per-state `match` dispatch, simplified to a single-threaded event loop
//! per §5 (no `Mutex`/`Condvar`, no background threads).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::err::Error;
use crate::fault::{FaultInjector, Outcome};
use crate::io::{DatagramSocket, RecvOutcome};
use crate::payload::{verify, Payload};
use crate::segment::{Flags, Segment, HEADER_LEN, MAX_SEGMENT_LEN, MSS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    WaitSyn,
    WaitAck,
    Established,
    Closed,
}

/// One peer's connection record (§3.2). The receive buffer is growable
/// rather than the reference's fixed `2 x LOREMSIZE` allocation (§9
/// re-architecture note): it only ever holds bytes actually written at
/// `seqnum` offsets, bounded by `max_stream_len`.
#[derive(Debug)]
pub struct Connection {
    pub state: State,
    pub expseqnum: u16,
    pub window: u16,
    pub buffer: Vec<u8>,
    last_seen: Instant,
}

impl Connection {
    fn new(window: u16) -> Connection {
        Connection {
            state: State::WaitSyn,
            expseqnum: 0,
            window,
            buffer: Vec::new(),
            last_seen: Instant::now(),
        }
    }

    fn accept(&mut self, seqnum: u16, data: &[u8], max_stream_len: usize) -> bool {
        if seqnum != self.expseqnum {
            return false;
        }
        if data.len() > self.window as usize {
            return false;
        }
        let start = seqnum as usize;
        let end = start + data.len();
        if end > max_stream_len {
            return false;
        }
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        self.expseqnum = self.expseqnum.wrapping_add(data.len() as u16);
        true
    }
}

/// Unordered `(ip, port) -> Connection` mapping (§4.4). No eviction beyond
/// explicit `remove` and the optional idle sweep in `evict_idle`.
#[derive(Default)]
pub struct ConnectionTable {
    connections: HashMap<SocketAddr, Connection>,
}

impl ConnectionTable {
    pub fn new() -> ConnectionTable {
        ConnectionTable::default()
    }

    pub fn get_or_create(&mut self, peer: SocketAddr, initial_window: u16) -> &mut Connection {
        self.connections
            .entry(peer)
            .or_insert_with(|| Connection::new(initial_window))
    }

    pub fn remove(&mut self, peer: &SocketAddr) {
        self.connections.remove(peer);
    }

    pub fn get(&self, peer: &SocketAddr) -> Option<&Connection> {
        self.connections.get(peer)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    fn evict_idle(&mut self, idle_timeout: Duration) {
        self.connections
            .retain(|_, conn| conn.last_seen.elapsed() < idle_timeout);
    }
}

/// Tunables the distilled spec calls out as "SHOULD be parameterized"
/// (§4.3, §9), gathered into one constructor argument in the teacher's
/// `NetStack::new(name, addr, mask)` style.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mss: u16,
    pub recv_timeout_ms: u64,
    /// `None` reproduces the reference's unbounded per-peer memory growth
    /// (§9 open question); `Some(d)` sweeps connections idle longer than
    /// `d` on every iteration of `run`.
    pub idle_timeout: Option<Duration>,
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            bind_addr: ([0, 0, 0, 0], 21020).into(),
            mss: MSS as u16,
            recv_timeout_ms: 100,
            idle_timeout: None,
            seed: None,
        }
    }
}

/// What to do with the reply a server-FSM step produced, and whether the
/// connection record should be dropped once that reply actually leaves the
/// socket (a FIN reply the fault injector suppresses must not remove the
/// record: the client will still retransmit its FIN expecting a reply).
enum Reply {
    None,
    Send {
        segment: Segment,
        remove_peer_on_send: bool,
    },
}

pub struct Server {
    config: ServerConfig,
    socket: DatagramSocket,
    table: ConnectionTable,
    injector: FaultInjector,
    expected_len: usize,
    expected_sum: u16,
}

impl Server {
    pub fn new(config: ServerConfig, payload: &Payload) -> Result<Server, Error> {
        let socket = DatagramSocket::bind(config.bind_addr)?;
        let seed = config.seed.unwrap_or_else(rand::random);

        Ok(Server {
            injector: FaultInjector::new(seed),
            socket,
            table: ConnectionTable::new(),
            expected_len: payload.len(),
            expected_sum: payload.checksum(),
            config,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn connection(&self, peer: &SocketAddr) -> Option<&Connection> {
        self.table.get(peer)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.socket.local_addr()
    }

    /// Runs the event loop until `should_stop` returns `true` after an
    /// iteration. The `server` binary passes a closure that never returns
    /// `true`, so the process runs until killed, per §6.
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) -> Result<(), Error> {
        loop {
            self.step()?;
            if should_stop() {
                return Ok(());
            }
        }
    }

    /// Services at most one inbound segment, applying the fault injector
    /// and FSM in the order described by §2's data-flow diagram. Returns
    /// without error on a timeout (no segment arrived).
    pub fn step(&mut self) -> Result<(), Error> {
        if let Some(idle_timeout) = self.config.idle_timeout {
            self.table.evict_idle(idle_timeout);
        }

        let mut buf = [0u8; MAX_SEGMENT_LEN];
        let (n, peer) = match self
            .socket
            .recv_with_timeout(&mut buf, self.config.recv_timeout_ms)
        {
            Ok(RecvOutcome::Timeout) => return Ok(()),
            Ok(RecvOutcome::Bytes(n, peer)) => (n, peer),
            // §7: a socket I/O error must not take the whole server down;
            // log it and wait for the next datagram.
            Err(e @ (Error::Io(_) | Error::Poll(_))) => {
                eprintln!("sdtp-server: socket error on recv, continuing: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = self.injector.sample();
        if matches!(outcome, Outcome::LostIn | Outcome::SumIn) {
            // Drop silently: no state change, no reply, regardless of
            // whether the segment was actually well-formed.
            return Ok(());
        }

        let Some(segment) = Segment::decode(&buf[..n]) else {
            return Ok(());
        };

        let reply = self.handle_segment(peer, segment);

        let Reply::Send {
            segment: reply_segment,
            remove_peer_on_send,
        } = reply
        else {
            return Ok(());
        };

        if matches!(outcome, Outcome::LostOut) {
            return Ok(());
        }

        let mut out = [0u8; MAX_SEGMENT_LEN];
        let len = reply_segment.encode(&mut out)?;
        if matches!(outcome, Outcome::SumOut) {
            self.injector.corrupt_header(&mut out[..HEADER_LEN]);
        }

        // §7: same treatment as the recv path — log and move on rather than
        // aborting the event loop over one peer's bad send.
        if let Err(e) = self.socket.send_to(&out[..len], peer) {
            eprintln!("sdtp-server: socket error on send to {peer}, continuing: {e}");
            return Ok(());
        }

        if remove_peer_on_send {
            self.table.remove(&peer);
        }

        Ok(())
    }

    /// The server FSM proper (§4.5), driven by one already-decoded,
    /// already-checksum-valid inbound segment.
    fn handle_segment(&mut self, peer: SocketAddr, segment: Segment) -> Reply {
        let window = self.injector.choose_window(self.config.mss);

        if segment.flags.is_syn() {
            let conn = self.table.get_or_create(peer, window);
            conn.last_seen = Instant::now();
            if conn.state == State::WaitSyn {
                conn.state = State::WaitAck;
            }
            conn.window = window;
            return Reply::Send {
                segment: Segment::control(Flags::SYN | Flags::ACK, 0, 0, window),
                remove_peer_on_send: false,
            };
        }

        // Every other branch needs an existing record; a stray non-SYN
        // packet from an unknown peer allocates a fresh WAIT_SYN record
        // (§9 open question: implemented as specified) but gets no reply.
        let conn = self.table.get_or_create(peer, window);
        conn.last_seen = Instant::now();

        if segment.flags.is_ack() && segment.flags.0 == Flags::ACK.0 {
            if conn.state == State::WaitAck {
                conn.state = State::Established;
            }
            return Reply::None;
        }

        if segment.flags.is_fin() {
            if matches!(conn.state, State::Established | State::Closed) {
                conn.state = State::Closed;
                let ok = verify(&conn.buffer, self.expected_len, self.expected_sum);
                let acknum = conn.expseqnum;
                let segment = if ok {
                    Segment::control(Flags::ACK, 0, acknum, window)
                } else {
                    Segment::control(Flags::RST, 0, acknum, window)
                };
                return Reply::Send {
                    segment,
                    remove_peer_on_send: true,
                };
            }
            eprintln!(
                "sdtp-server: FIN from {peer} in state {:?}, ignored",
                conn.state
            );
            return Reply::None;
        }

        if segment.flags.is_data() {
            if conn.state == State::WaitAck {
                // Implicit ACK: receiving data tolerates a lost pure ACK
                // (§4.5 item 4, §9 open question: implemented as specified).
                conn.state = State::Established;
            }
            if conn.state != State::Established {
                eprintln!(
                    "sdtp-server: data from {peer} in state {:?}, ignored",
                    conn.state
                );
                return Reply::None;
            }

            conn.accept(
                segment.seqnum,
                &segment.payload,
                2 * crate::payload::LOREMSIZE,
            );
            conn.window = window;

            return Reply::Send {
                segment: Segment::control(Flags::ACK, 0, conn.expseqnum, window),
                remove_peer_on_send: false,
            };
        }

        // §4.5 item 5: anything else (RST, combinations of reserved bits,
        // ACK carrying unexpected flag combinations) is logged and dropped.
        eprintln!(
            "sdtp-server: unexpected flags {:#04x} from {peer}, ignored",
            segment.flags.0
        );
        Reply::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::MSS;

    fn server_with(payload: &[u8], seed: u64) -> (Server, Payload) {
        let payload = Payload::from_bytes(payload.to_vec());
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            seed: Some(seed),
            ..ServerConfig::default()
        };
        let server = Server::new(config, &payload).unwrap();
        (server, payload)
    }

    #[test]
    fn connection_table_holds_one_record_per_peer() {
        let mut table = ConnectionTable::new();
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();

        table.get_or_create(peer, 10);
        table.get_or_create(peer, 10);

        assert_eq!(table.len(), 1);
    }

    #[test]
    fn data_segment_advances_expseqnum_and_is_idempotent_on_replay() {
        let mut conn = Connection::new(255);
        conn.state = State::Established;

        assert!(conn.accept(0, &[1, 2, 3], 1 << 20));
        assert_eq!(conn.expseqnum, 3);

        // Replaying the same already-accepted segment is now out-of-order
        // (seqnum != expseqnum) and is rejected without changing state.
        let before = conn.expseqnum;
        assert!(!conn.accept(0, &[1, 2, 3], 1 << 20));
        assert_eq!(conn.expseqnum, before);
    }

    #[test]
    fn out_of_order_segment_is_ignored() {
        let mut conn = Connection::new(255);
        conn.state = State::Established;
        conn.expseqnum = 500;

        assert!(!conn.accept(300, &[0u8; 50], 1 << 20));
        assert_eq!(conn.expseqnum, 500);
    }

    #[test]
    fn oversize_payload_relative_to_window_is_ignored() {
        let mut conn = Connection::new(10);
        conn.state = State::Established;

        assert!(!conn.accept(0, &[0u8; 20], 1 << 20));
        assert_eq!(conn.expseqnum, 0);
    }

    #[test]
    fn handshake_reaches_established() {
        let (mut server, _payload) = server_with(b"irrelevant for handshake test", 1);
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();

        let syn = Segment::control(Flags::SYN, 0, 0, 0);
        match server.handle_segment(peer, syn) {
            Reply::Send { segment, .. } => {
                assert!(segment.flags.is_syn() && segment.flags.is_ack());
                assert!(segment.window >= 1 && segment.window <= MSS as u16);
            }
            Reply::None => panic!("expected SYN|ACK reply"),
        }
        assert_eq!(server.connection(&peer).unwrap().state, State::WaitAck);

        let ack = Segment::control(Flags::ACK, 0, 0, 0);
        assert!(matches!(server.handle_segment(peer, ack), Reply::None));
        assert_eq!(server.connection(&peer).unwrap().state, State::Established);
        assert_eq!(server.connection(&peer).unwrap().expseqnum, 0);
    }

    #[test]
    fn fin_with_correct_payload_acks_and_schedules_removal() {
        let payload_bytes = b"hello reliable world".to_vec();
        let (mut server, payload) = server_with(&payload_bytes, 2);
        let peer: SocketAddr = "10.0.0.2:4001".parse().unwrap();

        let conn = server.table.get_or_create(peer, 255);
        conn.state = State::Established;
        conn.buffer = payload.bytes().to_vec();
        conn.expseqnum = payload.len() as u16;

        let fin = Segment::control(Flags::FIN, payload.len() as u16, 0, 0);
        match server.handle_segment(peer, fin) {
            Reply::Send {
                segment,
                remove_peer_on_send,
            } => {
                assert!(segment.flags.is_ack());
                assert!(remove_peer_on_send);
            }
            Reply::None => panic!("expected a FIN reply"),
        }
    }

    #[test]
    fn fin_with_wrong_payload_resets() {
        let (mut server, _payload) = server_with(b"expected payload", 3);
        let peer: SocketAddr = "10.0.0.3:4002".parse().unwrap();

        let conn = server.table.get_or_create(peer, 255);
        conn.state = State::Established;
        conn.buffer = b"corrupted payload!".to_vec();

        let fin = Segment::control(Flags::FIN, conn.buffer.len() as u16, 0, 0);
        match server.handle_segment(peer, fin) {
            Reply::Send { segment, .. } => assert!(segment.flags.is_rst()),
            Reply::None => panic!("expected a FIN reply"),
        }
    }

    fn loopback_server(payload: &Payload, seed: u64) -> Server {
        let config = ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            recv_timeout_ms: 20,
            seed: Some(seed),
            ..ServerConfig::default()
        };
        let mut server = Server::new(config, payload).unwrap();
        server.injector.disable_faults();
        server
    }

    fn loopback_client(
        server_addr: SocketAddr,
        payload: &[u8],
    ) -> crate::client::ClientSession<'_> {
        let mut config = crate::client::ClientConfig::new(server_addr);
        config.data_timeout_ms = 20;
        config.handshake_timeout_ms = 20;
        crate::client::ClientSession::new(config, payload).unwrap()
    }

    fn first_connection_buffer(server: &Server) -> Option<Vec<u8>> {
        server.table.connections.values().next().map(|c| c.buffer.clone())
    }

    /// End-to-end scenario 2 (§8): a single client uploads the full
    /// payload over a real loopback socket, lossless, and the server's
    /// reassembled buffer matches byte-for-byte before the connection
    /// record is torn down on a successful close.
    #[test]
    fn single_client_full_transfer_is_lossless_over_loopback() {
        let payload_bytes: Vec<u8> = (0..crate::payload::LOREMSIZE)
            .map(|i| (i % 256) as u8)
            .collect();
        let server_payload = Payload::from_bytes(payload_bytes.clone());

        let mut server = loopback_server(&server_payload, 11);
        let server_addr = server.local_addr().unwrap();
        let mut client = loopback_client(server_addr, &payload_bytes);

        let mut buffer_at_fin = None;
        let outcome = loop {
            if let Some(outcome) = client.step().unwrap() {
                break outcome;
            }
            if client.state() == crate::client::State::SendFin && buffer_at_fin.is_none() {
                buffer_at_fin = first_connection_buffer(&server);
            }
            server.step().unwrap();
        };

        assert_eq!(outcome, crate::client::Outcome::Success);
        assert_eq!(buffer_at_fin, Some(payload_bytes));
        assert_eq!(server.connection_count(), 0);
    }

    /// End-to-end scenario 6 (§8): two clients talking to the same server
    /// concurrently get independent connection records that don't observe
    /// each other's progress, and both finish successfully.
    #[test]
    fn two_concurrent_clients_get_independent_records() {
        let payload_bytes = b"independent clients share no state between them".to_vec();
        let server_payload = Payload::from_bytes(payload_bytes.clone());

        let mut server = loopback_server(&server_payload, 12);
        let server_addr = server.local_addr().unwrap();
        let mut client_a = loopback_client(server_addr, &payload_bytes);
        let mut client_b = loopback_client(server_addr, &payload_bytes);

        // Walk client_a through the handshake on its own; client_b hasn't
        // sent a single byte yet.
        while client_a.state() != crate::client::State::Sending {
            assert!(client_a.step().unwrap().is_none());
            server.step().unwrap();
        }
        assert_eq!(server.connection_count(), 1);

        // Now bring client_b up to the same point and confirm both records
        // coexist, keyed by distinct peer addresses.
        while client_b.state() != crate::client::State::Sending {
            assert!(client_b.step().unwrap().is_none());
            server.step().unwrap();
        }
        assert_eq!(server.connection_count(), 2);
        let established = server
            .table
            .connections
            .values()
            .filter(|c| c.state == State::Established)
            .count();
        assert_eq!(established, 2);

        let mut outcome_a = None;
        let mut outcome_b = None;
        while outcome_a.is_none() || outcome_b.is_none() {
            if outcome_a.is_none() {
                outcome_a = client_a.step().unwrap();
                server.step().unwrap();
            }
            if outcome_b.is_none() {
                outcome_b = client_b.step().unwrap();
                server.step().unwrap();
            }
        }

        assert_eq!(outcome_a, Some(crate::client::Outcome::Success));
        assert_eq!(outcome_b, Some(crate::client::Outcome::Success));
        assert_eq!(server.connection_count(), 0);
    }
}
