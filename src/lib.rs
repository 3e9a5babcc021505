mod err;
pub use err::*;

pub mod segment;
pub use segment::{Flags, Segment, HEADER_LEN, MAX_SEGMENT_LEN, MSS};

mod io;
pub use io::{DatagramSocket, RecvOutcome};

pub mod fault;
pub use fault::FaultInjector;

pub mod payload;
pub use payload::{Payload, LOREMSIZE};

pub mod client;
pub use client::{ClientConfig, ClientSession};

pub mod server;
pub use server::{Connection, ConnectionTable, Server, ServerConfig};
