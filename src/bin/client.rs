use std::net::SocketAddr;

use sdtp::client::Outcome;
use sdtp::payload::{Payload, LOREMSIZE};
use sdtp::{ClientConfig, ClientSession};

const PAYLOAD_PATH: &str = "./lorem_ipsum.txt";

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let server_addr = match parse_args(&args) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("sdtp-client: {e}");
            eprintln!("usage: client <server_ip> <server_port>");
            std::process::exit(1);
        }
    };

    match run(server_addr) {
        Ok(Outcome::Success) => {
            println!("sdtp-client: transfer acknowledged, server verified payload");
            std::process::exit(0);
        }
        Ok(Outcome::Reset) => {
            eprintln!("sdtp-client: server reset the connection (payload mismatch)");
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("sdtp-client: {e}");
            std::process::exit(3);
        }
    }
}

fn parse_args(args: &[String]) -> Result<SocketAddr, sdtp::Error> {
    if args.len() != 3 {
        return Err(sdtp::Error::Args {
            expected: 2,
            got: args.len().saturating_sub(1),
        });
    }

    let ip = &args[1];
    let port: u16 = args[2]
        .parse()
        .map_err(|_| sdtp::Error::InvalidAddr(format!("{ip}:{}", args[2])))?;

    format!("{ip}:{port}")
        .parse()
        .map_err(|_| sdtp::Error::InvalidAddr(format!("{ip}:{port}")))
}

fn run(server_addr: SocketAddr) -> Result<Outcome, sdtp::Error> {
    let payload = Payload::load(PAYLOAD_PATH)?.require_len(LOREMSIZE, PAYLOAD_PATH)?;

    println!(">>> Trying to connect to server {server_addr}...");
    let config = ClientConfig::new(server_addr);
    let mut session = ClientSession::new(config, payload.bytes())?;
    let outcome = session.run()?;
    println!(">>> Transfer finished: {outcome:?}");

    Ok(outcome)
}
