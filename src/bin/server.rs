use sdtp::payload::{Payload, LOREMSIZE};
use sdtp::{Server, ServerConfig};

const PAYLOAD_PATH: &str = "./lorem_ipsum.txt";

fn main() {
    if let Err(e) = run() {
        eprintln!("sdtp-server: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), sdtp::Error> {
    let payload = Payload::load(PAYLOAD_PATH)?.require_len(LOREMSIZE, PAYLOAD_PATH)?;
    println!(
        "sdtp-server: loaded {} bytes from {PAYLOAD_PATH}, datasum=0x{:04x}",
        payload.len(),
        payload.checksum()
    );

    let seed = std::env::var("SDTP_SEED").ok().and_then(|s| s.parse().ok());
    let config = ServerConfig {
        seed,
        ..ServerConfig::default()
    };
    match seed {
        Some(seed) => println!("sdtp-server: fault injector seeded from SDTP_SEED={seed}"),
        None => println!("sdtp-server: fault injector seeded randomly (set SDTP_SEED to replay)"),
    }
    println!("sdtp-server: binding {}", config.bind_addr);
    let mut server = Server::new(config, &payload)?;

    println!(">>> Waiting for incoming connections...");
    server.run(|| false)
}
