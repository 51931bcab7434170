//! mtlink-probe: check which transport reaches a DC.
//!
//! Races obfuscated TCP against HTTP (or uses just one of them), then sends
//! an unencrypted `req_pq` over the winner and prints the answer.
//!
//!   cargo run -p mtlink-probe -- [dc] [auto|tcp|http]
//!
//! Logging: RUST_LOG=mtlink_client=debug cargo run -p mtlink-probe

use std::time::{Duration, Instant};

use mtlink_client::{
    Config, ConnectTarget, Connection, Connector, NetworkConnector, TransportMode,
};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: single-threaded at this point, no other threads reading env
        unsafe { std::env::set_var("RUST_LOG", "mtlink_client=info,mtlink_probe=info"); }
    }
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("\n✗ {e}");
        std::process::exit(1);
    }
}

fn parse_mode(arg: Option<&str>) -> Result<TransportMode, String> {
    match arg.unwrap_or("auto") {
        "auto" => Ok(TransportMode::Auto),
        "tcp" => Ok(TransportMode::Tcp),
        "http" => Ok(TransportMode::Http),
        other => Err(format!("unknown transport {other:?}, expected auto, tcp or http")),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let dc: i32 = args.first().map(|a| a.parse::<i32>()).transpose()?.unwrap_or(2);
    let mode = parse_mode(args.get(1).map(String::as_str))?;

    let config = Config::default();
    let endpoint = config.endpoint(dc).cloned().ok_or_else(|| format!("no address for DC {dc}"))?;
    log::info!("[probe] DC {dc} at {} / {} ({mode:?})", endpoint.tcp_addr(), endpoint.http_url());

    let target = ConnectTarget {
        dc,
        endpoint,
        mode,
        secret: config.proxy_secret,
        http_grace: config.http_grace,
        max_packet_len: config.max_packet_len,
        connect_timeout: config.max_connect_timeout,
    };

    let started = Instant::now();
    let conn = tokio::time::timeout(Duration::from_secs(30), NetworkConnector.connect(target))
        .await
        .map_err(|_| "connect timed out")??;
    println!("✓ connected via {} in {:?}", conn.kind(), started.elapsed());

    let started = Instant::now();
    let res = match conn {
        Connection::Tcp(mut tcp) => tcp.probe().await?,
        Connection::Http(mut http) => http.probe().await?,
    };
    println!("✓ resPQ in {:?}", started.elapsed());
    println!("  server_nonce: {}", hex(&res.server_nonce));
    println!("  pq:           {}", hex(&res.pq));
    println!("  fingerprints: {:x?}", res.server_public_key_fingerprints);
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
