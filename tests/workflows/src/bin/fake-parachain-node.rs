//! Stand-in for a validator or collator binary: serves a Prometheus
//! exposition whose block height grows with uptime.

use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};

#[derive(Parser, Debug)]
#[command(about = "Fake parachain node for harness tests")]
struct Args {
    #[arg(long)]
    name: String,
    #[arg(long)]
    prometheus_port: u16,
    /// One block per interval; 0 keeps the height at 0.
    #[arg(long, default_value_t = 200)]
    block_time_ms: u64,
    #[arg(long, default_value_t = 3)]
    peers: u64,
    /// Exit with status 1 after this long.
    #[arg(long)]
    crash_after_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let listener = TcpListener::bind(("127.0.0.1", args.prometheus_port))
        .await
        .with_context(|| format!("failed to bind metrics port {}", args.prometheus_port))?;
    eprintln!("{} serving metrics on {}", args.name, args.prometheus_port);

    let started = Instant::now();
    if let Some(ms) = args.crash_after_ms {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            eprintln!("crashing as requested");
            std::process::exit(1);
        });
    }

    loop {
        let (socket, _) = listener.accept().await.context("accept failed")?;
        let body = exposition(&args, started.elapsed());
        tokio::spawn(respond(socket, body));
    }
}

fn exposition(args: &Args, uptime: Duration) -> String {
    let best = match args.block_time_ms {
        0 => 0,
        block_time => uptime.as_millis() as u64 / block_time,
    };
    let finalized = best.saturating_sub(2);
    format!(
        "# HELP substrate_block_height Block height info of the chain\n\
         # TYPE substrate_block_height gauge\n\
         substrate_block_height{{status=\"best\",chain=\"local\"}} {best}\n\
         substrate_block_height{{status=\"finalized\",chain=\"local\"}} {finalized}\n\
         # TYPE substrate_sub_libp2p_peers_count gauge\n\
         substrate_sub_libp2p_peers_count{{chain=\"local\"}} {}\n",
        args.peers
    )
}

async fn respond(mut socket: TcpStream, body: String) {
    let mut buf = [0u8; 1024];
    let _ = socket.read(&mut buf).await;
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
