use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use tftpd_rs::Server;

/// Read-only TFTP server: serves one file, in octet mode, to every client
/// that asks.
#[derive(Parser, Debug)]
#[command(name = "tftpd-rs", version)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:69")]
    address: SocketAddr,

    /// File to serve to clients
    #[arg(short, long)]
    payload: PathBuf,

    /// Resend attempts per block before a transfer is abandoned
    #[arg(long, default_value_t = 10)]
    retries: u8,

    /// Seconds to wait for each acknowledgment
    #[arg(long, default_value_t = 6)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let payload = fs::read(&args.payload)
        .with_context(|| format!("reading payload file {}", args.payload.display()))?;

    let server = Server::new(payload)
        .retries(args.retries)
        .timeout(Duration::from_secs(args.timeout));

    server.listen_and_serve(args.address).await?;
    Ok(())
}
