//! Entry point for `udp-stream`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing, stdin/stdout plumbing).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use udp_stream::{StreamConfig, StreamConnection, UdpTransport};

/// Reliable byte stream over UDP between two fixed endpoints.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Stream stdin to the peer and wait until it is acknowledged.
    Send {
        #[command(flatten)]
        endpoints: Endpoints,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Read exactly `len` bytes from the peer and write them to stdout.
    Recv {
        #[command(flatten)]
        endpoints: Endpoints,
        #[command(flatten)]
        tuning: Tuning,
        /// Number of bytes to read.
        #[arg(short = 'n', long)]
        len: usize,
        /// Keep acknowledging the peer until it is quiet this long (ms).
        #[arg(long, default_value_t = 500)]
        linger_ms: u64,
    },
}

#[derive(Args)]
struct Endpoints {
    /// Local address to bind (e.g. 0.0.0.0:9000).
    #[arg(short, long)]
    local: SocketAddr,
    /// Remote peer address (e.g. 127.0.0.1:9001).
    #[arg(short, long)]
    remote: SocketAddr,
}

#[derive(Args)]
struct Tuning {
    /// Maximum segment size in bytes.
    #[arg(long, default_value_t = udp_stream::config::DEFAULT_MSS)]
    mss: usize,
    /// Send window in bytes (defaults to 10 × MSS).
    #[arg(long)]
    window: Option<usize>,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 50)]
    ack_timeout_ms: u64,
    /// Receive poll timeout in milliseconds.
    #[arg(long, default_value_t = 50)]
    read_timeout_ms: u64,
    /// Silent rounds before the peer is presumed gone.
    #[arg(long, default_value_t = udp_stream::config::DEFAULT_ACK_CRIT_LAG)]
    crit_lag: u32,
}

impl Tuning {
    fn to_config(&self) -> StreamConfig {
        let mut config = StreamConfig::default()
            .with_mss(self.mss)
            .with_ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_ack_crit_lag(self.crit_lag);
        if let Some(window) = self.window {
            config = config.with_window_size(window);
        }
        config
    }
}

async fn open(
    endpoints: &Endpoints,
    tuning: &Tuning,
) -> anyhow::Result<StreamConnection<UdpTransport>> {
    let transport = UdpTransport::bind(endpoints.local, endpoints.remote)
        .await
        .with_context(|| format!("binding {}", endpoints.local))?;
    let conn = StreamConnection::new(transport, tuning.to_config())?;
    Ok(conn)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.mode {
        Mode::Send { endpoints, tuning } => {
            let mut input = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut input)
                .await
                .context("reading stdin")?;

            log::info!(
                "sending {} bytes from {} to {}",
                input.len(),
                endpoints.local,
                endpoints.remote
            );
            let mut conn = open(&endpoints, &tuning).await?;
            let accepted = conn.send(&input).await?;
            let confirmed = conn.confirmed_bytes();
            log::info!("accepted {accepted} bytes, confirmed {confirmed} [{}]", conn.stats());
            conn.close();

            if confirmed < input.len() as u64 {
                eprintln!("peer stopped answering after {confirmed} of {} bytes", input.len());
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Mode::Recv {
            endpoints,
            tuning,
            len,
            linger_ms,
        } => {
            log::info!(
                "receiving {} bytes on {} from {}",
                len,
                endpoints.local,
                endpoints.remote
            );
            let mut conn = open(&endpoints, &tuning).await?;
            let data = conn.recv(len).await?;

            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await.context("writing stdout")?;
            stdout.flush().await?;

            conn.linger(Duration::from_millis(linger_ms)).await?;
            log::info!("done [{}]", conn.stats());
            conn.close();
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    run(cli).await
}
