//! Poll a power station and print one JSON object per successful poll.
//!
//! JSON lines go to stdout, diagnostics go to stderr via `tracing` (set
//! `RUST_LOG` to control verbosity). A failed poll emits no line.

use anyhow::Context;
use clap::Parser;
use solixread::{Error, StationClient};
use tokio::time::{Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Poll an Anker Solix power station over BLE and emit JSON lines")]
struct Args {
    /// Advertised Bluetooth name of the device
    device: String,

    /// Seconds between polls
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Seconds to wait for a complete status response
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let fetch_timeout = Duration::from_secs(args.timeout);

    let mut client = StationClient::new(&args.device)
        .await
        .with_context(|| format!("connecting to '{}'", args.device))?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match client.fetch(fetch_timeout).await {
            Ok(snapshot) => {
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            // The next fetch reconnects through the adapter.
            Err(err @ Error::ConnectionLost) => tracing::warn!(%err, "poll failed"),
            Err(err @ Error::Timeout(_)) => tracing::warn!(%err, "poll failed"),
            Err(err) => tracing::error!(%err, "poll failed"),
        }
    }
}
