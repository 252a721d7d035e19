//! Brain Hub server.
//!
//! Thin transport adapter: terminates one TCP connection per worker and
//! adapts it to a hub session. All coordination logic lives in
//! `brainhub-hub`; this binary only frames, hands off and logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use brainhub_hub::{Hub, HubConfig};

mod conn;

#[derive(Debug, Parser)]
#[command(name = "brainhub-server", version, about = "Brain Hub coordination server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BRAINHUB_BIND", default_value = "127.0.0.1:9200")]
    bind: SocketAddr,

    /// Seconds between heartbeat broadcasts.
    #[arg(long, env = "BRAINHUB_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Outbound queue capacity per worker session.
    #[arg(long, env = "BRAINHUB_QUEUE_CAPACITY", default_value_t = 64)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let hub = Hub::start(HubConfig {
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        session_queue_capacity: args.queue_capacity,
        ..HubConfig::default()
    })
    .await;

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "Brain Hub listening");

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = Arc::clone(&hub);
                    tokio::spawn(async move {
                        conn::serve(hub, stream, peer).await;
                    });
                },
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
        }
    }

    hub.shutdown().await;
    Ok(())
}
