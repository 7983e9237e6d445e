//! Client forwarder binary: listens for UDP datagrams and forwards them
//! over a TCP tunnel connection.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use udptun::client::Client;
use udptun::config::{self, Role};

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::parse_or_exit();
    let cfg = config::load(args, Role::Client)?;

    let log_level = if cfg.quiet { Level::WARN } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = Arc::new(Client::new(cfg));
    client.clone().start().await?;

    udptun::wait_for_shutdown().await;

    info!("shutting down...");
    client.stop();

    Ok(())
}
