//! Server forwarder binary: accepts TCP tunnel connections and re-emits
//! decoded frames as UDP datagrams to the configured target.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use udptun::config::{self, Role};
use udptun::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::parse_or_exit();
    let cfg = config::load(args, Role::Server)?;

    let log_level = if cfg.quiet { Level::WARN } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server = Arc::new(Server::new(cfg));
    server.clone().start().await?;

    udptun::wait_for_shutdown().await;

    info!("shutting down...");
    server.stop();

    Ok(())
}
