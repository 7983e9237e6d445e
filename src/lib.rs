//! udptun - tunnels UDP datagrams over a TCP connection using
//! length-prefixed frames.

pub mod client;
pub mod config;
pub mod frame;
pub mod server;
pub mod session;

use tokio::signal;

/// Blocks until the process receives a shutdown signal.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    }
}
