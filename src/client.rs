//! Client forwarder: receives UDP datagrams locally and forwards them over
//! a TCP connection to the server forwarder.
//!
//! The UDP listen socket is bound once at startup and survives session
//! failures. The TCP connection is redialed with bounded exponential backoff
//! whenever the dial or the running session fails.

use crate::config::Config;
use crate::session::{PeerBinding, Session};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// First redial delay after a dial or session failure.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Cap on the redial delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A session that survives this long counts as healthy and resets the
/// redial backoff.
const STABLE_SESSION_RESET: Duration = Duration::from_secs(5);

/// Client forwarder: UDP in, TCP out.
pub struct Client {
    cfg: Config,
    cancel_token: CancellationToken,
}

impl Client {
    /// Creates a new client forwarder.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Binds the UDP listen socket, resolves the target, and starts the
    /// tunnel loop.
    ///
    /// Returns the bound local address. A bind or target-resolution failure
    /// here is fatal for the caller; dial failures afterwards are retried
    /// internally.
    pub async fn start(self: Arc<Self>) -> io::Result<SocketAddr> {
        let target = crate::config::resolve_target(&self.cfg.target).await?;

        let socket = UdpSocket::bind(&self.cfg.source).await?;
        let addr = socket.local_addr()?;

        info!(
            source = %addr,
            target = %target,
            "starting tunnel client: listening on udp, forwarding over tcp"
        );

        let client = Arc::clone(&self);
        tokio::spawn(async move {
            client.run(Arc::new(socket), target).await;
        });

        Ok(addr)
    }

    /// Stops the client and all of its sessions.
    pub fn stop(&self) {
        self.cancel_token.cancel();
        info!("client stopped");
    }

    async fn run(self: Arc<Self>, socket: Arc<UdpSocket>, target: SocketAddr) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let stream = tokio::select! {
                _ = self.cancel_token.cancelled() => return,
                result = TcpStream::connect(target) => match result {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(target = %target, "could not connect to target: {}", e);

                        tokio::select! {
                            _ = self.cancel_token.cancelled() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                },
            };

            info!(target = %target, "connected to target");

            // The peer binding is fresh per session: the last-sender address
            // does not leak across reconnects.
            let session = Session::new(
                stream,
                Arc::clone(&socket),
                PeerBinding::last_sender(),
                self.cfg.buffer,
                self.cancel_token.child_token(),
            );

            let started = Instant::now();
            session.run().await;

            if self.cancel_token.is_cancelled() {
                return;
            }

            // Connecting alone proves nothing: a server that accepts and
            // promptly closes would otherwise drive a hot reconnect loop.
            // Only a session that stayed up resets the backoff.
            if started.elapsed() >= STABLE_SESSION_RESET {
                backoff = INITIAL_BACKOFF;
            }

            warn!(delay = ?backoff, "tunnel session ended, reconnecting");
            tokio::select! {
                _ = self.cancel_token.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}
