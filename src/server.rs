//! Server forwarder: accepts TCP connections from client forwarders and
//! re-emits decoded frames as UDP datagrams to a fixed target.
//!
//! Each accepted connection gets its own freshly dialed UDP socket and an
//! isolated tunnel session; connections share no session state.

use crate::config::Config;
use crate::session::{PeerBinding, Session};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Server forwarder: TCP in, UDP out.
pub struct Server {
    cfg: Config,
    cancel_token: CancellationToken,
}

impl Server {
    /// Creates a new server forwarder.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Resolves the target, binds the TCP listener, and starts accepting
    /// connections.
    ///
    /// Returns the bound local address. A bind or target-resolution failure
    /// here is fatal for the caller.
    pub async fn start(self: Arc<Self>) -> io::Result<SocketAddr> {
        let target = crate::config::resolve_target(&self.cfg.target).await?;

        let listener = TcpListener::bind(&self.cfg.source).await?;
        let addr = listener.local_addr()?;

        info!(
            source = %addr,
            target = %target,
            "starting tunnel server: listening on tcp, forwarding over udp"
        );

        let server = Arc::clone(&self);
        tokio::spawn(async move {
            server.accept_loop(listener, target).await;
        });

        Ok(addr)
    }

    /// Stops the server and all of its sessions.
    pub fn stop(&self) {
        self.cancel_token.cancel();
        info!("server stopped");
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, target: SocketAddr) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => return,
                result = listener.accept() => match result {
                    Ok((stream, client_addr)) => {
                        info!(client = %client_addr, "stream connection established");

                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_conn(stream, client_addr, target).await;
                        });
                    }
                    Err(e) => {
                        if self.cancel_token.is_cancelled() {
                            return;
                        }
                        error!("accept error: {}", e);
                    }
                },
            }
        }
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream, client_addr: SocketAddr, target: SocketAddr) {
        // Fresh UDP socket per connection: a dial failure drops only this
        // accepted connection.
        let transport = match dial_target(target).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(target = %target, "could not connect to target: {}", e);
                return;
            }
        };

        let session = Session::new(
            stream,
            Arc::new(transport),
            PeerBinding::Dialed,
            self.cfg.buffer,
            self.cancel_token.child_token(),
        );
        session.run().await;

        info!(client = %client_addr, "stream connection closed");
    }
}

async fn dial_target(target: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(target).await?;
    Ok(socket)
}
