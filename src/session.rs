//! The Tunnel Session: two concurrent copy loops bound to one TCP stream
//! and one UDP socket.
//!
//! The datagram→stream loop wraps each received datagram in a length-prefixed
//! frame and writes it to the stream. The stream→datagram loop unwraps one
//! frame at a time and emits its payload as a single datagram. Either loop
//! failing tears the whole session down; the sibling loop is not left
//! running against a dead connection.

use crate::frame::{self, FrameError};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that end a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Decides where the stream→datagram direction sends its payloads.
///
/// A session binds exactly one stream to one UDP socket, so reply routing is
/// the single point of address correlation between the two sides.
pub enum PeerBinding {
    /// Replies go to the most recent sender seen on a shared listening
    /// socket (client side). The address is session state, overwritten on
    /// every inbound datagram.
    LastSender(RwLock<Option<SocketAddr>>),

    /// Replies go to the fixed target the socket was connected to
    /// (server side). No address ambiguity exists here.
    Dialed,
}

impl PeerBinding {
    /// A binding with no peer seen yet; the first inbound datagram sets it.
    pub fn last_sender() -> Self {
        PeerBinding::LastSender(RwLock::new(None))
    }

    async fn recv(&self, socket: &UdpSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self {
            PeerBinding::LastSender(current) => {
                let (n, from) = socket.recv_from(buf).await?;
                *current.write().await = Some(from);
                Ok((n, from))
            }
            PeerBinding::Dialed => {
                let n = socket.recv(buf).await?;
                Ok((n, socket.peer_addr()?))
            }
        }
    }

    async fn send(&self, socket: &UdpSocket, payload: &[u8]) -> io::Result<usize> {
        match self {
            PeerBinding::LastSender(current) => {
                let addr = (*current.read().await).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotConnected, "no datagram peer seen yet")
                })?;
                socket.send_to(payload, addr).await
            }
            PeerBinding::Dialed => socket.send(payload).await,
        }
    }
}

/// One tunnel session over an established stream connection.
pub struct Session {
    stream: TcpStream,
    transport: Arc<UdpSocket>,
    peer: PeerBinding,
    buffer: usize,
    cancel: CancellationToken,
}

impl Session {
    /// Binds a stream connection to a UDP socket with the given reply
    /// routing and maximum datagram transfer size.
    pub fn new(
        stream: TcpStream,
        transport: Arc<UdpSocket>,
        peer: PeerBinding,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            transport,
            peer,
            buffer,
            cancel,
        }
    }

    /// Runs both directions until either fails or the session is cancelled.
    ///
    /// The first direction to fail ends the session; `select!` drops the
    /// sibling loop at its next suspension point.
    pub async fn run(self) {
        let Session {
            stream,
            transport,
            peer,
            buffer,
            cancel,
        } = self;
        let (mut reader, mut writer) = stream.into_split();

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("session cancelled");
            }
            result = datagram_to_stream(&transport, &peer, &mut writer, buffer) => {
                if let Err(e) = result {
                    warn!("datagram to stream direction ended: {}", e);
                }
            }
            result = stream_to_datagram(&mut reader, &transport, &peer) => {
                if let Err(e) = result {
                    warn!("stream to datagram direction ended: {}", e);
                }
            }
        }
    }
}

/// Receives datagrams and writes each one to the stream as a frame.
///
/// A receive failure or a stream write failure ends the direction; an
/// oversized datagram cannot be framed and also ends it.
async fn datagram_to_stream(
    socket: &UdpSocket,
    peer: &PeerBinding,
    writer: &mut OwnedWriteHalf,
    buffer: usize,
) -> Result<(), SessionError> {
    let mut buf = vec![0u8; buffer];

    loop {
        let (n, from) = peer.recv(socket, &mut buf).await?;
        info!(addr = %from, bytes = n, "datagram received");

        let frame = frame::encode(&buf[..n])?;
        debug!("frame payload: {:02x?}", frame);

        writer.write_all(&frame).await?;
    }
}

/// Reads frames from the stream and emits each payload as one datagram.
///
/// A decode failure ends the direction immediately: the stream has no
/// resynchronization point. A datagram send failure is logged and the loop
/// continues, since the UDP socket itself is still usable.
async fn stream_to_datagram(
    reader: &mut OwnedReadHalf,
    socket: &UdpSocket,
    peer: &PeerBinding,
) -> Result<(), SessionError> {
    loop {
        let payload = frame::read_frame(reader).await?;

        match peer.send(socket, &payload).await {
            Ok(n) => info!(bytes = n, "datagram forwarded"),
            Err(e) => warn!("could not forward datagram: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_sender_tracks_most_recent_peer() {
        let shared = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shared_addr = shared.local_addr().unwrap();

        let peer_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let binding = PeerBinding::last_sender();
        let mut buf = vec![0u8; 64];

        peer_a.send_to(b"from a", shared_addr).await.unwrap();
        let (n, from) = binding.recv(&shared, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"from a");
        assert_eq!(from, peer_a.local_addr().unwrap());

        peer_b.send_to(b"from b", shared_addr).await.unwrap();
        binding.recv(&shared, &mut buf).await.unwrap();

        // Replies now route to the most recent sender.
        binding.send(&shared, b"reply").await.unwrap();
        let mut reply = vec![0u8; 64];
        let (n, _) = peer_b.recv_from(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"reply");
    }

    #[tokio::test]
    async fn test_last_sender_send_without_peer_fails() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let binding = PeerBinding::last_sender();

        let err = binding.send(&socket, b"orphan").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_dialed_binding_uses_connected_target() {
        let target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();

        let dialed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        dialed.connect(target_addr).await.unwrap();

        let binding = PeerBinding::Dialed;
        binding.send(&dialed, b"to target").await.unwrap();

        let mut buf = vec![0u8; 64];
        let (n, from) = target.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"to target");
        assert_eq!(from, dialed.local_addr().unwrap());
    }
}
