//! Connection Handling
//!
//! One task per connection reads frames and dispatches them to the [`Relay`]
//! in arrival order. A second task drains the connection's outbound queue onto
//! the socket.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::protocol::{
    encode_frame, read_frame, write_encoded, ClientEvent, ProtocolError, WireEvent,
};
use crate::relay::{EventReceiver, Relay};
use crate::room::ConnectionId;

/// Per-connection state
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    relay: Arc<Relay>,
    outbound: EventReceiver,
    max_frame_bytes: usize,
}

impl Connection {
    /// Register a new connection with the relay
    pub fn open(peer_addr: SocketAddr, relay: Arc<Relay>, max_frame_bytes: usize) -> Self {
        let (id, outbound) = relay.connect();
        Self {
            id,
            peer_addr,
            relay,
            outbound,
            max_frame_bytes,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serve the connection until the peer goes away, then leave its room
    pub async fn run<S>(self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Connection {
            id,
            peer_addr,
            relay,
            mut outbound,
            max_frame_bytes,
        } = self;
        info!("Connection {} opened from {}", id, peer_addr);

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let writer_task = tokio::spawn(async move {
            while let Some(event) = outbound.recv().await {
                // The receiver enforces the same limit on what it reads
                let frame = match encode_frame(&event, max_frame_bytes) {
                    Ok(frame) => frame,
                    Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                        warn!("Dropping event for {}: {}", id, e);
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to encode event for {}: {}", id, e);
                        continue;
                    }
                };
                if let Err(e) = write_encoded(&mut write_half, &frame).await {
                    debug!("Write to {} failed: {}", id, e);
                    break;
                }
            }
        });

        let result = async {
            while let Some(body) = read_frame(&mut read_half, max_frame_bytes).await? {
                match ClientEvent::from_bytes(&body) {
                    Ok(event) => {
                        debug!("{} from {}", event.name(), id);
                        relay.handle(id, event);
                    }
                    Err(e) => warn!("Invalid message from {}: {}", peer_addr, e),
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        relay.disconnect(id);
        writer_task.abort();
        info!("Connection {} from {} closed", id, peer_addr);

        result
    }
}

/// Accept connections until the listener fails
pub async fn serve(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    relay: Arc<Relay>,
    max_frame_bytes: usize,
) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let relay = relay.clone();

        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        Connection::open(peer_addr, relay, max_frame_bytes)
                            .run(tls_stream)
                            .await
                    }
                    Err(e) => {
                        error!("TLS handshake failed for {}: {}", peer_addr, e);
                        return;
                    }
                },
                None => {
                    Connection::open(peer_addr, relay, max_frame_bytes)
                        .run(stream)
                        .await
                }
            };

            if let Err(e) = result {
                error!("Client {} error: {}", peer_addr, e);
            }
        });
    }
}
