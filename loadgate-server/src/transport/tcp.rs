//! TCP transport
//!
//! A connection-level gate: every accepted connection is one admission check
//! for its peer. Rejected connections are closed straight away; admitted ones
//! are piped byte for byte to the upstream address.

use super::Transport;
use crate::gate::Gate;
use crate::metrics::Transport as MetricsTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Admit or close a connection from `peer`
///
/// Returns the stream when the gate admits the peer. Otherwise the stream is
/// shut down and `None` is returned. Works with any writable stream, so it can
/// be embedded in servers with their own accept loop.
pub async fn guard_connection<S>(gate: &Gate, mut stream: S, peer: SocketAddr) -> Option<S>
where
    S: AsyncWrite + Unpin,
{
    let client = gate.identity().identify_peer(peer);
    let verdict = gate.check(MetricsTransport::Tcp, &client);
    if verdict.is_admitted() {
        return Some(stream);
    }

    if let Err(e) = stream.shutdown().await {
        tracing::debug!("Failed to close rejected connection from {}: {}", peer, e);
    }
    None
}

/// TCP transport implementation
pub struct TcpTransport {
    host: String,
    port: u16,
    upstream: String,
}

impl TcpTransport {
    /// Create a new TCP transport piping admitted connections to `upstream`
    pub fn new(host: &str, port: u16, upstream: &str) -> Self {
        TcpTransport {
            host: host.to_string(),
            port,
            upstream: upstream.to_string(),
        }
    }

    /// Accept connections from an already bound listener
    pub async fn serve(self, listener: TcpListener, gate: Gate) -> Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let gate = gate.clone();
            let upstream = self.upstream.clone();

            tracing::debug!("New connection from {}", peer_addr);

            tokio::spawn(async move {
                let Some(socket) = guard_connection(&gate, socket, peer_addr).await else {
                    return;
                };

                gate.metrics().connection_opened();
                if let Err(e) = Self::proxy(socket, &upstream).await {
                    gate.metrics().record_upstream_error();
                    tracing::warn!("Connection error from {}: {:#}", peer_addr, e);
                }
                gate.metrics().connection_closed();
                tracing::debug!("Connection closed from {}", peer_addr);
            });
        }
    }

    async fn proxy(mut socket: TcpStream, upstream: &str) -> Result<()> {
        socket.set_nodelay(true)?;

        let mut upstream_socket = TcpStream::connect(upstream)
            .await
            .with_context(|| format!("failed to connect to upstream {upstream}"))?;
        upstream_socket.set_nodelay(true)?;

        let (sent, received) =
            tokio::io::copy_bidirectional(&mut socket, &mut upstream_socket).await?;
        tracing::trace!(sent, received, "connection finished");
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(self, gate: Gate) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!("TCP transport listening on {}, upstream {}", addr, self.upstream);

        self.serve(listener, gate).await
    }
}
