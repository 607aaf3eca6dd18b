//! UDP relay path: the NAT table
//!
//! Every datagram is keyed by its client source endpoint. The first
//! datagram from a new endpoint dials a connected upstream socket and
//! spawns an upstream-read task; later datagrams reuse that socket. The
//! read task alone owns the flow's lifecycle: it forwards replies back
//! through the inbound's [`PacketWriter`], evicts the table entry when the
//! idle TTL expires, and tolerates connection-refused reads so a flow
//! whose peer is not listening yet survives until the TTL.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use crate::inbound::{PacketHandler, PacketWriter};
use crate::outbound::Outbound;

struct UdpFlow {
    upstream: Arc<UdpSocket>,
}

/// NAT-table forwarder for one bind
pub struct UdpForwarder {
    outbound: Arc<Outbound>,
    ttl: Duration,
    buffer_size: usize,
    table: Arc<DashMap<SocketAddr, UdpFlow>>,
    shutdown: broadcast::Sender<()>,
}

impl UdpForwarder {
    /// `shutdown` is the bind's channel: one send closes every flow.
    #[must_use]
    pub fn new(
        outbound: Arc<Outbound>,
        ttl: Duration,
        buffer_size: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            outbound,
            ttl,
            buffer_size,
            table: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    /// Number of live flows in the table
    #[must_use]
    pub fn active_flows(&self) -> usize {
        self.table.len()
    }
}

#[async_trait]
impl PacketHandler for UdpForwarder {
    async fn handle_packet(&self, payload: &[u8], client: SocketAddr, writer: &PacketWriter) {
        // Hit: write through the existing flow. Errors are logged but do
        // not evict; the upstream-read task owns the lifecycle.
        let existing = self
            .table
            .get(&client)
            .map(|flow| Arc::clone(&flow.upstream));
        if let Some(upstream) = existing {
            if let Err(e) = upstream.send(payload).await {
                error!(source = %client, error = %e, "write message error");
            }
            return;
        }

        // Miss: dial a new upstream socket, register the flow, spawn its
        // read task, then forward the datagram that created it.
        let upstream = match self.outbound.dial_udp().await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(source = %client, error = %e, "dial new udp connection failed");
                return;
            }
        };
        self.table.insert(
            client,
            UdpFlow {
                upstream: Arc::clone(&upstream),
            },
        );
        debug!(
            source = %client,
            remote = ?upstream.peer_addr().ok(),
            local = ?upstream.local_addr().ok(),
            "new udp connection established"
        );

        tokio::spawn(flow_loop(
            Arc::clone(&self.table),
            client,
            Arc::clone(&upstream),
            writer.clone(),
            self.ttl,
            self.buffer_size,
            self.shutdown.subscribe(),
        ));

        if let Err(e) = upstream.send(payload).await {
            error!(source = %client, error = %e, "write udp message failed");
        }
    }
}

/// Per-flow upstream read task.
///
/// Exactly one of these exists per table entry; it is the only remover of
/// its own key.
async fn flow_loop(
    table: Arc<DashMap<SocketAddr, UdpFlow>>,
    client: SocketAddr,
    upstream: Arc<UdpSocket>,
    writer: PacketWriter,
    ttl: Duration,
    buffer_size: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; buffer_size];
    'flow: loop {
        // One idle deadline per iteration; a forwarded datagram starts the
        // next iteration with a fresh deadline, a refused read does not.
        let deadline = Instant::now() + ttl;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break 'flow,

                read = timeout_at(deadline, upstream.recv(&mut buf)) => match read {
                    // idle ttl expired
                    Err(_) => break 'flow,
                    Ok(Ok(n)) => {
                        if n == 0 {
                            error!(source = %client, "zero-length udp read with non-empty buffer, closing flow");
                            break 'flow;
                        }
                        writer.write_packet(&buf[..n], client).await;
                        continue 'flow;
                    }
                    // Refusal reported for an earlier write: the peer is not
                    // listening yet. Keep reading until the idle ttl expires.
                    Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {}
                    Ok(Err(e)) => {
                        debug!(source = %client, error = %e, "udp upstream read error");
                        break 'flow;
                    }
                }
            }
        }
    }
    table.remove(&client);
    debug!(source = %client, "udp connection closed");
}
