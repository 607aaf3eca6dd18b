//! TCP relay path
//!
//! Each accepted connection dials the bind's remote and runs a
//! bidirectional copy until both directions are done. EOF on one side is
//! propagated as a shutdown on the other, so half-close works through the
//! relay. Both sockets close on exit regardless of how the copy ends.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::inbound::ConnHandler;
use crate::outbound::Outbound;

/// Relays accepted connections to one remote
pub struct TcpForwarder {
    outbound: Arc<Outbound>,
}

impl TcpForwarder {
    #[must_use]
    pub fn new(outbound: Arc<Outbound>) -> Self {
        Self { outbound }
    }
}

#[async_trait]
impl ConnHandler for TcpForwarder {
    async fn handle_conn(&self, mut local: TcpStream, peer: SocketAddr) {
        let mut upstream = match self.outbound.dial_tcp().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(remote = %self.outbound.name(), source = %peer, error = %e,
                    "dial new tcp connection failed");
                return;
            }
        };

        debug!(
            source = %peer,
            remote = ?upstream.peer_addr().ok(),
            local = ?upstream.local_addr().ok(),
            "new tcp connection established"
        );

        match tokio::io::copy_bidirectional(&mut local, &mut upstream).await {
            Ok((up, down)) => {
                debug!(source = %peer, bytes_up = up, bytes_down = down, "connection closed");
            }
            Err(e) => {
                debug!(source = %peer, error = %e, "copy connections aborted");
            }
        }
    }
}
