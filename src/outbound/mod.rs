//! Outbound: the realized form of one remote
//!
//! An [`Outbound`] pairs a [`Dialer`] with the remote's `host:port` target.
//! The forwarder asks it for TCP streams and connected UDP sockets without
//! knowing anything about resolution or socket policy.

use tokio::net::{TcpStream, UdpSocket};
use tracing::info;

use crate::config::Protocol;
use crate::error::DialError;

pub mod dialer;

pub use dialer::{DialConfig, Dialer};

/// Dialer plus target for one named remote
pub struct Outbound {
    name: String,
    dialer: Dialer,
    address: String,
}

impl Outbound {
    #[must_use]
    pub fn new(name: impl Into<String>, dialer: Dialer, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialer,
            address: address.into(),
        }
    }

    /// The remote's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The remote's `host:port` target
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Dial a TCP connection to the remote
    pub async fn dial_tcp(&self) -> Result<TcpStream, DialError> {
        info!(remote = %self.name, network = Protocol::Tcp.as_str(), "new connection");
        self.dialer.dial_tcp(&self.address).await
    }

    /// Dial a connected UDP socket to the remote
    pub async fn dial_udp(&self) -> Result<UdpSocket, DialError> {
        info!(remote = %self.name, network = Protocol::Udp.as_str(), "new connection");
        self.dialer.dial_udp(&self.address).await
    }
}
