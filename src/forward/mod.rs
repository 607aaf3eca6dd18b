//! Forwarder: the data plane
//!
//! - [`tcp`]: per-connection bidirectional relay with half-close propagation
//! - [`udp`]: NAT table mapping each client endpoint to a long-lived
//!   upstream socket, with idle expiry and refused-read tolerance

pub mod tcp;
pub mod udp;

pub use tcp::TcpForwarder;
pub use udp::UdpForwarder;
