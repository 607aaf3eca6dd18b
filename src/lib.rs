//! rust-relay: user-space layer-4 traffic forwarder
//!
//! Accepts TCP connections and UDP datagrams on configured local endpoints
//! ("binds") and relays each flow to a named upstream ("remote"), with
//! per-remote outbound socket policy and a caching resolver pipeline.
//!
//! # Features
//!
//! - **Multiple binds and remotes**: any number of listeners, each
//!   forwarding to a named remote
//! - **Protocol selection per bind**: TCP, UDP, or both
//! - **Outbound socket policy**: source address per family, interface
//!   binding (`SO_BINDTODEVICE`), firewall mark (`SO_MARK`), multipath
//!   TCP, UDP fragmentation control
//! - **Resolver pipeline**: system resolver or per-remote DNS server,
//!   fronted by an LRU cache honoring record TTLs
//! - **UDP NAT table**: one long-lived upstream socket per client
//!   endpoint, idle expiry, refused-read tolerance
//!
//! # Architecture
//!
//! ```text
//! Client ──► Inbound (bind) ──► Forwarder ──► Outbound (remote) ──► Upstream
//!                                                  │
//!                                            Dialer ◄── Cached resolver
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use rust_relay::config::{load_config_str, merge_cli_entries};
//! use rust_relay::service::Service;
//!
//! # fn example() -> Result<(), rust_relay::error::RelayError> {
//! let mut config = load_config_str(r#"{ "remotes": [ "ex://203.0.113.7:48000" ] }"#)?;
//! merge_cli_entries(&mut config, &["tcp+udp://:9500?remote=ex".into()], &[])?;
//!
//! let service = Service::new(config)?;
//! service.start()?;
//! // ... wait for shutdown signal ...
//! service.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: configuration model, URL forms, loading
//! - [`error`]: error types
//! - [`resolve`]: system resolver, DNS client, caching resolver
//! - [`inbound`]: listening sockets and dispatch loops
//! - [`outbound`]: dialer and realized remotes
//! - [`forward`]: the TCP relay and the UDP NAT table
//! - [`service`]: supervisor wiring configuration into the graphs

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod error;
pub mod forward;
pub mod inbound;
pub mod outbound;
pub mod resolve;
pub mod service;
mod sockopt;

// Re-export commonly used types at the crate root
pub use config::{BindConfig, Config, LogConfig, Protocol, ProtocolSet, RemoteConfig, Strategy};
pub use error::{ConfigError, DialError, ListenError, RelayError, ResolveError};
pub use forward::{TcpForwarder, UdpForwarder};
pub use inbound::{
    ConnHandler, Inbound, ListenerBuilder, ListenerOptions, PacketHandler, PacketWriter,
};
pub use outbound::{DialConfig, Dialer, Outbound};
pub use resolve::{Answers, CachedResolver, DnsClient, Exchanger, Resolver, SystemResolver};
pub use service::Service;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
