//! Configuration model, URL-form parsing, and loading
//!
//! - [`types`]: the typed model (binds, remotes, log) and its JSON forms
//! - [`url`]: URL-form parsing (`tcp+udp://host:port?...`) and rendering
//! - [`loader`]: file/stdin loading and command line merging

pub mod loader;
pub mod types;
pub mod url;

pub use loader::{load_config, load_config_str, merge_cli_entries};
pub use types::{
    BindConfig, Config, Family, LogConfig, Protocol, ProtocolSet, RemoteConfig, Strategy,
    DEFAULT_DIAL_TIMEOUT, DEFAULT_DNS_READ_TIMEOUT, DEFAULT_RESOLVER_CACHE_SIZE,
    DEFAULT_RESOLVER_CACHE_TTL, DEFAULT_TCP_KEEPALIVE_IDLE, DEFAULT_TCP_KEEPALIVE_INTERVAL,
    DEFAULT_TCP_KEEPALIVE_PROBES, DEFAULT_UDP_BUFFER_SIZE, DEFAULT_UDP_TTL,
    DNS_RESPONSE_BUFFER_SIZE, MAX_DNS_RETRIES,
};
pub use url::{format_duration, parse_bind_url, parse_duration, parse_remote_url};
