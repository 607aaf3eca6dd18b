//! Error types for rust-relay
//!
//! Errors are categorized by subsystem: configuration, name resolution,
//! outbound dialing, listener construction, and datagram forwarding.
//! Construction-time errors (config, listen) abort startup; per-flow errors
//! are logged and tear down only the affected flow.

use std::io;
use std::net::SocketAddr;

use hickory_proto::op::ResponseCode;
use thiserror::Error;

/// Top-level error type for rust-relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration errors (URL/JSON parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Name resolution errors
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Outbound dialing errors
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    /// Listener construction errors
    #[error("Listen error: {0}")]
    Listen(#[from] ListenError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed bind/remote URL
    #[error("invalid {scope} url '{url}': {reason}")]
    InvalidUrl {
        scope: &'static str,
        url: String,
        reason: String,
    },

    /// Unrecognized query option in a bind/remote URL
    #[error("{scope}: unknown option: {option}")]
    UnknownOption {
        scope: &'static str,
        option: String,
    },

    /// Option value failed to parse (bad bool, duration, address, ...)
    #[error("{scope}({option}): {reason}")]
    InvalidValue {
        scope: &'static str,
        option: String,
        reason: String,
    },

    /// Protocol set parsed to nothing usable
    #[error("invalid protocol set: {0}")]
    InvalidProtocolSet(String),

    /// Required field absent or empty
    #[error("{scope}: {field} must not be empty")]
    MissingField {
        scope: &'static str,
        field: &'static str,
    },

    /// Field value outside its permitted range
    #[error("{scope}: {field} {reason}")]
    OutOfRange {
        scope: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Two remotes share a name
    #[error("duplicated remote name: {0}")]
    DuplicateRemote(String),

    /// Two binds share a name (explicit or synthesized)
    #[error("duplicated bind: {0}")]
    DuplicateBind(String),

    /// A bind references a remote that does not exist
    #[error("remote not found with name: {0}")]
    UnknownRemote(String),

    /// A bind has no remote reference and none can be defaulted
    #[error("no remote specified for {bind}")]
    MissingRemote { bind: String },

    /// Merged configuration has no binds or no remotes
    #[error("no available bind/remote found")]
    EmptyConfig,

    /// JSON parsing error
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// I/O error while reading a config file
    #[error("failed to read configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create an option-value error
    pub fn value(scope: &'static str, option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            scope,
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-URL error
    pub fn url(scope: &'static str, url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            scope,
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Name resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Empty name handed to a resolver
    #[error("empty resolve name")]
    EmptyName,

    /// DNS query could not be serialized
    #[error("failed to serialize dns query: {0}")]
    Serialize(String),

    /// DNS response could not be parsed
    #[error("failed to parse dns response: {0}")]
    Parse(String),

    /// Socket-level failure during a DNS exchange
    #[error("dns exchange with {server} failed: {source}")]
    Exchange {
        server: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No response within the read deadline
    #[error("dns exchange with {server} timed out")]
    Timeout { server: SocketAddr },

    /// Server answered with a non-NOERROR rcode
    #[error("server returned rcode {rcode}")]
    Rcode { rcode: ResponseCode },

    /// Response transaction id does not match the query
    #[error("mismatched dns transaction id")]
    MismatchedId,

    /// Response was truncated
    #[error("truncated dns response")]
    Truncated,

    /// All exchange attempts failed
    #[error("max retries exceeded for {server}")]
    MaxRetries { server: SocketAddr },

    /// System resolver failure
    #[error("system lookup failed: {0}")]
    Lookup(#[source] io::Error),

    /// Resolution succeeded but strategy filtering left nothing
    #[error("no available address found for {name}")]
    NoAddress { name: String },
}

impl ResolveError {
    /// Whether a failed exchange attempt may be retried.
    ///
    /// A non-NOERROR rcode is an authoritative answer and is never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rcode { .. })
    }
}

/// Outbound dialing errors
#[derive(Debug, Error)]
pub enum DialError {
    /// Target string is not of the form `host:port`
    #[error("invalid dial target: {0}")]
    InvalidTarget(String),

    /// Name resolution failed for the target host
    #[error("resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: ResolveError,
    },

    /// Failed to apply a socket option while building the outbound socket
    #[error("failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// A single connect attempt failed
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },

    /// Every candidate address failed; carries the last cause
    #[error("connect to {target} failed: {last}")]
    Exhausted { target: String, last: String },

    /// A single connect attempt exceeded the dial timeout
    #[error("connect to {addr} timed out after {timeout_secs}s")]
    Timeout { addr: SocketAddr, timeout_secs: u64 },
}

impl DialError {
    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Listener construction and inbound lifecycle errors
#[derive(Debug, Error)]
pub enum ListenError {
    /// Listen host is not a literal address or is inconsistent with the family
    #[error("invalid listen address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Socket creation failed
    #[error("failed to create socket: {0}")]
    SocketCreation(String),

    /// Failed to apply a socket option
    #[error("failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to an address
    #[error("failed to bind to {addr}: {reason}")]
    Bind { addr: SocketAddr, reason: String },

    /// Protocol enabled on a bind without the matching handler capability
    #[error("{protocol} handler required")]
    MissingHandler { protocol: &'static str },

    /// Start called twice on the same inbound
    #[error("inbound already started")]
    AlreadyStarted,

    /// I/O error
    #[error("listen I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ListenError {
    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::Bind {
            addr,
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with `RelayError`
pub type Result<T> = std::result::Result<T, RelayError>;
