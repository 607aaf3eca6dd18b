//! Configuration types for rust-relay
//!
//! The typed model behind both configuration surfaces: JSON objects and
//! URL-form strings. A bind or remote may appear in JSON as either form;
//! the string form is detected by the `://` substring and routed through
//! the URL parser in [`super::url`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::url::{format_duration, parse_bind_url, parse_duration, parse_remote_url};
use crate::error::ConfigError;

/// TCP keepalive idle time before the first probe
pub const DEFAULT_TCP_KEEPALIVE_IDLE: Duration = Duration::from_secs(600);
/// Interval between TCP keepalive probes
pub const DEFAULT_TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(75);
/// Number of keepalive probes before the peer is declared dead
pub const DEFAULT_TCP_KEEPALIVE_PROBES: u32 = 16;

/// Default outbound dial timeout
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read deadline for a single DNS exchange
pub const DEFAULT_DNS_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Receive buffer for DNS responses (EDNS0-sized)
pub const DNS_RESPONSE_BUFFER_SIZE: usize = 4096;
/// Attempts per DNS exchange before giving up
pub const MAX_DNS_RETRIES: u32 = 3;

/// Default idle TTL for a UDP flow
pub const DEFAULT_UDP_TTL: Duration = Duration::from_secs(60);
/// Default UDP read buffer (largest datagram over IPv4)
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 65_507;

/// Entries in the shared system-resolver cache
pub const DEFAULT_RESOLVER_CACHE_SIZE: u64 = 512;
/// Fixed TTL for entries in the shared system-resolver cache
pub const DEFAULT_RESOLVER_CACHE_TTL: Duration = Duration::from_secs(300);

/// A transport protocol a bind can accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// The lowercase wire name of the protocol
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PROTO_TCP: u8 = 0b01;
const PROTO_UDP: u8 = 0b10;

/// Set of protocols enabled on a bind, stored as a two-bit set.
///
/// String parsing happens only at the configuration boundary; internally
/// membership checks are bit tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolSet {
    bits: u8,
}

impl ProtocolSet {
    /// The empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Both TCP and UDP
    #[must_use]
    pub const fn both() -> Self {
        Self {
            bits: PROTO_TCP | PROTO_UDP,
        }
    }

    /// A single-protocol set
    #[must_use]
    pub const fn single(protocol: Protocol) -> Self {
        Self {
            bits: match protocol {
                Protocol::Tcp => PROTO_TCP,
                Protocol::Udp => PROTO_UDP,
            },
        }
    }

    /// Add a protocol to the set
    pub fn insert(&mut self, protocol: Protocol) {
        self.bits |= Self::single(protocol).bits;
    }

    /// Whether the set contains `protocol`
    #[must_use]
    pub const fn contains(self, protocol: Protocol) -> bool {
        self.bits & Self::single(protocol).bits != 0
    }

    /// Whether the set is empty
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Parse a `+`-joined protocol list.
    ///
    /// Known tokens are `tcp`, `udp` and `ip` (which selects both).
    /// Unknown tokens are dropped; duplicates collapse into the set.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut set = Self::empty();
        for token in s.split('+') {
            match token {
                "tcp" => set.insert(Protocol::Tcp),
                "udp" => set.insert(Protocol::Udp),
                "ip" => {
                    set.insert(Protocol::Tcp);
                    set.insert(Protocol::Udp);
                }
                _ => {}
            }
        }
        set
    }
}

impl fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            if self.contains(protocol) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(protocol.as_str())?;
                first = false;
            }
        }
        Ok(())
    }
}

impl Serialize for ProtocolSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = ProtocolSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a protocol string like \"tcp+udp\" or an array of protocol strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ProtocolSet, E> {
                let set = ProtocolSet::parse(v);
                if set.is_empty() {
                    return Err(E::custom(format!("invalid protocol set: {v}")));
                }
                Ok(set)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<ProtocolSet, A::Error> {
                let mut set = ProtocolSet::empty();
                while let Some(token) = seq.next_element::<String>()? {
                    let parsed = ProtocolSet::parse(&token);
                    set.bits |= parsed.bits;
                }
                if set.is_empty() {
                    return Err(de::Error::custom("invalid protocol set: empty"));
                }
                Ok(set)
            }
        }

        deserializer.deserialize_any(SetVisitor)
    }
}

/// Address family preference and filter for a remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Default,
    PreferIpv4,
    PreferIpv6,
    Ipv4Only,
    Ipv6Only,
}

impl Strategy {
    /// The configuration string for the strategy
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PreferIpv4 => "prefer_ipv4",
            Self::PreferIpv6 => "prefer_ipv6",
            Self::Ipv4Only => "ipv4_only",
            Self::Ipv6Only => "ipv6_only",
        }
    }

    /// Parse a strategy string; unknown values are rejected
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "" | "default" => Ok(Self::Default),
            "prefer_ipv4" => Ok(Self::PreferIpv4),
            "prefer_ipv6" => Ok(Self::PreferIpv6),
            "ipv4_only" => Ok(Self::Ipv4Only),
            "ipv6_only" => Ok(Self::Ipv6Only),
            _ => Err(ConfigError::value(
                "remote",
                "strategy",
                format!("unknown strategy: {s}"),
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family selector for a bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    #[default]
    Any,
    V4,
    V6,
}

impl Family {
    /// The configuration string for the family
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "",
            Self::V4 => "4",
            Self::V6 => "6",
        }
    }

    /// Whether this is the unconstrained selector
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Parse a family string; unknown values are rejected
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "" => Ok(Self::Any),
            "4" | "v4" | "ipv4" => Ok(Self::V4),
            "6" | "v6" | "ipv6" => Ok(Self::V6),
            _ => Err(ConfigError::value(
                "bind",
                "family",
                format!("unknown family: {s}"),
            )),
        }
    }
}

impl Serialize for Family {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// Serde glue for durations: serialized as strings like `1m30s`,
/// deserialized from either a duration string or a bare integer of seconds.
pub(crate) mod duration_serde {
    use super::{format_duration, parse_duration, Duration};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration string like \"60s\" or an integer of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse_duration(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("negative duration"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// One local listening endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BindConfig {
    /// Listen host; empty means the unspecified address of the family
    pub listen: String,
    /// Listen port
    pub port: u16,
    /// Name of the remote this bind forwards to
    pub remote: Option<String>,
    /// Explicit bind name; `(host:port)` is synthesized when absent
    pub name: Option<String>,
    /// Enabled protocols
    pub network: ProtocolSet,
    /// Address family selector
    pub family: Family,
    /// Bind the listening sockets to a named interface
    pub interface: Option<String>,
    /// Set `SO_REUSEADDR` on the listening sockets
    pub reuse_addr: bool,
    /// Enable TCP Fast Open on the TCP listener
    pub tfo: bool,
    /// Listen with multipath TCP
    pub mptcp: bool,
    /// Idle TTL after which a UDP flow is evicted
    pub udp_ttl: Duration,
    /// Exact size of the UDP read buffer in bytes
    pub udp_buffer_size: usize,
    /// Allow UDP fragmentation on the listening socket
    pub udp_fragment: bool,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            listen: String::new(),
            port: 0,
            remote: None,
            name: None,
            network: ProtocolSet::both(),
            family: Family::Any,
            interface: None,
            reuse_addr: false,
            tfo: false,
            mptcp: false,
            udp_ttl: DEFAULT_UDP_TTL,
            udp_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
            udp_fragment: false,
        }
    }
}

impl BindConfig {
    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::OutOfRange {
                scope: "bind",
                field: "port",
                reason: "must be in 1..65535".into(),
            });
        }
        if self.network.is_empty() {
            return Err(ConfigError::InvalidProtocolSet("empty".into()));
        }
        if self.udp_buffer_size == 0 {
            return Err(ConfigError::OutOfRange {
                scope: "bind",
                field: "udp_buffer_size",
                reason: "can not be zero".into(),
            });
        }
        if self.udp_ttl.is_zero() {
            return Err(ConfigError::OutOfRange {
                scope: "bind",
                field: "udp_ttl",
                reason: "can not be zero".into(),
            });
        }
        Ok(())
    }

    /// The bind's identifier for logs and duplicate detection:
    /// the explicit name, or a synthesized `(host:port)`.
    #[must_use]
    pub fn identifier(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("({}:{})", self.listen, self.port),
        }
    }
}

/// Mirror struct for the JSON object form of a bind
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BindRepr {
    listen: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    network: ProtocolSet,
    #[serde(skip_serializing_if = "Family::is_any")]
    family: Family,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<String>,
    reuse_addr: bool,
    tfo: bool,
    mptcp: bool,
    #[serde(with = "duration_serde")]
    udp_ttl: Duration,
    udp_buffer_size: usize,
    udp_fragment: bool,
}

impl Default for BindRepr {
    fn default() -> Self {
        Self::from(&BindConfig::default())
    }
}

impl From<&BindConfig> for BindRepr {
    fn from(c: &BindConfig) -> Self {
        Self {
            listen: c.listen.clone(),
            port: c.port,
            remote: c.remote.clone(),
            name: c.name.clone(),
            network: c.network,
            family: c.family,
            interface: c.interface.clone(),
            reuse_addr: c.reuse_addr,
            tfo: c.tfo,
            mptcp: c.mptcp,
            udp_ttl: c.udp_ttl,
            udp_buffer_size: c.udp_buffer_size,
            udp_fragment: c.udp_fragment,
        }
    }
}

impl From<BindRepr> for BindConfig {
    fn from(r: BindRepr) -> Self {
        Self {
            listen: r.listen,
            port: r.port,
            remote: r.remote,
            name: r.name,
            network: r.network,
            family: r.family,
            interface: r.interface,
            reuse_addr: r.reuse_addr,
            tfo: r.tfo,
            mptcp: r.mptcp,
            udp_ttl: r.udp_ttl,
            udp_buffer_size: r.udp_buffer_size,
            udp_fragment: r.udp_fragment,
        }
    }
}

/// Either form a bind or remote may take in JSON
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigForm<R> {
    Url(String),
    Object(R),
}

impl<'de> Deserialize<'de> for BindConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ConfigForm::<BindRepr>::deserialize(deserializer)? {
            ConfigForm::Url(s) => {
                if !s.contains("://") {
                    return Err(de::Error::custom(format!("bind: not a url: {s}")));
                }
                parse_bind_url(&s).map_err(de::Error::custom)
            }
            ConfigForm::Object(repr) => {
                let config = Self::from(repr);
                config.validate().map_err(de::Error::custom)?;
                Ok(config)
            }
        }
    }
}

impl Serialize for BindConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BindRepr::from(self).serialize(serializer)
    }
}

/// One named upstream target with dial policy
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Unique remote name, referenced by binds
    pub name: String,
    /// Upstream host: a domain or a literal IP
    pub server: String,
    /// Upstream port
    pub port: u16,
    /// Dedicated DNS server for this remote; system resolver when absent
    pub dns: Option<IpAddr>,
    /// Address family strategy
    pub strategy: Strategy,
    /// Per-attempt dial timeout
    pub timeout: Duration,
    /// Set `SO_REUSEADDR` on outbound sockets
    pub reuse_addr: bool,
    /// Bind outbound sockets to a named interface
    pub interface: Option<String>,
    /// Source address for IPv4 candidates
    pub bind_address4: Option<Ipv4Addr>,
    /// Source address for IPv6 candidates
    pub bind_address6: Option<Ipv6Addr>,
    /// Firewall mark for policy routing; zero means unset
    pub fwmark: u32,
    /// Dial with multipath TCP
    pub mptcp: bool,
    /// Allow UDP fragmentation on outbound sockets
    pub udp_fragment: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            server: String::new(),
            port: 0,
            dns: None,
            strategy: Strategy::Default,
            timeout: DEFAULT_DIAL_TIMEOUT,
            reuse_addr: false,
            interface: None,
            bind_address4: None,
            bind_address6: None,
            fwmark: 0,
            mptcp: false,
            udp_fragment: false,
        }
    }
}

impl RemoteConfig {
    /// Validate required fields and ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                scope: "remote",
                field: "name",
            });
        }
        if self.server.is_empty() {
            return Err(ConfigError::MissingField {
                scope: "remote",
                field: "server",
            });
        }
        if self.port == 0 {
            return Err(ConfigError::OutOfRange {
                scope: "remote",
                field: "port",
                reason: "must be in 1..65535".into(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                scope: "remote",
                field: "timeout",
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// The `host:port` dial target for this remote
    #[must_use]
    pub fn address(&self) -> String {
        if self.server.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}

/// Mirror struct for the JSON object form of a remote
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RemoteRepr {
    name: String,
    server: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    dns: Option<IpAddr>,
    strategy: Strategy,
    #[serde(with = "duration_serde")]
    timeout: Duration,
    reuse_addr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address6: Option<Ipv6Addr>,
    fwmark: u32,
    mptcp: bool,
    udp_fragment: bool,
}

impl Default for RemoteRepr {
    fn default() -> Self {
        Self::from(&RemoteConfig::default())
    }
}

impl From<&RemoteConfig> for RemoteRepr {
    fn from(c: &RemoteConfig) -> Self {
        Self {
            name: c.name.clone(),
            server: c.server.clone(),
            port: c.port,
            dns: c.dns,
            strategy: c.strategy,
            timeout: c.timeout,
            reuse_addr: c.reuse_addr,
            interface: c.interface.clone(),
            bind_address4: c.bind_address4,
            bind_address6: c.bind_address6,
            fwmark: c.fwmark,
            mptcp: c.mptcp,
            udp_fragment: c.udp_fragment,
        }
    }
}

impl From<RemoteRepr> for RemoteConfig {
    fn from(r: RemoteRepr) -> Self {
        Self {
            name: r.name,
            server: r.server,
            port: r.port,
            dns: r.dns,
            strategy: r.strategy,
            timeout: r.timeout,
            reuse_addr: r.reuse_addr,
            interface: r.interface,
            bind_address4: r.bind_address4,
            bind_address6: r.bind_address6,
            fwmark: r.fwmark,
            mptcp: r.mptcp,
            udp_fragment: r.udp_fragment,
        }
    }
}

impl<'de> Deserialize<'de> for RemoteConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ConfigForm::<RemoteRepr>::deserialize(deserializer)? {
            ConfigForm::Url(s) => {
                if !s.contains("://") {
                    return Err(de::Error::custom(format!("remote: not a url: {s}")));
                }
                parse_remote_url(&s).map_err(de::Error::custom)
            }
            ConfigForm::Object(repr) => {
                let config = Self::from(repr);
                config.validate().map_err(de::Error::custom)?;
                Ok(config)
            }
        }
    }
}

impl Serialize for RemoteConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RemoteRepr::from(self).serialize(serializer)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Discard all log output
    pub disable: bool,
    /// Log level: trace, debug, info, warn, error (empty means info)
    pub level: String,
    /// Output format: console (default) or json
    pub format: String,
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local listening endpoints
    pub binds: Vec<BindConfig>,
    /// Named upstream targets
    pub remotes: Vec<RemoteConfig>,
    /// Logging configuration
    pub log: LogConfig,
}

impl Config {
    /// Validate every bind and remote
    pub fn validate(&self) -> Result<(), ConfigError> {
        for bind in &self.binds {
            bind.validate()?;
        }
        for remote in &self.remotes {
            remote.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_set_parse() {
        assert_eq!(ProtocolSet::parse("tcp"), ProtocolSet::single(Protocol::Tcp));
        assert_eq!(ProtocolSet::parse("udp"), ProtocolSet::single(Protocol::Udp));
        assert_eq!(ProtocolSet::parse("tcp+udp"), ProtocolSet::both());
        assert_eq!(ProtocolSet::parse("ip"), ProtocolSet::both());
        // duplicates collapse, unknown tokens are dropped
        assert_eq!(ProtocolSet::parse("tcp+tcp"), ProtocolSet::single(Protocol::Tcp));
        assert_eq!(ProtocolSet::parse("tcp+bogus"), ProtocolSet::single(Protocol::Tcp));
        assert!(ProtocolSet::parse("bogus").is_empty());
        assert!(ProtocolSet::parse("").is_empty());
    }

    #[test]
    fn test_protocol_set_display() {
        assert_eq!(ProtocolSet::both().to_string(), "tcp+udp");
        assert_eq!(ProtocolSet::single(Protocol::Udp).to_string(), "udp");
        assert_eq!(ProtocolSet::empty().to_string(), "");
    }

    #[test]
    fn test_protocol_set_json_forms() {
        let s: ProtocolSet = serde_json::from_str("\"tcp+udp\"").unwrap();
        assert_eq!(s, ProtocolSet::both());

        let s: ProtocolSet = serde_json::from_str("[\"tcp\",\"udp\"]").unwrap();
        assert_eq!(s, ProtocolSet::both());

        assert!(serde_json::from_str::<ProtocolSet>("\"bogus\"").is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse("").unwrap(), Strategy::Default);
        assert_eq!(Strategy::parse("default").unwrap(), Strategy::Default);
        assert_eq!(Strategy::parse("prefer_ipv4").unwrap(), Strategy::PreferIpv4);
        assert_eq!(Strategy::parse("ipv6_only").unwrap(), Strategy::Ipv6Only);
        assert!(Strategy::parse("prefer_v4").is_err());
    }

    #[test]
    fn test_strategy_serde_names() {
        let s: Strategy = serde_json::from_str("\"ipv4_only\"").unwrap();
        assert_eq!(s, Strategy::Ipv4Only);
        assert_eq!(serde_json::to_string(&Strategy::PreferIpv6).unwrap(), "\"prefer_ipv6\"");
        assert!(serde_json::from_str::<Strategy>("\"v4\"").is_err());
    }

    #[test]
    fn test_family_parse() {
        assert_eq!(Family::parse("").unwrap(), Family::Any);
        assert_eq!(Family::parse("4").unwrap(), Family::V4);
        assert_eq!(Family::parse("v6").unwrap(), Family::V6);
        assert!(Family::parse("10").is_err());
    }

    #[test]
    fn test_bind_validation() {
        let mut bind = BindConfig {
            listen: "127.0.0.1".into(),
            port: 9500,
            ..BindConfig::default()
        };
        bind.validate().unwrap();

        bind.udp_buffer_size = 0;
        assert!(bind.validate().is_err());

        bind.udp_buffer_size = DEFAULT_UDP_BUFFER_SIZE;
        bind.udp_ttl = Duration::ZERO;
        assert!(bind.validate().is_err());

        bind.udp_ttl = DEFAULT_UDP_TTL;
        bind.port = 0;
        assert!(bind.validate().is_err());
    }

    #[test]
    fn test_bind_identifier() {
        let bind = BindConfig {
            listen: "127.0.0.1".into(),
            port: 9500,
            ..BindConfig::default()
        };
        assert_eq!(bind.identifier(), "(127.0.0.1:9500)");

        let named = BindConfig {
            name: Some("edge".into()),
            ..bind
        };
        assert_eq!(named.identifier(), "edge");
    }

    #[test]
    fn test_remote_validation() {
        let mut remote = RemoteConfig {
            name: "ex".into(),
            server: "example.com".into(),
            port: 443,
            ..RemoteConfig::default()
        };
        remote.validate().unwrap();

        remote.name = String::new();
        assert!(remote.validate().is_err());

        remote.name = "ex".into();
        remote.timeout = Duration::ZERO;
        assert!(remote.validate().is_err());
    }

    #[test]
    fn test_remote_address_formatting() {
        let remote = RemoteConfig {
            name: "ex".into(),
            server: "2001:db8::5".into(),
            port: 443,
            ..RemoteConfig::default()
        };
        assert_eq!(remote.address(), "[2001:db8::5]:443");

        let remote = RemoteConfig {
            server: "example.com".into(),
            ..remote
        };
        assert_eq!(remote.address(), "example.com:443");
    }

    #[test]
    fn test_bind_json_object_form() {
        let json = r#"{
            "listen": "127.0.0.1",
            "port": 9500,
            "remote": "ex",
            "network": "udp",
            "udp_ttl": "2s"
        }"#;
        let bind: BindConfig = serde_json::from_str(json).unwrap();
        assert_eq!(bind.port, 9500);
        assert_eq!(bind.remote.as_deref(), Some("ex"));
        assert_eq!(bind.network, ProtocolSet::single(Protocol::Udp));
        assert_eq!(bind.udp_ttl, Duration::from_secs(2));
        // omitted fields take defaults
        assert_eq!(bind.udp_buffer_size, DEFAULT_UDP_BUFFER_SIZE);
    }

    #[test]
    fn test_bind_json_string_form() {
        let bind: BindConfig =
            serde_json::from_str("\"tcp://127.0.0.1:9500?remote=ex\"").unwrap();
        assert_eq!(bind.listen, "127.0.0.1");
        assert_eq!(bind.port, 9500);
        assert_eq!(bind.network, ProtocolSet::single(Protocol::Tcp));
        assert_eq!(bind.remote.as_deref(), Some("ex"));
    }

    #[test]
    fn test_bind_json_round_trip() {
        let json = r#"{
            "listen": "::1",
            "port": 9501,
            "remote": "up",
            "name": "edge",
            "network": "tcp+udp",
            "family": "6",
            "reuse_addr": true,
            "udp_ttl": "90s",
            "udp_buffer_size": 2048
        }"#;
        let first: BindConfig = serde_json::from_str(json).unwrap();
        let emitted = serde_json::to_string(&first).unwrap();
        let second: BindConfig = serde_json::from_str(&emitted).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_remote_json_round_trip() {
        let json = r#"{
            "name": "ex",
            "server": "example.com",
            "port": 443,
            "dns": "9.9.9.9",
            "strategy": "prefer_ipv6",
            "timeout": "3s",
            "fwmark": 200,
            "bind_address4": "192.0.2.10"
        }"#;
        let first: RemoteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(first.dns, Some("9.9.9.9".parse::<IpAddr>().unwrap()));
        assert_eq!(first.fwmark, 200);

        let emitted = serde_json::to_string(&first).unwrap();
        let second: RemoteConfig = serde_json::from_str(&emitted).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_config_mixed_forms() {
        let json = r#"{
            "binds": [
                "udp://127.0.0.1:9500?remote=ex",
                { "listen": "127.0.0.1", "port": 9501, "remote": "ex" }
            ],
            "remotes": [ "ex://198.51.100.7:48000" ],
            "log": { "level": "debug" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.binds.len(), 2);
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.remotes[0].name, "ex");
        assert_eq!(config.log.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_bind_json_rejects_zero_buffer() {
        let json = r#"{ "listen": "127.0.0.1", "port": 9500, "udp_buffer_size": 0 }"#;
        assert!(serde_json::from_str::<BindConfig>(json).is_err());
    }
}
