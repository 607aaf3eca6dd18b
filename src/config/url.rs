//! URL-form bind and remote parsing
//!
//! Binds and remotes can be given as URLs on the command line or inside the
//! JSON config:
//!
//! ```text
//! tcp+udp://127.0.0.1:9500?remote=ex&udp_ttl=90s
//! ex://198.51.100.7:48000?strategy=prefer_ipv4&timeout=3s
//! ```
//!
//! The bind scheme is its protocol set; the remote scheme is its name.
//! Query options apply last-value-wins; unknown options are an error.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use url::Url;

use super::types::{BindConfig, Family, ProtocolSet, RemoteConfig, Strategy};
use crate::error::ConfigError;

/// Parse a bind URL: `<protocolset>://<host>:<port>?opt=val&...`
pub fn parse_bind_url(raw: &str) -> Result<BindConfig, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::url("bind", raw, "empty string"));
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::url("bind", raw, e.to_string()))?;

    let mut config = BindConfig {
        listen: host_string(&url),
        port: url
            .port()
            .ok_or_else(|| ConfigError::url("bind", raw, "missing port"))?,
        network: ProtocolSet::parse(url.scheme()),
        ..BindConfig::default()
    };
    if config.network.is_empty() {
        return Err(ConfigError::InvalidProtocolSet(url.scheme().to_string()));
    }

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "family" => config.family = Family::parse(&value)?,
            "interface" => config.interface = Some(value.into_owned()),
            "reuse_addr" => config.reuse_addr = parse_bool("bind", "reuse_addr", &value)?,
            "name" => config.name = Some(value.into_owned()),
            "tfo" => config.tfo = parse_bool("bind", "tfo", &value)?,
            "udp_ttl" => {
                config.udp_ttl = parse_duration(&value)
                    .map_err(|e| ConfigError::value("bind", "udp_ttl", e))?;
            }
            "remote" => config.remote = Some(value.into_owned()),
            "udp_buffer_size" => {
                config.udp_buffer_size = value
                    .parse()
                    .map_err(|_| ConfigError::value("bind", "udp_buffer_size", format!("expected integer, got {value}")))?;
            }
            "udp_fragment" => config.udp_fragment = parse_bool("bind", "udp_fragment", &value)?,
            "mptcp" => config.mptcp = parse_bool("bind", "mptcp", &value)?,
            _ => {
                return Err(ConfigError::UnknownOption {
                    scope: "bind",
                    option: key.into_owned(),
                })
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// Parse a remote URL: `<name>://<host>:<port>?opt=val&...`
pub fn parse_remote_url(raw: &str) -> Result<RemoteConfig, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::url("remote", raw, "empty string"));
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::url("remote", raw, e.to_string()))?;

    let mut config = RemoteConfig {
        name: url.scheme().to_string(),
        server: host_string(&url),
        port: url
            .port()
            .ok_or_else(|| ConfigError::url("remote", raw, "missing port"))?,
        ..RemoteConfig::default()
    };

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "dns" => {
                let addr: IpAddr = value
                    .parse()
                    .map_err(|_| ConfigError::value("remote", "dns", format!("expected ip address, got {value}")))?;
                config.dns = Some(addr);
            }
            "strategy" => config.strategy = Strategy::parse(&value)?,
            "timeout" => {
                config.timeout = parse_duration(&value)
                    .map_err(|_| ConfigError::value("remote", "timeout", format!("expected duration, got {value}")))?;
            }
            "reuse_addr" => config.reuse_addr = parse_bool("remote", "reuse_addr", &value)?,
            "fwmark" => {
                config.fwmark = value
                    .parse()
                    .map_err(|_| ConfigError::value("remote", "fwmark", format!("expected u32, got {value}")))?;
            }
            "udp_fragment" => config.udp_fragment = parse_bool("remote", "udp_fragment", &value)?,
            "interface" => config.interface = Some(value.into_owned()),
            "mptcp" => config.mptcp = parse_bool("remote", "mptcp", &value)?,
            "bind_address4" => {
                let addr: Ipv4Addr = value
                    .parse()
                    .map_err(|_| ConfigError::value("remote", "bind_address4", format!("expected ipv4 address, got {value}")))?;
                config.bind_address4 = Some(addr);
            }
            "bind_address6" => {
                let addr: Ipv6Addr = value
                    .parse()
                    .map_err(|_| ConfigError::value("remote", "bind_address6", format!("expected ipv6 address, got {value}")))?;
                config.bind_address6 = Some(addr);
            }
            "name" => config.name = value.into_owned(),
            _ => {
                return Err(ConfigError::UnknownOption {
                    scope: "remote",
                    option: key.into_owned(),
                })
            }
        }
    }

    config.validate()?;
    Ok(config)
}

/// Host portion of the URL, with IPv6 brackets stripped
fn host_string(url: &Url) -> String {
    url.host_str()
        .unwrap_or("")
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

/// Go-compatible bool literals
fn parse_bool(scope: &'static str, option: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ConfigError::value(
            scope,
            option,
            format!("expected bool, got {value}"),
        )),
    }
}

/// Parse a duration literal: one or more integer+unit pairs, e.g.
/// `90s`, `1m30s`, `500ms`, `1h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("empty duration".into());
    }
    let bytes = s.as_bytes();
    let mut total = Duration::ZERO;
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if start == i {
            return Err(format!("invalid duration: {s}"));
        }
        let value: u64 = s[start..i]
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;

        let unit_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_digit() {
            i += 1;
        }
        total += match &s[unit_start..i] {
            "ns" => Duration::from_nanos(value),
            "us" | "\u{b5}s" => Duration::from_micros(value),
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            unit => return Err(format!("unknown duration unit '{unit}' in {s}")),
        };
    }
    Ok(total)
}

/// Render a duration the way [`parse_duration`] reads it
#[must_use]
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let mut out = String::new();
    let mut secs = d.as_secs();
    let hours = secs / 3600;
    secs %= 3600;
    let minutes = secs / 60;
    secs %= 60;
    let millis = d.subsec_millis();

    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if secs > 0 {
        out.push_str(&format!("{secs}s"));
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }
    out
}

/// Bracket IPv6 literals so the rendered URL stays parseable
fn host_for_url(host: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

impl BindConfig {
    /// Render the canonical URL form of this bind.
    ///
    /// Only options that differ from their defaults are emitted, so
    /// `parse(to_url(parse(u)))` is stable on every field.
    #[must_use]
    pub fn to_url(&self) -> String {
        let defaults = Self::default();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if self.family != defaults.family {
            query.append_pair("family", self.family.as_str());
        }
        if let Some(interface) = &self.interface {
            query.append_pair("interface", interface);
        }
        if self.reuse_addr {
            query.append_pair("reuse_addr", "true");
        }
        if let Some(name) = &self.name {
            query.append_pair("name", name);
        }
        if self.tfo {
            query.append_pair("tfo", "true");
        }
        if self.udp_ttl != defaults.udp_ttl {
            query.append_pair("udp_ttl", &format_duration(self.udp_ttl));
        }
        if let Some(remote) = &self.remote {
            query.append_pair("remote", remote);
        }
        if self.udp_buffer_size != defaults.udp_buffer_size {
            query.append_pair("udp_buffer_size", &self.udp_buffer_size.to_string());
        }
        if self.udp_fragment {
            query.append_pair("udp_fragment", "true");
        }
        if self.mptcp {
            query.append_pair("mptcp", "true");
        }

        let mut out = format!(
            "{}://{}:{}",
            self.network,
            host_for_url(&self.listen),
            self.port
        );
        let query = query.finish();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    }
}

impl RemoteConfig {
    /// Render the canonical URL form of this remote (the scheme is the name)
    #[must_use]
    pub fn to_url(&self) -> String {
        let defaults = Self::default();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(dns) = self.dns {
            query.append_pair("dns", &dns.to_string());
        }
        if self.strategy != defaults.strategy {
            query.append_pair("strategy", self.strategy.as_str());
        }
        if self.timeout != defaults.timeout {
            query.append_pair("timeout", &format_duration(self.timeout));
        }
        if self.reuse_addr {
            query.append_pair("reuse_addr", "true");
        }
        if self.fwmark != 0 {
            query.append_pair("fwmark", &self.fwmark.to_string());
        }
        if self.udp_fragment {
            query.append_pair("udp_fragment", "true");
        }
        if let Some(interface) = &self.interface {
            query.append_pair("interface", interface);
        }
        if self.mptcp {
            query.append_pair("mptcp", "true");
        }
        if let Some(addr) = self.bind_address4 {
            query.append_pair("bind_address4", &addr.to_string());
        }
        if let Some(addr) = self.bind_address6 {
            query.append_pair("bind_address6", &addr.to_string());
        }

        let mut out = format!(
            "{}://{}:{}",
            self.name,
            host_for_url(&self.server),
            self.port
        );
        let query = query.finish();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        out
    }
}
