//! Name resolution
//!
//! Three resolvers share one trait:
//!
//! - [`SystemResolver`]: the host's configured resolver via `getaddrinfo`
//! - [`DnsClient`]: raw DNS-over-UDP against a fixed server (also an
//!   [`client::Exchanger`] for the cache's record-TTL mode)
//! - [`CachedResolver`]: LRU + per-entry expiry in front of either
//!
//! Results are split by address family; the strategy filters families here
//! and orders candidates in the dialer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::config::Strategy;
use crate::error::ResolveError;

pub mod cache;
pub mod client;

pub use cache::CachedResolver;
pub use client::{DnsClient, Exchanger};

/// A and AAAA record sets for one name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    /// IPv4 addresses (A records)
    pub v4: Vec<Ipv4Addr>,
    /// IPv6 addresses (AAAA records)
    pub v6: Vec<Ipv6Addr>,
}

impl Answers {
    /// Whether both families are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Drop the family excluded by the strategy.
    ///
    /// Preference strategies keep both families; ordering is the
    /// dialer's concern.
    #[must_use]
    pub fn filter(mut self, strategy: Strategy) -> Self {
        match strategy {
            Strategy::Ipv4Only => self.v6.clear(),
            Strategy::Ipv6Only => self.v4.clear(),
            Strategy::Default | Strategy::PreferIpv4 | Strategy::PreferIpv6 => {}
        }
        self
    }

    /// Flatten into dial order for the strategy.
    ///
    /// `default` is deterministic: v4 candidates first, then v6.
    #[must_use]
    pub fn ordered(&self, strategy: Strategy) -> Vec<IpAddr> {
        let v4 = self.v4.iter().copied().map(IpAddr::V4);
        let v6 = self.v6.iter().copied().map(IpAddr::V6);
        match strategy {
            Strategy::Ipv4Only => v4.collect(),
            Strategy::Ipv6Only => v6.collect(),
            Strategy::Default | Strategy::PreferIpv4 => v4.chain(v6).collect(),
            Strategy::PreferIpv6 => v6.chain(v4).collect(),
        }
    }
}

/// Resolve a name into its A and AAAA record sets
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, name: &str, strategy: Strategy) -> Result<Answers, ResolveError>;
}

/// Normalize a name to fully qualified form (trailing dot)
#[must_use]
pub(crate) fn ensure_fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Shuffle a record list uniformly at random, in place
pub(crate) fn shuffle<T>(list: &mut [T]) {
    if list.len() > 1 {
        list.shuffle(&mut rand::thread_rng());
    }
}

/// Resolver backed by the host's configured resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, name: &str, strategy: Strategy) -> Result<Answers, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }

        // getaddrinfo takes the name without the trailing dot
        let host = name.trim_end_matches('.');
        let resolved = tokio::net::lookup_host((host, 0))
            .await
            .map_err(ResolveError::Lookup)?;

        let mut answers = Answers::default();
        for addr in resolved {
            match addr.ip() {
                IpAddr::V4(v4) if strategy != Strategy::Ipv6Only => answers.v4.push(v4),
                IpAddr::V6(v6) if strategy != Strategy::Ipv4Only => answers.v6.push(v6),
                _ => {}
            }
        }
        shuffle(&mut answers.v4);
        shuffle(&mut answers.v6);
        Ok(answers)
    }
}
