//! Caching resolver
//!
//! An LRU cache with per-entry absolute expiry in front of either the
//! system resolver (fixed TTL) or a DNS exchanger (record TTLs). The two
//! modes are separate constructors; the system-backed constructor takes a
//! [`SystemResolver`] by value, so nesting one cache inside another is
//! unrepresentable.
//!
//! Regardless of mode, a hard ceiling of one day applies to every entry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::rr::{Name, RecordType};
use moka::sync::Cache;
use tracing::trace;

use super::client::{extract_answers, new_query, Exchanger};
use super::{ensure_fqdn, shuffle, Answers, Resolver, SystemResolver};
use crate::config::Strategy;
use crate::error::ResolveError;

/// Hard ceiling on the lifetime of any cache entry
const CACHE_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Record TTLs at or below this are not worth caching
const MIN_CACHEABLE_TTL: u32 = 4;

/// Smallest permitted cache size / fixed TTL
const MIN_CACHE_SIZE: u64 = 4;
const MIN_FIXED_TTL: Duration = Duration::from_secs(4);

#[derive(Clone)]
struct CacheEntry {
    v4: Vec<std::net::Ipv4Addr>,
    v6: Vec<std::net::Ipv6Addr>,
    expires_at: Instant,
}

enum Backend {
    /// Delegate misses to the system resolver, cache with a fixed TTL
    System {
        resolver: SystemResolver,
        ttl: Duration,
    },
    /// Fan out A/AAAA exchanges on miss, cache per record TTLs
    Exchange { client: Box<dyn Exchanger> },
}

/// LRU-cached resolver over the system resolver or a DNS exchanger
pub struct CachedResolver {
    backend: Backend,
    cache: Cache<String, CacheEntry>,
}

fn new_cache(size: u64) -> Cache<String, CacheEntry> {
    Cache::builder()
        .max_capacity(size)
        .time_to_live(CACHE_MAX_AGE)
        .build()
}

impl CachedResolver {
    /// Cache over the system resolver with a fixed entry TTL.
    ///
    /// # Panics
    ///
    /// Panics when `size` < 4 or `ttl` < 4 seconds; both are construction
    /// bugs, not runtime conditions.
    #[must_use]
    pub fn from_system(resolver: SystemResolver, size: u64, ttl: Duration) -> Self {
        assert!(size >= MIN_CACHE_SIZE, "resolver cache size too small");
        assert!(ttl >= MIN_FIXED_TTL, "resolver cache ttl too small");
        Self {
            backend: Backend::System { resolver, ttl },
            cache: new_cache(size),
        }
    }

    /// Cache over a DNS exchanger, honoring record TTLs.
    ///
    /// # Panics
    ///
    /// Panics when `size` < 4.
    #[must_use]
    pub fn from_exchanger(client: impl Exchanger + 'static, size: u64) -> Self {
        assert!(size >= MIN_CACHE_SIZE, "resolver cache size too small");
        Self {
            backend: Backend::Exchange {
                client: Box::new(client),
            },
            cache: new_cache(size),
        }
    }

    /// Unexpired, non-empty cache entry for `fqdn`.
    ///
    /// Entries observed expired or empty are removed on access.
    fn load(&self, fqdn: &str) -> Option<Answers> {
        let entry = self.cache.get(fqdn)?;
        if Instant::now() >= entry.expires_at || (entry.v4.is_empty() && entry.v6.is_empty()) {
            self.cache.invalidate(fqdn);
            return None;
        }
        Some(Answers {
            v4: entry.v4,
            v6: entry.v6,
        })
    }

    fn store(&self, fqdn: String, answers: &Answers, expires_at: Instant) {
        self.cache.insert(
            fqdn,
            CacheEntry {
                v4: answers.v4.clone(),
                v6: answers.v6.clone(),
                expires_at,
            },
        );
    }

    /// Miss path for the exchange backend: parallel A and AAAA queries,
    /// one combined store keyed on the minimum positive TTL.
    async fn exchange_lookup(
        &self,
        client: &dyn Exchanger,
        fqdn: &str,
        strategy: Strategy,
    ) -> Result<Answers, ResolveError> {
        let name =
            Name::from_utf8(fqdn).map_err(|e| ResolveError::Serialize(e.to_string()))?;

        let a_exchange = async {
            if strategy == Strategy::Ipv6Only {
                Ok(None)
            } else {
                client.exchange(&new_query(&name, RecordType::A)).await.map(Some)
            }
        };
        let aaaa_exchange = async {
            if strategy == Strategy::Ipv4Only {
                Ok(None)
            } else {
                client.exchange(&new_query(&name, RecordType::AAAA)).await.map(Some)
            }
        };
        let (a_response, aaaa_response) = tokio::join!(a_exchange, aaaa_exchange);

        let mut answers = Answers::default();
        let mut min_ttl = 0u32;
        for response in [a_response?, aaaa_response?].into_iter().flatten() {
            if response.truncated() {
                return Err(ResolveError::Truncated);
            }
            let (extracted, ttl) = extract_answers(&response);
            answers.v4.extend(extracted.v4);
            answers.v6.extend(extracted.v6);
            if ttl > 0 && (min_ttl == 0 || ttl < min_ttl) {
                min_ttl = ttl;
            }
        }
        shuffle(&mut answers.v4);
        shuffle(&mut answers.v6);

        if !answers.is_empty() && min_ttl > MIN_CACHEABLE_TTL {
            let expires_at = Instant::now() + Duration::from_secs(u64::from(min_ttl));
            self.store(fqdn.to_string(), &answers, expires_at);
        }
        Ok(answers)
    }
}

#[async_trait]
impl Resolver for CachedResolver {
    async fn lookup(&self, name: &str, strategy: Strategy) -> Result<Answers, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let fqdn = ensure_fqdn(name);

        if let Some(hit) = self.load(&fqdn) {
            let filtered = hit.filter(strategy);
            if !filtered.is_empty() {
                trace!(name = %fqdn, "resolver cache hit");
                return Ok(filtered);
            }
        }

        let fresh = match &self.backend {
            Backend::System { resolver, ttl } => {
                let answers = resolver.lookup(&fqdn, strategy).await?;
                if !answers.is_empty() {
                    self.store(fqdn.clone(), &answers, Instant::now() + *ttl);
                }
                answers
            }
            Backend::Exchange { client } => {
                self.exchange_lookup(client.as_ref(), &fqdn, strategy).await?
            }
        };

        let filtered = fresh.filter(strategy);
        if filtered.is_empty() {
            return Err(ResolveError::NoAddress { name: fqdn });
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
    use hickory_proto::rr::{rdata, DNSClass, RData, Record};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Exchanger answering from fixed record sets, counting exchanges
    struct StaticExchanger {
        v4: Vec<Ipv4Addr>,
        v6: Vec<Ipv6Addr>,
        ttl: u32,
        exchanges: Arc<AtomicUsize>,
    }

    impl StaticExchanger {
        fn new(v4: Vec<Ipv4Addr>, v6: Vec<Ipv6Addr>, ttl: u32) -> (Self, Arc<AtomicUsize>) {
            let exchanges = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    v4,
                    v6,
                    ttl,
                    exchanges: Arc::clone(&exchanges),
                },
                exchanges,
            )
        }
    }

    #[async_trait]
    impl Exchanger for StaticExchanger {
        async fn exchange(&self, query: &Message) -> Result<Message, ResolveError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            let question = &query.queries()[0];

            let mut response = Message::new();
            response.set_id(query.id());
            response.set_message_type(MessageType::Response);
            response.set_op_code(OpCode::Query);
            response.set_response_code(ResponseCode::NoError);
            response.add_queries(query.queries().iter().cloned());

            match question.query_type() {
                RecordType::A => {
                    for ip in &self.v4 {
                        let mut record = Record::new();
                        record
                            .set_name(question.name().clone())
                            .set_record_type(RecordType::A)
                            .set_dns_class(DNSClass::IN)
                            .set_ttl(self.ttl)
                            .set_data(Some(RData::A(rdata::A(*ip))));
                        response.add_answer(record);
                    }
                }
                RecordType::AAAA => {
                    for ip in &self.v6 {
                        let mut record = Record::new();
                        record
                            .set_name(question.name().clone())
                            .set_record_type(RecordType::AAAA)
                            .set_dns_class(DNSClass::IN)
                            .set_ttl(self.ttl)
                            .set_data(Some(RData::AAAA(rdata::AAAA(*ip))));
                        response.add_answer(record);
                    }
                }
                _ => {}
            }
            Ok(response)
        }
    }

    fn v4_set() -> Vec<Ipv4Addr> {
        vec!["203.0.113.5".parse().unwrap()]
    }

    fn v6_set() -> Vec<Ipv6Addr> {
        vec!["2001:db8::5".parse().unwrap()]
    }

    #[tokio::test]
    async fn test_exchange_mode_caches_long_ttl() {
        let (exchanger, exchanges) = StaticExchanger::new(v4_set(), v6_set(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        let answers = resolver.lookup("dual.example", Strategy::Default).await.unwrap();
        assert_eq!(answers.v4, v4_set());
        assert_eq!(answers.v6, v6_set());
        assert_eq!(exchanges.load(Ordering::SeqCst), 2, "A and AAAA fan-out");

        // second lookup is served from cache
        let answers = resolver.lookup("dual.example", Strategy::Default).await.unwrap();
        assert!(!answers.is_empty());
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exchange_mode_does_not_cache_small_ttl() {
        let (exchanger, exchanges) = StaticExchanger::new(v4_set(), v6_set(), 4);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        resolver.lookup("dual.example", Strategy::Default).await.unwrap();
        resolver.lookup("dual.example", Strategy::Default).await.unwrap();
        // no cache entry was written, so both lookups hit the exchanger
        assert_eq!(exchanges.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_strategy_gates_fan_out() {
        let (exchanger, exchanges) = StaticExchanger::new(v4_set(), v6_set(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        let answers = resolver.lookup("dual.example", Strategy::Ipv4Only).await.unwrap();
        assert_eq!(exchanges.load(Ordering::SeqCst), 1, "only the A query runs");
        assert!(answers.v6.is_empty());
    }

    #[tokio::test]
    async fn test_ipv4_only_with_only_aaaa_records_fails() {
        let (exchanger, _) = StaticExchanger::new(Vec::new(), v6_set(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        let result = resolver.lookup("dual.example", Strategy::Ipv4Only).await;
        assert!(matches!(result, Err(ResolveError::NoAddress { .. })));
    }

    #[tokio::test]
    async fn test_cache_hit_refiltered_per_strategy() {
        let (exchanger, exchanges) = StaticExchanger::new(v4_set(), v6_set(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        resolver.lookup("dual.example", Strategy::Default).await.unwrap();
        let answers = resolver.lookup("dual.example", Strategy::Ipv6Only).await.unwrap();
        assert!(answers.v4.is_empty());
        assert_eq!(answers.v6, v6_set());
        // served from the cached entry, not a fresh exchange
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (exchanger, _) = StaticExchanger::new(v4_set(), Vec::new(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);
        assert!(matches!(
            resolver.lookup("", Strategy::Default).await,
            Err(ResolveError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_system_mode_stores_with_fixed_ttl() {
        let resolver =
            CachedResolver::from_system(SystemResolver::new(), 16, Duration::from_secs(300));
        let first = resolver.lookup("localhost", Strategy::Default).await.unwrap();
        assert!(!first.is_empty());

        // cached entry is present and unexpired
        let hit = resolver.load("localhost.").expect("entry cached");
        assert!(!hit.is_empty());
    }

    #[test]
    fn test_expired_entry_removed_on_access() {
        let (exchanger, _) = StaticExchanger::new(v4_set(), Vec::new(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        let answers = Answers {
            v4: v4_set(),
            v6: Vec::new(),
        };
        resolver.store(
            "stale.example.".into(),
            &answers,
            Instant::now() - Duration::from_secs(1),
        );
        assert!(resolver.load("stale.example.").is_none());
        assert!(resolver.cache.get("stale.example.").is_none(), "removed on access");
    }

    #[test]
    fn test_empty_entry_removed_on_access() {
        let (exchanger, _) = StaticExchanger::new(v4_set(), Vec::new(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 16);

        resolver.store(
            "empty.example.".into(),
            &Answers::default(),
            Instant::now() + Duration::from_secs(60),
        );
        assert!(resolver.load("empty.example.").is_none());
    }

    #[test]
    fn test_lru_capacity_bound() {
        let (exchanger, _) = StaticExchanger::new(v4_set(), Vec::new(), 300);
        let resolver = CachedResolver::from_exchanger(exchanger, 4);

        let answers = Answers {
            v4: v4_set(),
            v6: Vec::new(),
        };
        for i in 0..32 {
            resolver.store(
                format!("host{i}.example."),
                &answers,
                Instant::now() + Duration::from_secs(60),
            );
        }
        resolver.cache.run_pending_tasks();
        assert!(resolver.cache.entry_count() <= 4);
    }

    #[test]
    #[should_panic(expected = "too small")]
    fn test_tiny_cache_size_panics() {
        let (exchanger, _) = StaticExchanger::new(Vec::new(), Vec::new(), 300);
        let _ = CachedResolver::from_exchanger(exchanger, 2);
    }
}
