//! Raw DNS-over-UDP client
//!
//! Speaks plain DNS (RFC 1035) to a fixed `host:53`, one fresh socket per
//! attempt. Up to three attempts per exchange; a non-NOERROR rcode is
//! authoritative and fails immediately, everything else (socket errors,
//! parse failures, mismatched transaction ids, timeouts) is retried.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use super::{ensure_fqdn, Answers, Resolver};
use crate::config::{Strategy, DEFAULT_DNS_READ_TIMEOUT, DNS_RESPONSE_BUFFER_SIZE, MAX_DNS_RETRIES};
use crate::error::ResolveError;

/// Exchange of one DNS message with a fixed server
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message, ResolveError>;
}

/// Stateless DNS-over-UDP client bound to one server
#[derive(Debug, Clone)]
pub struct DnsClient {
    server: SocketAddr,
    read_timeout: Duration,
}

impl DnsClient {
    /// Client speaking to `server:53`
    #[must_use]
    pub fn new(server: IpAddr) -> Self {
        Self::from_addr(SocketAddr::new(server, 53))
    }

    /// Client speaking to an arbitrary `host:port`
    #[must_use]
    pub fn from_addr(server: SocketAddr) -> Self {
        Self {
            server,
            read_timeout: DEFAULT_DNS_READ_TIMEOUT,
        }
    }

    /// Override the per-attempt read deadline
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The server this client exchanges with
    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// One send/receive round against the server
    async fn exchange_once(&self, packet: &[u8], id: u16) -> Result<Message, ResolveError> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| ResolveError::Exchange {
            server: self.server,
            source: e,
        })?;

        socket
            .send_to(packet, self.server)
            .await
            .map_err(|e| ResolveError::Exchange {
                server: self.server,
                source: e,
            })?;

        let mut buf = vec![0u8; DNS_RESPONSE_BUFFER_SIZE];
        let (len, _) = match timeout(self.read_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                return Err(ResolveError::Exchange {
                    server: self.server,
                    source: e,
                })
            }
            Err(_) => return Err(ResolveError::Timeout { server: self.server }),
        };

        let response =
            Message::from_vec(&buf[..len]).map_err(|e| ResolveError::Parse(e.to_string()))?;
        if response.id() != id {
            return Err(ResolveError::MismatchedId);
        }
        if response.response_code() != ResponseCode::NoError {
            return Err(ResolveError::Rcode {
                rcode: response.response_code(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Exchanger for DnsClient {
    async fn exchange(&self, query: &Message) -> Result<Message, ResolveError> {
        let packet = query
            .to_vec()
            .map_err(|e| ResolveError::Serialize(e.to_string()))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.exchange_once(&packet, query.id()).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    debug!(
                        server = %self.server,
                        attempt = attempts,
                        error = %e,
                        "dns exchange attempt failed"
                    );
                    if attempts >= MAX_DNS_RETRIES {
                        return Err(ResolveError::MaxRetries { server: self.server });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Resolver for DnsClient {
    /// Lookup mode: A and/or AAAA queries per the strategy, run in
    /// parallel, answers merged.
    async fn lookup(&self, name: &str, strategy: Strategy) -> Result<Answers, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::EmptyName);
        }
        let fqdn = Name::from_utf8(ensure_fqdn(name))
            .map_err(|e| ResolveError::Serialize(e.to_string()))?;

        let a_exchange = async {
            if strategy == Strategy::Ipv6Only {
                Ok(None)
            } else {
                self.exchange(&new_query(&fqdn, RecordType::A)).await.map(Some)
            }
        };
        let aaaa_exchange = async {
            if strategy == Strategy::Ipv4Only {
                Ok(None)
            } else {
                self.exchange(&new_query(&fqdn, RecordType::AAAA)).await.map(Some)
            }
        };
        let (a_response, aaaa_response) = tokio::join!(a_exchange, aaaa_exchange);

        let mut answers = Answers::default();
        for response in [a_response?, aaaa_response?].into_iter().flatten() {
            let (extracted, _) = extract_answers(&response);
            answers.v4.extend(extracted.v4);
            answers.v6.extend(extracted.v6);
        }

        let answers = answers.filter(strategy);
        if answers.is_empty() {
            return Err(ResolveError::NoAddress {
                name: fqdn.to_string(),
            });
        }
        Ok(answers)
    }
}

/// Build a recursion-desired query for one record type
pub(crate) fn new_query(fqdn: &Name, record_type: RecordType) -> Message {
    let mut message = Message::new();
    message.set_id(rand::random());
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(fqdn.clone(), record_type));
    message
}

/// Pull A/AAAA addresses out of a response's answer section, along with
/// the minimum positive TTL seen (zero when no positive TTL was present).
pub(crate) fn extract_answers(response: &Message) -> (Answers, u32) {
    let mut answers = Answers::default();
    let mut min_ttl = 0u32;
    for record in response.answers() {
        match record.data() {
            Some(RData::A(a)) => answers.v4.push(a.0),
            Some(RData::AAAA(aaaa)) => answers.v6.push(aaaa.0),
            _ => continue,
        }
        let ttl = record.ttl();
        if ttl > 0 && (min_ttl == 0 || ttl < min_ttl) {
            min_ttl = ttl;
        }
    }
    (answers, min_ttl)
}
