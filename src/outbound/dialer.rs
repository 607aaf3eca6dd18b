//! Outbound dialer
//!
//! Turns a `host:port` target into a connected socket: literal hosts skip
//! resolution, names go through the remote's resolver, candidates are
//! ordered by the strategy, and each is attempted in turn under the dial
//! timeout. Sockets carry the remote's options: per-family source address,
//! interface binding, firewall mark, `SO_REUSEADDR`, MPTCP for TCP and
//! fragmentation control for UDP.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{RemoteConfig, Strategy};
use crate::error::DialError;
use crate::resolve::Resolver;
use crate::sockopt;

/// Per-remote dial policy
pub struct DialConfig {
    /// Resolver for non-literal hosts
    pub resolver: Arc<dyn Resolver>,
    /// Per-attempt connect timeout
    pub timeout: Duration,
    /// Address family strategy
    pub strategy: Strategy,
    /// Bind outbound sockets to a named interface
    pub interface: Option<String>,
    /// Source address for IPv4 candidates
    pub bind_address4: Option<Ipv4Addr>,
    /// Source address for IPv6 candidates
    pub bind_address6: Option<Ipv6Addr>,
    /// Firewall mark; zero means unset
    pub fwmark: u32,
    /// Set `SO_REUSEADDR` on outbound sockets
    pub reuse_addr: bool,
    /// Dial with multipath TCP
    pub mptcp: bool,
    /// Allow UDP fragmentation
    pub udp_fragment: bool,
}

impl DialConfig {
    /// Dial policy from a remote's configuration
    #[must_use]
    pub fn from_remote(remote: &RemoteConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            timeout: remote.timeout,
            strategy: remote.strategy,
            interface: remote.interface.clone(),
            bind_address4: remote.bind_address4,
            bind_address6: remote.bind_address6,
            fwmark: remote.fwmark,
            reuse_addr: remote.reuse_addr,
            mptcp: remote.mptcp,
            udp_fragment: remote.udp_fragment,
        }
    }
}

enum SocketKind {
    Stream,
    Datagram,
}

/// Builds outbound connections for one remote
pub struct Dialer {
    config: DialConfig,
}

impl Dialer {
    #[must_use]
    pub fn new(config: DialConfig) -> Self {
        Self { config }
    }

    /// Connect a TCP stream to `target` (`host:port`)
    pub async fn dial_tcp(&self, target: &str) -> Result<TcpStream, DialError> {
        let (host, port) = split_host_port(target)?;
        let candidates = self.candidates(host).await?;

        let mut last: Option<DialError> = None;
        for ip in candidates {
            let addr = SocketAddr::new(ip, port);
            match self.connect_tcp_once(addr).await {
                Ok(stream) => {
                    debug!(target, address = %addr, "tcp connect succeeded");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(target, address = %addr, error = %e, "tcp connect attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(exhausted(target, last))
    }

    /// Connect a UDP socket to `target`: the local/remote pair is fixed so
    /// `send`/`recv` speak only to this peer.
    pub async fn dial_udp(&self, target: &str) -> Result<UdpSocket, DialError> {
        let (host, port) = split_host_port(target)?;
        let candidates = self.candidates(host).await?;

        let mut last: Option<DialError> = None;
        for ip in candidates {
            let addr = SocketAddr::new(ip, port);
            match self.connect_udp_once(addr).await {
                Ok(socket) => {
                    debug!(target, address = %addr, "udp connect succeeded");
                    return Ok(socket);
                }
                Err(e) => {
                    debug!(target, address = %addr, error = %e, "udp connect attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(exhausted(target, last))
    }

    /// Candidate addresses for `host` in dial order.
    ///
    /// Literal addresses skip resolution entirely.
    async fn candidates(&self, host: &str) -> Result<Vec<IpAddr>, DialError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let answers = self
            .config
            .resolver
            .lookup(host, self.config.strategy)
            .await
            .map_err(|e| DialError::Resolve {
                target: host.to_string(),
                source: e,
            })?;
        Ok(answers.ordered(self.config.strategy))
    }

    /// Create an outbound socket for `addr` with the remote's options
    fn build_socket(&self, addr: SocketAddr, kind: &SocketKind) -> Result<Socket, DialError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = match kind {
            SocketKind::Stream => sockopt::new_stream_socket(domain, self.config.mptcp),
            SocketKind::Datagram => Socket::new(domain, Type::DGRAM, Some(SocketProtocol::UDP)),
        }
        .map_err(|e| DialError::socket_option("create", e.to_string()))?;

        if self.config.reuse_addr {
            socket
                .set_reuse_address(true)
                .map_err(|e| DialError::socket_option("SO_REUSEADDR", e.to_string()))?;
        }
        if let Some(interface) = &self.config.interface {
            sockopt::bind_device(&socket, interface)
                .map_err(|e| DialError::socket_option("SO_BINDTODEVICE", e.to_string()))?;
        }
        if self.config.fwmark != 0 {
            sockopt::set_fwmark(&socket, self.config.fwmark)
                .map_err(|e| DialError::socket_option("SO_MARK", e.to_string()))?;
        }
        if let SocketKind::Datagram = kind {
            sockopt::set_udp_fragment(&socket, addr.is_ipv6(), self.config.udp_fragment)
                .map_err(|e| DialError::socket_option("IP_MTU_DISCOVER", e.to_string()))?;
        }

        // Source address matching the candidate's family
        let source = match addr {
            SocketAddr::V4(_) => self.config.bind_address4.map(IpAddr::V4),
            SocketAddr::V6(_) => self.config.bind_address6.map(IpAddr::V6),
        };
        if let Some(source) = source {
            let bind_addr = SocketAddr::new(source, 0);
            socket
                .bind(&bind_addr.into())
                .map_err(|e| DialError::socket_option("bind", e.to_string()))?;
        }

        socket
            .set_nonblocking(true)
            .map_err(|e| DialError::socket_option("O_NONBLOCK", e.to_string()))?;
        Ok(socket)
    }

    /// One non-blocking TCP connect attempt under the dial timeout
    async fn connect_tcp_once(&self, addr: SocketAddr) -> Result<TcpStream, DialError> {
        let socket = self.build_socket(addr, &SocketKind::Stream)?;

        // EINPROGRESS is the expected result of a non-blocking connect
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                return Err(DialError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                })
            }
        }

        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream).map_err(|e| DialError::ConnectFailed {
            addr,
            reason: e.to_string(),
        })?;

        let wait_connected = async {
            // Writable means the connect finished; SO_ERROR tells how
            stream.writable().await.map_err(|e| DialError::ConnectFailed {
                addr,
                reason: e.to_string(),
            })?;
            match stream.take_error() {
                Ok(None) => Ok(()),
                Ok(Some(e)) => Err(DialError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                }),
                Err(e) => Err(DialError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                }),
            }
        };

        match timeout(self.config.timeout, wait_connected).await {
            Ok(Ok(())) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(address = %addr, error = %e, "failed to set TCP_NODELAY");
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DialError::Timeout {
                addr,
                timeout_secs: self.config.timeout.as_secs(),
            }),
        }
    }

    /// One connected-UDP attempt under the dial timeout
    async fn connect_udp_once(&self, addr: SocketAddr) -> Result<UdpSocket, DialError> {
        let socket = self.build_socket(addr, &SocketKind::Datagram)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(|e| DialError::ConnectFailed {
            addr,
            reason: e.to_string(),
        })?;

        match timeout(self.config.timeout, socket.connect(addr)).await {
            Ok(Ok(())) => Ok(socket),
            Ok(Err(e)) => Err(DialError::ConnectFailed {
                addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(DialError::Timeout {
                addr,
                timeout_secs: self.config.timeout.as_secs(),
            }),
        }
    }
}

fn exhausted(target: &str, last: Option<DialError>) -> DialError {
    DialError::Exhausted {
        target: target.to_string(),
        last: last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate addresses".to_string()),
    }
}

/// Split `host:port`, tolerating bracketed IPv6 literals
fn split_host_port(target: &str) -> Result<(&str, u16), DialError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| DialError::InvalidTarget(target.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DialError::InvalidTarget(target.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(DialError::InvalidTarget(target.to_string()));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use crate::resolve::Answers;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct StaticResolver {
        answers: Answers,
        lookups: Arc<AtomicUsize>,
    }

    impl StaticResolver {
        fn new(answers: Answers) -> (Self, Arc<AtomicUsize>) {
            let lookups = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    answers,
                    lookups: Arc::clone(&lookups),
                },
                lookups,
            )
        }
    }

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn lookup(&self, _name: &str, strategy: Strategy) -> Result<Answers, ResolveError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.clone().filter(strategy))
        }
    }

    fn dialer_with(resolver: impl Resolver + 'static, strategy: Strategy, timeout: Duration) -> Dialer {
        Dialer::new(DialConfig {
            resolver: Arc::new(resolver),
            timeout,
            strategy,
            interface: None,
            bind_address4: None,
            bind_address6: None,
            fwmark: 0,
            reuse_addr: false,
            mptcp: false,
            udp_fragment: false,
        })
    }

    fn dual_answers() -> Answers {
        Answers {
            v4: vec!["203.0.113.5".parse().unwrap()],
            v6: vec!["2001:db8::5".parse().unwrap()],
        }
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:443").unwrap(), ("example.com", 443));
        assert_eq!(split_host_port("[::1]:9500").unwrap(), ("::1", 9500));
        assert_eq!(split_host_port("127.0.0.1:1").unwrap(), ("127.0.0.1", 1));
        assert!(split_host_port("no-port").is_err());
        assert!(split_host_port(":9500").is_err());
        assert!(split_host_port("host:99999").is_err());
    }

    #[tokio::test]
    async fn test_literal_host_skips_resolution() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (resolver, lookups) = StaticResolver::new(dual_answers());
        let dialer = dialer_with(resolver, Strategy::Default, Duration::from_secs(1));

        let stream = dialer.dial_tcp(&addr.to_string()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert_eq!(lookups.load(Ordering::SeqCst), 0, "literal hosts must not resolve");
    }

    #[tokio::test]
    async fn test_v4_only_strategy_attempts_only_a_records() {
        let (resolver, _) = StaticResolver::new(dual_answers());
        let dialer = dialer_with(resolver, Strategy::Ipv4Only, Duration::from_millis(100));

        let candidates = dialer.candidates("dual.example").await.unwrap();
        assert_eq!(candidates, vec!["203.0.113.5".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_failover_to_second_candidate() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // first candidate is TEST-NET-1 (unroutable), second is reachable
        let answers = Answers {
            v4: vec!["192.0.2.1".parse().unwrap(), "127.0.0.1".parse().unwrap()],
            v6: Vec::new(),
        };
        let (resolver, _) = StaticResolver::new(answers);
        let dialer = dialer_with(resolver, Strategy::PreferIpv4, Duration::from_millis(500));

        let stream = dialer
            .dial_tcp(&format!("svc.example:{}", addr.port()))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_all_candidates_failed() {
        let answers = Answers {
            v4: vec!["192.0.2.1".parse().unwrap()],
            v6: Vec::new(),
        };
        let (resolver, _) = StaticResolver::new(answers);
        let dialer = dialer_with(resolver, Strategy::Default, Duration::from_millis(100));

        let result = dialer.dial_tcp("svc.example:9").await;
        assert!(matches!(result, Err(DialError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_resolve_errors_surface() {
        struct FailingResolver;

        #[async_trait]
        impl Resolver for FailingResolver {
            async fn lookup(&self, name: &str, _: Strategy) -> Result<Answers, ResolveError> {
                Err(ResolveError::NoAddress { name: name.into() })
            }
        }

        let dialer = dialer_with(FailingResolver, Strategy::Default, Duration::from_secs(1));
        let result = dialer.dial_tcp("svc.example:80").await;
        assert!(matches!(result, Err(DialError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_dial_udp_connected_pair() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let (resolver, _) = StaticResolver::new(Answers::default());
        let dialer = dialer_with(resolver, Strategy::Default, Duration::from_secs(1));

        let socket = dialer.dial_udp(&addr.to_string()).await.unwrap();
        socket.send(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, client_addr) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(client_addr, socket.local_addr().unwrap());

        server.send_to(b"pong", client_addr).await.unwrap();
        let n = socket.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_tcp_echo_through_dialed_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = stream.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });

        let (resolver, _) = StaticResolver::new(Answers::default());
        let dialer = dialer_with(resolver, Strategy::Default, Duration::from_secs(1));

        let mut stream = dialer.dial_tcp(&addr.to_string()).await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hello");
    }
}
