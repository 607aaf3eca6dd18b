//! Listening socket construction
//!
//! Builds the TCP listener and UDP socket for one bind, applying the
//! bind's options: address family selection, interface binding,
//! `SO_REUSEADDR`, TCP keepalive, MPTCP, TCP Fast Open, and UDP
//! fragmentation control.
//!
//! Family mapping: `4` yields a v4-only socket, `6` a v6-only socket, and
//! the unconstrained selector a dual-stack socket.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, UdpSocket};

use crate::config::{
    Family, DEFAULT_TCP_KEEPALIVE_IDLE, DEFAULT_TCP_KEEPALIVE_INTERVAL,
    DEFAULT_TCP_KEEPALIVE_PROBES,
};
use crate::error::ListenError;
use crate::sockopt;

/// Accept backlog for TCP listeners, also used as the TFO queue length
const TCP_BACKLOG: libc::c_int = 1024;

/// Options applied to the listening sockets of one bind
#[derive(Debug, Clone, Default)]
pub struct ListenerOptions {
    /// Address family selector
    pub family: Family,
    /// Bind to a named interface
    pub interface: Option<String>,
    /// Set `SO_REUSEADDR`
    pub reuse_addr: bool,
    /// Enable TCP Fast Open
    pub tfo: bool,
    /// Listen with multipath TCP
    pub mptcp: bool,
    /// Allow UDP fragmentation
    pub udp_fragment: bool,
}

/// Resolved bind target: address plus socket family
struct BindTarget {
    addr: SocketAddr,
    domain: Domain,
    /// `IPV6_V6ONLY` value; None for v4 sockets
    only_v6: Option<bool>,
}

/// Builds listening sockets for one bind
#[derive(Debug, Clone)]
pub struct ListenerBuilder {
    options: ListenerOptions,
}

impl ListenerBuilder {
    #[must_use]
    pub fn new(options: ListenerOptions) -> Self {
        Self { options }
    }

    /// Map (host, port, family) to a concrete bind address and socket domain
    fn bind_target(&self, host: &str, port: u16) -> Result<BindTarget, ListenError> {
        let ip = if host.is_empty() {
            match self.options.family {
                Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                Family::V6 | Family::Any => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            host.parse::<IpAddr>().map_err(|_| ListenError::InvalidAddress {
                addr: host.to_string(),
                reason: "not a literal ip address".into(),
            })?
        };

        match (self.options.family, ip) {
            (Family::V4, IpAddr::V6(_)) => {
                return Err(ListenError::InvalidAddress {
                    addr: host.to_string(),
                    reason: "ipv6 address with family 4".into(),
                })
            }
            (Family::V6, IpAddr::V4(_)) => {
                return Err(ListenError::InvalidAddress {
                    addr: host.to_string(),
                    reason: "ipv4 address with family 6".into(),
                })
            }
            _ => {}
        }

        let (domain, only_v6) = match ip {
            IpAddr::V4(_) => (Domain::IPV4, None),
            IpAddr::V6(_) => (Domain::IPV6, Some(self.options.family == Family::V6)),
        };
        Ok(BindTarget {
            addr: SocketAddr::new(ip, port),
            domain,
            only_v6,
        })
    }

    /// Apply the options shared by TCP and UDP sockets
    fn apply_common(&self, socket: &Socket, target: &BindTarget) -> Result<(), ListenError> {
        if let Some(only_v6) = target.only_v6 {
            socket
                .set_only_v6(only_v6)
                .map_err(|e| ListenError::socket_option("IPV6_V6ONLY", e.to_string()))?;
        }
        if self.options.reuse_addr {
            socket
                .set_reuse_address(true)
                .map_err(|e| ListenError::socket_option("SO_REUSEADDR", e.to_string()))?;
        }
        if let Some(interface) = &self.options.interface {
            sockopt::bind_device(socket, interface)
                .map_err(|e| ListenError::socket_option("SO_BINDTODEVICE", e.to_string()))?;
        }
        socket
            .set_nonblocking(true)
            .map_err(|e| ListenError::socket_option("O_NONBLOCK", e.to_string()))?;
        Ok(())
    }

    /// Build a TCP listener for `host:port`
    pub fn listen_tcp(&self, host: &str, port: u16) -> Result<TcpListener, ListenError> {
        let target = self.bind_target(host, port)?;

        let socket = sockopt::new_stream_socket(target.domain, self.options.mptcp)
            .map_err(|e| ListenError::SocketCreation(e.to_string()))?;
        self.apply_common(&socket, &target)?;

        // Keepalive probes detect dead peers on long-lived proxied connections
        let keepalive = TcpKeepalive::new()
            .with_time(DEFAULT_TCP_KEEPALIVE_IDLE)
            .with_interval(DEFAULT_TCP_KEEPALIVE_INTERVAL)
            .with_retries(DEFAULT_TCP_KEEPALIVE_PROBES);
        socket
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| ListenError::socket_option("TCP_KEEPALIVE", e.to_string()))?;

        socket
            .bind(&target.addr.into())
            .map_err(|e| ListenError::bind(target.addr, e.to_string()))?;
        socket
            .listen(TCP_BACKLOG)
            .map_err(|e| ListenError::socket_option("listen", e.to_string()))?;

        if self.options.tfo {
            sockopt::set_tcp_fastopen(&socket, TCP_BACKLOG)
                .map_err(|e| ListenError::socket_option("TCP_FASTOPEN", e.to_string()))?;
        }

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(ListenError::from)
    }

    /// Build a UDP socket bound to `host:port`
    pub fn listen_udp(&self, host: &str, port: u16) -> Result<UdpSocket, ListenError> {
        let target = self.bind_target(host, port)?;

        let socket = Socket::new(target.domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| ListenError::SocketCreation(e.to_string()))?;
        self.apply_common(&socket, &target)?;

        sockopt::set_udp_fragment(
            &socket,
            target.domain == Domain::IPV6,
            self.options.udp_fragment,
        )
        .map_err(|e| ListenError::socket_option("IP_MTU_DISCOVER", e.to_string()))?;

        socket
            .bind(&target.addr.into())
            .map_err(|e| ListenError::bind(target.addr, e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(ListenError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(family: Family) -> ListenerBuilder {
        ListenerBuilder::new(ListenerOptions {
            family,
            ..ListenerOptions::default()
        })
    }

    #[test]
    fn test_family_mapping_v4() {
        let target = builder(Family::V4).bind_target("", 9500).unwrap();
        assert_eq!(target.domain, Domain::IPV4);
        assert_eq!(target.addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(target.only_v6.is_none());
    }

    #[test]
    fn test_family_mapping_v6_only() {
        let target = builder(Family::V6).bind_target("", 9500).unwrap();
        assert_eq!(target.domain, Domain::IPV6);
        assert_eq!(target.only_v6, Some(true));
    }

    #[test]
    fn test_family_mapping_any_is_dual() {
        let target = builder(Family::Any).bind_target("", 9500).unwrap();
        assert_eq!(target.domain, Domain::IPV6);
        assert_eq!(target.only_v6, Some(false));
    }

    #[test]
    fn test_family_mapping_literal_host() {
        let target = builder(Family::Any).bind_target("127.0.0.1", 9500).unwrap();
        assert_eq!(target.domain, Domain::IPV4);

        let target = builder(Family::Any).bind_target("::1", 9500).unwrap();
        assert_eq!(target.domain, Domain::IPV6);
        assert_eq!(target.only_v6, Some(false));
    }

    #[test]
    fn test_family_mismatch_rejected() {
        assert!(builder(Family::V4).bind_target("::1", 9500).is_err());
        assert!(builder(Family::V6).bind_target("127.0.0.1", 9500).is_err());
        assert!(builder(Family::Any).bind_target("example.com", 9500).is_err());
    }

    #[tokio::test]
    async fn test_listen_tcp_loopback() {
        let listener = builder(Family::Any).listen_tcp("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);

        // accept a real connection through it
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_listen_udp_loopback() {
        let socket = builder(Family::Any).listen_udp("127.0.0.1", 0).unwrap();
        let addr = socket.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"ping", addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_listen_udp_with_fragment_allowed() {
        let options = ListenerOptions {
            udp_fragment: true,
            ..ListenerOptions::default()
        };
        let socket = ListenerBuilder::new(options).listen_udp("127.0.0.1", 0).unwrap();
        assert!(socket.local_addr().is_ok());
    }

    #[tokio::test]
    async fn test_listen_tcp_with_tfo() {
        let options = ListenerOptions {
            tfo: true,
            ..ListenerOptions::default()
        };
        let listener = ListenerBuilder::new(options).listen_tcp("127.0.0.1", 0).unwrap();
        assert!(listener.local_addr().is_ok());
    }
}
