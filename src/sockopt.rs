//! Raw socket options shared by the listener and the dialer
//!
//! Everything socket2 does not cover directly: interface binding,
//! firewall marks, TCP Fast Open, UDP fragmentation control, and MPTCP
//! socket creation with TCP fallback.

use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

fn setsockopt_raw(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: *const libc::c_void,
    len: libc::socklen_t,
) -> io::Result<()> {
    let ret = unsafe { libc::setsockopt(socket.as_raw_fd(), level, name, value, len) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn setsockopt<T>(socket: &Socket, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    let ptr: *const T = value;
    setsockopt_raw(
        socket,
        level,
        name,
        ptr.cast::<libc::c_void>(),
        mem::size_of::<T>() as libc::socklen_t,
    )
}

/// Bind a socket to a named interface (`SO_BINDTODEVICE`).
///
/// The name must fit IFNAMSIZ (16 bytes) with its terminating NUL.
pub(crate) fn bind_device(socket: &Socket, interface: &str) -> io::Result<()> {
    if interface.len() > 15 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface name too long: {interface} (max 15 chars)"),
        ));
    }
    let mut ifname = [0u8; 16];
    ifname[..interface.len()].copy_from_slice(interface.as_bytes());
    setsockopt_raw(
        socket,
        libc::SOL_SOCKET,
        libc::SO_BINDTODEVICE,
        ifname.as_ptr().cast::<libc::c_void>(),
        ifname.len() as libc::socklen_t,
    )
}

/// Apply a firewall mark (`SO_MARK`) for policy routing
pub(crate) fn set_fwmark(socket: &Socket, mark: u32) -> io::Result<()> {
    setsockopt(socket, libc::SOL_SOCKET, libc::SO_MARK, &mark)
}

/// Enable TCP Fast Open on a listening socket
pub(crate) fn set_tcp_fastopen(socket: &Socket, qlen: libc::c_int) -> io::Result<()> {
    setsockopt(socket, libc::IPPROTO_TCP, libc::TCP_FASTOPEN, &qlen)
}

/// Set the don't-fragment behavior of a UDP socket.
///
/// `allow = false` forces path-MTU discovery (DF set); `allow = true`
/// explicitly permits fragmentation. The PMTUDISC mode values are shared
/// between the IPv4 and IPv6 socket levels.
pub(crate) fn set_udp_fragment(socket: &Socket, ipv6: bool, allow: bool) -> io::Result<()> {
    let mode: libc::c_int = if allow {
        libc::IP_PMTUDISC_DONT
    } else {
        libc::IP_PMTUDISC_DO
    };
    if ipv6 {
        setsockopt(socket, libc::IPPROTO_IPV6, libc::IPV6_MTU_DISCOVER, &mode)
    } else {
        setsockopt(socket, libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, &mode)
    }
}

/// Create a STREAM socket, preferring MPTCP when requested.
///
/// Kernels without MPTCP support fall back to plain TCP.
pub(crate) fn new_stream_socket(domain: Domain, mptcp: bool) -> io::Result<Socket> {
    if mptcp {
        match Socket::new(domain, Type::STREAM, Some(Protocol::MPTCP)) {
            Ok(socket) => return Ok(socket),
            Err(e) => debug!(error = %e, "mptcp unavailable, falling back to tcp"),
        }
    }
    Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
}
