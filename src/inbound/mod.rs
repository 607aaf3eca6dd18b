//! Inbound: one bind's listening endpoint and its dispatch loops
//!
//! An [`Inbound`] moves through Created → Started → Closed. `start` opens
//! the configured sockets and spawns an accept loop (TCP) and a datagram
//! read loop (UDP), each handing work to the handler capabilities it was
//! built with. `close` is idempotent; it fans a shutdown signal out to the
//! loops and to every task subscribed to the same channel (UDP flows).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::{Protocol, ProtocolSet};
use crate::error::ListenError;

pub mod listener;

pub use listener::{ListenerBuilder, ListenerOptions};

/// Handles one accepted TCP connection
#[async_trait]
pub trait ConnHandler: Send + Sync {
    async fn handle_conn(&self, stream: TcpStream, peer: SocketAddr);
}

/// Handles one inbound datagram
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle_packet(&self, payload: &[u8], client: SocketAddr, writer: &PacketWriter);
}

/// Write-back capability handed to packet handlers and their flows.
///
/// Holds only the inbound's UDP socket, so flows keep no owning reference
/// to the inbound itself. Write errors are logged, never surfaced.
#[derive(Clone)]
pub struct PacketWriter {
    socket: Arc<UdpSocket>,
    name: Arc<str>,
}

impl PacketWriter {
    pub(crate) fn new(socket: Arc<UdpSocket>, name: impl Into<Arc<str>>) -> Self {
        Self {
            socket,
            name: name.into(),
        }
    }

    /// Send one datagram from the inbound socket to `peer`
    pub async fn write_packet(&self, payload: &[u8], peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(payload, peer).await {
            error!(listener = %self.name, error = %e, "write udp message");
        }
    }
}

const STATE_CREATED: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// The realized form of one bind
pub struct Inbound {
    name: String,
    builder: ListenerBuilder,
    protocols: ProtocolSet,
    listen: String,
    port: u16,
    udp_buffer_size: usize,
    conn_handler: Option<Arc<dyn ConnHandler>>,
    packet_handler: Option<Arc<dyn PacketHandler>>,
    state: AtomicU8,
    shutdown: broadcast::Sender<()>,
    udp_socket: Mutex<Option<Arc<UdpSocket>>>,
    tcp_addr: Mutex<Option<SocketAddr>>,
}

impl Inbound {
    /// Create an inbound in the Created state.
    ///
    /// The `shutdown` channel is shared with the bind's flow tasks: one
    /// send stops the loops and every flow.
    pub fn new(
        name: impl Into<String>,
        builder: ListenerBuilder,
        protocols: ProtocolSet,
        listen: impl Into<String>,
        port: u16,
        udp_buffer_size: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            name: name.into(),
            builder,
            protocols,
            listen: listen.into(),
            port,
            udp_buffer_size,
            conn_handler: None,
            packet_handler: None,
            state: AtomicU8::new(STATE_CREATED),
            shutdown,
            udp_socket: Mutex::new(None),
            tcp_addr: Mutex::new(None),
        }
    }

    /// Install the TCP connection handler
    pub fn set_conn_handler(&mut self, handler: Arc<dyn ConnHandler>) {
        self.conn_handler = Some(handler);
    }

    /// Install the UDP packet handler
    pub fn set_packet_handler(&mut self, handler: Arc<dyn PacketHandler>) {
        self.packet_handler = Some(handler);
    }

    /// The bind's identifier
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local address of the TCP listener, once started
    #[must_use]
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        *self.tcp_addr.lock().expect("tcp addr lock poisoned")
    }

    /// Local address of the UDP socket, once started
    #[must_use]
    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.udp_socket
            .lock()
            .expect("udp socket lock poisoned")
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Open the configured sockets and spawn the dispatch loops.
    ///
    /// A second start on the same instance is rejected.
    pub fn start(&self) -> Result<(), ListenError> {
        if self
            .state
            .compare_exchange(STATE_CREATED, STATE_STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ListenError::AlreadyStarted);
        }

        if self.protocols.contains(Protocol::Tcp) {
            let handler = self
                .conn_handler
                .clone()
                .ok_or(ListenError::MissingHandler { protocol: "tcp" })?;
            let listener = self.builder.listen_tcp(&self.listen, self.port)?;
            let addr = listener.local_addr()?;
            *self.tcp_addr.lock().expect("tcp addr lock poisoned") = Some(addr);
            info!(listener = %self.name, address = %addr, "new tcp server started");
            tokio::spawn(Self::accept_loop(
                listener,
                handler,
                self.shutdown.subscribe(),
                self.name.clone(),
            ));
        }

        if self.protocols.contains(Protocol::Udp) {
            let handler = self
                .packet_handler
                .clone()
                .ok_or(ListenError::MissingHandler { protocol: "udp" })?;
            let socket = Arc::new(self.builder.listen_udp(&self.listen, self.port)?);
            info!(listener = %self.name, address = %socket.local_addr()?, "new udp server started");
            let writer = PacketWriter {
                socket: Arc::clone(&socket),
                name: Arc::from(self.name.as_str()),
            };
            *self.udp_socket.lock().expect("udp socket lock poisoned") = Some(Arc::clone(&socket));
            tokio::spawn(Self::read_loop(
                socket,
                handler,
                writer,
                self.udp_buffer_size,
                self.shutdown.subscribe(),
                self.name.clone(),
            ));
        }

        Ok(())
    }

    /// Send one datagram from the inbound UDP socket to `peer`.
    ///
    /// Errors are logged, not surfaced.
    pub async fn write_packet(&self, payload: &[u8], peer: SocketAddr) {
        let socket = self
            .udp_socket
            .lock()
            .expect("udp socket lock poisoned")
            .clone();
        if let Some(socket) = socket {
            if let Err(e) = socket.send_to(payload, peer).await {
                error!(listener = %self.name, error = %e, "write udp message");
            }
        }
    }

    /// Stop the loops and release the sockets. Idempotent.
    pub fn close(&self) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        let _ = self.shutdown.send(());
        *self.udp_socket.lock().expect("udp socket lock poisoned") = None;
        debug!(listener = %self.name, "inbound closed");
    }

    async fn accept_loop(
        listener: TcpListener,
        handler: Arc<dyn ConnHandler>,
        mut shutdown: broadcast::Receiver<()>,
        name: String,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.handle_conn(stream, peer).await });
                    }
                    Err(e) => {
                        error!(listener = %name, error = %e, "an error occurred while accept");
                    }
                }
            }
        }
        debug!(listener = %name, "tcp accept loop stopped");
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        handler: Arc<dyn PacketHandler>,
        writer: PacketWriter,
        buffer_size: usize,
        mut shutdown: broadcast::Receiver<()>,
        name: String,
    ) {
        // The buffer is exactly the configured size; datagrams larger than
        // this are truncated by the kernel.
        let mut buf = vec![0u8; buffer_size];
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break,

                received = socket.recv_from(&mut buf) => match received {
                    Ok((0, _)) => {
                        // A zero-length read with a non-empty buffer means the
                        // buffer size reached zero somewhere; that is a bug.
                        error!(listener = %name, "zero-length udp read with non-empty buffer, aborting read loop");
                        break;
                    }
                    Ok((n, client)) => handler.handle_packet(&buf[..n], client, &writer).await,
                    Err(e) => {
                        error!(listener = %name, error = %e, "read udp message");
                    }
                }
            }
        }
        debug!(listener = %name, "udp read loop stopped");
    }
}
