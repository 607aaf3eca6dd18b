//! Supervisor: wires configuration into named outbounds and inbounds
//!
//! Outbounds are built first, one per remote; then inbounds, one per bind,
//! each holding the forwarders for its protocols. Remotes without a
//! dedicated DNS server share one process-wide cached resolver over the
//! system resolver; a remote with `dns` set gets its own cache over a raw
//! DNS client.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{
    BindConfig, Config, Protocol, RemoteConfig, DEFAULT_RESOLVER_CACHE_SIZE,
    DEFAULT_RESOLVER_CACHE_TTL,
};
use crate::error::{ConfigError, RelayError};
use crate::forward::{TcpForwarder, UdpForwarder};
use crate::inbound::{Inbound, ListenerBuilder, ListenerOptions};
use crate::outbound::{DialConfig, Dialer, Outbound};
use crate::resolve::{CachedResolver, DnsClient, Resolver, SystemResolver};

/// The relay's named inbound and outbound graphs
pub struct Service {
    outbounds: HashMap<String, Arc<Outbound>>,
    inbounds: HashMap<String, Arc<Inbound>>,
}

impl Service {
    /// Build the outbound and inbound graphs from a merged configuration.
    ///
    /// When the config holds exactly one remote and exactly one bind with
    /// no `remote` reference, the bind defaults to that remote.
    pub fn new(mut config: Config) -> Result<Self, RelayError> {
        if config.remotes.len() == 1 && config.binds.len() == 1 && config.binds[0].remote.is_none()
        {
            config.binds[0].remote = Some(config.remotes[0].name.clone());
        }

        let outbounds = build_outbounds(&config.remotes)?;
        let inbounds = build_inbounds(&config.binds, &outbounds)?;
        Ok(Self {
            outbounds,
            inbounds,
        })
    }

    /// Open every inbound's sockets and start their loops.
    ///
    /// Any single failure aborts startup.
    pub fn start(&self) -> Result<(), RelayError> {
        for inbound in self.inbounds.values() {
            inbound.start()?;
        }
        info!(
            inbounds = self.inbounds.len(),
            outbounds = self.outbounds.len(),
            "relay started"
        );
        Ok(())
    }

    /// Close every inbound and, through their shutdown channels, every
    /// live UDP flow. Idempotent.
    pub fn close(&self) {
        for inbound in self.inbounds.values() {
            inbound.close();
        }
        info!("all inbounds closed");
    }

    /// Number of realized outbounds
    #[must_use]
    pub fn outbound_count(&self) -> usize {
        self.outbounds.len()
    }

    /// Number of realized inbounds
    #[must_use]
    pub fn inbound_count(&self) -> usize {
        self.inbounds.len()
    }

    /// Look up an inbound by its identifier
    #[must_use]
    pub fn inbound(&self, name: &str) -> Option<&Arc<Inbound>> {
        self.inbounds.get(name)
    }
}

fn build_outbounds(
    remotes: &[RemoteConfig],
) -> Result<HashMap<String, Arc<Outbound>>, RelayError> {
    // One process-wide cache over the system resolver, shared by every
    // remote without a dedicated DNS server. Never nested.
    let shared_resolver = Arc::new(CachedResolver::from_system(
        SystemResolver::new(),
        DEFAULT_RESOLVER_CACHE_SIZE,
        DEFAULT_RESOLVER_CACHE_TTL,
    ));

    let mut outbounds = HashMap::new();
    for remote in remotes {
        if remote.name.is_empty() {
            return Err(ConfigError::MissingField {
                scope: "remote",
                field: "name",
            }
            .into());
        }
        if outbounds.contains_key(&remote.name) {
            return Err(ConfigError::DuplicateRemote(remote.name.clone()).into());
        }

        let resolver: Arc<dyn Resolver> = match remote.dns {
            Some(server) => Arc::new(CachedResolver::from_exchanger(
                DnsClient::new(server),
                DEFAULT_RESOLVER_CACHE_SIZE,
            )),
            None => Arc::clone(&shared_resolver) as Arc<dyn Resolver>,
        };

        let dialer = Dialer::new(DialConfig::from_remote(remote, resolver));
        debug!(remote = %remote.name, address = %remote.address(), "outbound ready");
        outbounds.insert(
            remote.name.clone(),
            Arc::new(Outbound::new(&remote.name, dialer, remote.address())),
        );
    }
    Ok(outbounds)
}

fn build_inbounds(
    binds: &[BindConfig],
    outbounds: &HashMap<String, Arc<Outbound>>,
) -> Result<HashMap<String, Arc<Inbound>>, RelayError> {
    let mut inbounds = HashMap::new();
    for bind in binds {
        let name = bind.identifier();
        if inbounds.contains_key(&name) {
            return Err(ConfigError::DuplicateBind(name).into());
        }
        let Some(remote_name) = &bind.remote else {
            return Err(ConfigError::MissingRemote { bind: name }.into());
        };
        let outbound = outbounds
            .get(remote_name)
            .ok_or_else(|| ConfigError::UnknownRemote(remote_name.clone()))?;

        let builder = ListenerBuilder::new(ListenerOptions {
            family: bind.family,
            interface: bind.interface.clone(),
            reuse_addr: bind.reuse_addr,
            tfo: bind.tfo,
            mptcp: bind.mptcp,
            udp_fragment: bind.udp_fragment,
        });

        // The bind's shutdown channel is shared between the inbound's
        // loops and its UDP flows, so one close stops everything.
        let (shutdown, _) = broadcast::channel(4);
        let mut inbound = Inbound::new(
            &name,
            builder,
            bind.network,
            &bind.listen,
            bind.port,
            bind.udp_buffer_size,
            shutdown.clone(),
        );
        if bind.network.contains(Protocol::Tcp) {
            inbound.set_conn_handler(Arc::new(TcpForwarder::new(Arc::clone(outbound))));
        }
        if bind.network.contains(Protocol::Udp) {
            inbound.set_packet_handler(Arc::new(UdpForwarder::new(
                Arc::clone(outbound),
                bind.udp_ttl,
                bind.udp_buffer_size,
                shutdown,
            )));
        }
        debug!(listener = %name, remote = %remote_name, "inbound ready");
        inbounds.insert(name, Arc::new(inbound));
    }
    Ok(inbounds)
}
