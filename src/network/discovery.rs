//! Peer discovery protocol for the NexPing node.
//!
//! This module decodes and dispatches inbound datagrams and runs the four
//! periodic tasks of a node: the receive loop, the randomized discovery
//! broadcast, keep-alives to known peers, and maintenance (eviction plus a
//! liveness summary).
//!
//! The peer table write lock is only ever held for synchronous work; every
//! send happens after the guard is dropped.

use crate::identity::default_display_name;
use crate::network::{NodeContext, PeerRecord, PeerUpdate, RunFlag};
use crate::store::ContactStore;
use crate::transport::{declared_address, WireMessage};
use crate::utils::{DiscoveryConfig, LivenessTiming, NetworkConfig, Result};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Back-off after a socket-level receive error
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Characters of message content echoed to the log
const LOG_PREVIEW_CHARS: usize = 50;

/// Discovery protocol bound to one node
pub struct DiscoveryProtocol {
    ctx: NodeContext,
    store: Arc<dyn ContactStore>,
    timing: LivenessTiming,
    broadcast_range: (Duration, Duration),
    maintenance_interval: Duration,
    broadcast_targets: Vec<SocketAddr>,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Ids evicted in this pass
    pub evicted: Vec<String>,
    /// Peers inside the online window after eviction
    pub online: usize,
    /// Peers known after eviction
    pub total: usize,
}

impl DiscoveryProtocol {
    /// Create the protocol for a node
    pub fn new(
        ctx: NodeContext,
        store: Arc<dyn ContactStore>,
        network: &NetworkConfig,
        discovery: &DiscoveryConfig,
    ) -> Self {
        let broadcast_targets = network
            .broadcast_addresses
            .iter()
            .filter_map(|target| parse_broadcast_target(target, ctx.port))
            .collect();

        Self {
            ctx,
            store,
            timing: discovery.timing(),
            broadcast_range: (
                Duration::from_secs(discovery.broadcast_min_secs),
                Duration::from_secs(discovery.broadcast_max_secs),
            ),
            maintenance_interval: Duration::from_secs(discovery.maintenance_secs),
            broadcast_targets,
        }
    }

    /// Resolved broadcast destinations
    pub fn broadcast_targets(&self) -> &[SocketAddr] {
        &self.broadcast_targets
    }

    /// Spawn the four protocol tasks
    pub fn spawn(self: Arc<Self>, flag: &RunFlag) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).receive_loop(flag.clone())),
            tokio::spawn(Arc::clone(&self).broadcast_loop(flag.clone())),
            tokio::spawn(Arc::clone(&self).keep_alive_loop(flag.clone())),
            tokio::spawn(self.maintenance_loop(flag.clone())),
        ]
    }

    async fn receive_loop(self: Arc<Self>, flag: RunFlag) {
        let mut buf = vec![0u8; self.ctx.max_datagram_size];

        while flag.is_running() {
            let received = tokio::select! {
                _ = flag.stopped() => break,
                received = self.ctx.transport.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, source)) => {
                    if let Err(e) = self.dispatch(&buf[..len], source).await {
                        log::debug!("Dropped datagram from {}: {}", source, e);
                    }
                }
                Err(e) => {
                    log::warn!("UDP listener error: {}", e);
                    if !flag.sleep(RECEIVE_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        log::debug!("Receive loop stopped");
    }

    async fn broadcast_loop(self: Arc<Self>, flag: RunFlag) {
        while flag.is_running() {
            self.broadcast_once().await;
            if !flag.sleep(self.broadcast_delay()).await {
                break;
            }
        }

        log::debug!("Broadcast loop stopped");
    }

    async fn keep_alive_loop(self: Arc<Self>, flag: RunFlag) {
        while flag.is_running() {
            self.keep_alive_once().await;
            if !flag.sleep(self.timing.keep_alive_interval).await {
                break;
            }
        }

        log::debug!("Keep-alive loop stopped");
    }

    async fn maintenance_loop(self: Arc<Self>, flag: RunFlag) {
        while flag.is_running() {
            self.maintenance_once().await;
            if !flag.sleep(self.maintenance_interval).await {
                break;
            }
        }

        log::debug!("Maintenance loop stopped");
    }

    /// Uniform jitter across the configured broadcast range
    fn broadcast_delay(&self) -> Duration {
        let (min, max) = self.broadcast_range;
        let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Send one discovery message to every broadcast target.
    /// Returns how many sends the OS accepted.
    pub async fn broadcast_once(&self) -> usize {
        let message = WireMessage::discovery(
            self.ctx.node_id.as_str(),
            &self.ctx.display_name,
            &self.ctx.live,
        );

        let mut sent = 0;
        for target in &self.broadcast_targets {
            if self.ctx.try_send(&message, *target).await {
                sent += 1;
            }
        }
        sent
    }

    /// Send a keep-alive to each known peer's local address.
    /// Returns how many sends the OS accepted.
    pub async fn keep_alive_once(&self) -> usize {
        let targets: Vec<(String, SocketAddr)> = {
            let peers = self.ctx.peers.read().await;
            peers
                .snapshot()
                .into_iter()
                .filter_map(|peer| peer.local_address.map(|addr| (peer.node_id, addr)))
                .collect()
        };

        let message = WireMessage::keep_alive(self.ctx.node_id.as_str());
        let mut sent = 0;
        for (peer_id, target) in targets {
            if self.ctx.try_send(&message, target).await {
                sent += 1;
            } else {
                log::debug!("Keep-alive to {} not sent", peer_id);
            }
        }
        sent
    }

    /// Evict idle peers, reporting each offline first, then log a summary.
    pub async fn maintenance_once(&self) -> MaintenanceReport {
        let mut peers = self.ctx.peers.write().await;
        let store = &self.store;

        let evicted = peers.evict_expired(
            self.timing.online_window,
            self.timing.eviction_timeout,
            |_, record| {
                log::info!("Peer {} timed out", record.node_id);
                if let Err(e) = store.set_contact_online(&record.node_id, false) {
                    log::warn!("Could not mark {} offline: {}", record.node_id, e);
                }
            },
        );

        let report = MaintenanceReport {
            evicted,
            online: peers.online_count(self.timing.online_window),
            total: peers.len(),
        };
        drop(peers);

        log::info!(
            "Network status: {} peers online, {} total known",
            report.online,
            report.total
        );
        report
    }

    /// Decode one datagram and apply it.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for undecodable datagrams; the caller drops
    /// them.
    pub async fn dispatch(&self, datagram: &[u8], source: SocketAddr) -> Result<()> {
        let message = WireMessage::from_bytes(datagram, self.ctx.max_datagram_size)?;
        log::trace!("{} from {} ({})", message.kind(), message.sender(), source);

        match message {
            WireMessage::Discovery {
                node_id,
                name,
                public_ip,
                public_port,
                ..
            } => {
                let public = declared_address(public_ip.as_deref(), public_port, self.ctx.port);
                self.handle_discovery(&node_id, name, public, source).await;
            }
            WireMessage::PeerInfo {
                node_id,
                public_ip,
                public_port,
                ..
            } => {
                let public = declared_address(public_ip.as_deref(), public_port, self.ctx.port);
                self.handle_peer_info(&node_id, public).await;
            }
            WireMessage::ConnectRequest {
                node_id,
                public_ip,
                public_port,
                ..
            } => {
                let public = declared_address(public_ip.as_deref(), public_port, self.ctx.port);
                self.handle_connect_request(&node_id, public, source).await;
            }
            WireMessage::ConnectAck { node_id, .. } => {
                log::info!("Connection established with {} ({})", node_id, source);
            }
            WireMessage::Message {
                from, to, content, ..
            } => {
                self.handle_message(&from, &to, &content, source).await;
            }
            WireMessage::KeepAlive { node_id, .. } => {
                self.handle_keep_alive(&node_id).await;
            }
        }

        Ok(())
    }

    async fn handle_discovery(
        &self,
        node_id: &str,
        name: Option<String>,
        public: Option<SocketAddr>,
        source: SocketAddr,
    ) {
        if node_id == self.ctx.node_id.as_str() {
            return;
        }

        let name = name.unwrap_or_else(|| default_display_name(node_id));
        let inserted = self.ctx.peers.write().await.upsert(
            node_id,
            PeerUpdate {
                display_name: Some(name.clone()),
                local_address: Some(source),
                public_address: public,
            },
        );

        self.report(
            "save contact",
            node_id,
            self.store
                .upsert_contact(node_id, &name, Some(source.ip()), Some(source.port()), None),
        );

        if inserted {
            log::info!("Discovered peer: {} at {}", name, source);
        } else {
            log::debug!("Refreshed peer: {} at {}", name, source);
        }

        self.send_peer_info(node_id).await;
    }

    /// Reply with our public address: public first, then observed, first success wins.
    async fn send_peer_info(&self, node_id: &str) -> bool {
        let Some(peer) = self.ctx.peers.read().await.get(node_id) else {
            return false;
        };

        let message = WireMessage::peer_info(self.ctx.node_id.as_str(), &self.ctx.live);
        for target in reply_candidates(&peer) {
            if self.ctx.try_send(&message, target).await {
                log::debug!("Sent peer info to {}", target);
                return true;
            }
        }
        false
    }

    async fn handle_peer_info(&self, node_id: &str, public: Option<SocketAddr>) {
        let mut peers = self.ctx.peers.write().await;
        if peers.contains(node_id) {
            peers.upsert(
                node_id,
                PeerUpdate {
                    public_address: public,
                    ..PeerUpdate::default()
                },
            );
        }
    }

    async fn handle_connect_request(
        &self,
        node_id: &str,
        public: Option<SocketAddr>,
        source: SocketAddr,
    ) {
        log::info!(
            "Connection request from {} at {}",
            node_id,
            public.map_or_else(|| source.to_string(), |addr| addr.to_string())
        );

        {
            let mut peers = self.ctx.peers.write().await;
            if !peers.contains(node_id) {
                peers.upsert(
                    node_id,
                    PeerUpdate {
                        display_name: None,
                        local_address: Some(source),
                        public_address: public,
                    },
                );
            }
        }

        let ack = WireMessage::connect_ack(self.ctx.node_id.as_str(), &self.ctx.live);
        let via_public = async {
            match public {
                Some(target) => self.ctx.try_send(&ack, target).await,
                None => false,
            }
        };
        let via_source = self.ctx.try_send(&ack, source);

        let (public_sent, source_sent) = futures::join!(via_public, via_source);
        log::debug!(
            "Connect ack to {}: public={} source={}",
            node_id,
            public_sent,
            source_sent
        );
    }

    async fn handle_message(&self, from: &str, to: &str, content: &str, source: SocketAddr) {
        if to != self.ctx.node_id.as_str() {
            log::debug!("Message from {} addressed to {}, accepting anyway", from, to);
        }

        let preview: String = content.chars().take(LOG_PREVIEW_CHARS).collect();
        log::info!("Received message from {}: {}", from, preview);

        if let Err(e) = self.persist_message(from, content, source.ip(), source.port()) {
            log::warn!("Could not store message from {}: {}", from, e);
        }

        let mut peers = self.ctx.peers.write().await;
        if !peers.touch(from) {
            peers.upsert(
                from,
                PeerUpdate {
                    local_address: Some(source),
                    ..PeerUpdate::default()
                },
            );
        }
    }

    fn persist_message(&self, from: &str, content: &str, ip: IpAddr, port: u16) -> Result<()> {
        let contact = match self.store.find_contact_by_node_id(from)? {
            Some(contact) => contact,
            None => {
                self.store
                    .upsert_contact(from, &default_display_name(from), Some(ip), Some(port), None)?;
                self.store.find_contact_by_node_id(from)?.ok_or_else(|| {
                    crate::utils::StorageError::ContactNotFound {
                        contact: from.to_string(),
                    }
                })?
            }
        };

        self.store.record_message(contact.id, content)?;
        self.store.set_contact_online(from, true)
    }

    async fn handle_keep_alive(&self, node_id: &str) {
        let known = self.ctx.peers.write().await.touch(node_id);
        if known {
            self.report(
                "mark online",
                node_id,
                self.store.set_contact_online(node_id, true),
            );
        }
    }

    fn report(&self, action: &str, node_id: &str, result: Result<()>) {
        if let Err(e) = result {
            log::warn!("Could not {} for {}: {}", action, node_id, e);
        }
    }
}

/// Addresses a `peer_info` reply tries, in order, without duplicates
fn reply_candidates(peer: &PeerRecord) -> Vec<SocketAddr> {
    let mut candidates = Vec::with_capacity(2);
    for addr in [peer.public_address, peer.local_address].into_iter().flatten() {
        if !candidates.contains(&addr) {
            candidates.push(addr);
        }
    }
    candidates
}

/// `ip` means the discovery port; `ip:port` is taken as-is
fn parse_broadcast_target(target: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Some(addr);
    }
    match target.parse::<IpAddr>() {
        Ok(ip) => Some(SocketAddr::new(ip, port)),
        Err(_) => {
            log::warn!("Ignoring invalid broadcast address {:?}", target);
            None
        }
    }
}
