//! Node lifecycle and coordination.
//!
//! A [`Node`] owns the identity, the peer table and the collaborators
//! (contact store, relay). Starting it resolves the public address, binds
//! the UDP socket and spawns the discovery tasks; stopping it clears the run
//! flag and waits for every task to wind down.

use crate::identity::NodeId;
use crate::network::{
    AddressResolver, DeliveryPath, DiscoveryProtocol, LiveAddressInfo, MessageRouter, NodeContext,
    PeerRecord, PeerTable, RunFlag,
};
use crate::store::ContactStore;
use crate::transport::{RelayChannel, Transport, UdpTransport};
use crate::utils::{NetworkError, NexpingConfig, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// State that exists only while the node runs
struct Running {
    ctx: NodeContext,
    router: MessageRouter,
    tasks: Vec<JoinHandle<()>>,
}

/// One NexPing node
pub struct Node {
    config: NexpingConfig,
    node_id: NodeId,
    display_name: String,
    store: Arc<dyn ContactStore>,
    relay: Arc<dyn RelayChannel>,
    peers: Arc<RwLock<PeerTable>>,
    flag: RunFlag,
    running: Option<Running>,
}

impl Node {
    /// Create a stopped node with a fresh identity
    pub fn new(
        config: NexpingConfig,
        store: Arc<dyn ContactStore>,
        relay: Arc<dyn RelayChannel>,
    ) -> Self {
        let node_id = NodeId::generate();
        let display_name = node_id.display_name();
        let flag = RunFlag::new();
        flag.stop();

        Self {
            config,
            node_id,
            display_name,
            store,
            relay,
            peers: Arc::new(RwLock::new(PeerTable::new())),
            flag,
            running: None,
        }
    }

    /// Override the default `Node_xxxxxxxx` display name
    pub fn with_display_name<S: Into<String>>(mut self, name: S) -> Self {
        self.display_name = name.into();
        self
    }

    /// Resolve the public address, bind the socket and spawn the tasks.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the configuration does not
    /// validate, or with `NetworkError::BindFailed` when the listening port
    /// is unavailable; the node stays stopped either way.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            log::warn!("Node {} already running", self.node_id);
            return Ok(());
        }

        self.config.validate()?;

        let port = self.config.network.listen_port;
        let live = AddressResolver::new(&self.config.resolver, port)
            .resolve()
            .await;

        let bind = SocketAddr::new(self.config.network.bind_address, port);
        let transport = UdpTransport::bind(bind).await?;

        self.start_on(Arc::new(transport), live)
    }

    /// Start over an already bound transport
    pub(crate) fn start_on(
        &mut self,
        transport: Arc<dyn Transport>,
        live: LiveAddressInfo,
    ) -> Result<()> {
        self.config.validate()?;

        let port = transport
            .local_addr()
            .map_or(self.config.network.listen_port, |addr| addr.port());

        if let Err(e) = self.store.upsert_contact(
            self.node_id.as_str(),
            &self.display_name,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Some(port),
            None,
        ) {
            log::warn!("Could not save own contact: {}", e);
        }

        let ctx = NodeContext {
            node_id: self.node_id.clone(),
            display_name: self.display_name.clone(),
            live,
            port,
            max_datagram_size: self.config.network.max_datagram_size,
            transport,
            peers: Arc::clone(&self.peers),
        };

        self.flag = RunFlag::new();
        let protocol = Arc::new(DiscoveryProtocol::new(
            ctx.clone(),
            Arc::clone(&self.store),
            &self.config.network,
            &self.config.discovery,
        ));
        let tasks = protocol.spawn(&self.flag);
        let router = MessageRouter::new(ctx.clone(), Arc::clone(&self.relay));

        log::info!(
            "Node {} ({}) listening on port {}, advertising {}",
            self.display_name,
            self.node_id,
            port,
            live
        );

        self.running = Some(Running { ctx, router, tasks });
        Ok(())
    }

    /// Stop the tasks and release the socket.
    pub async fn stop(&mut self) {
        self.flag.stop();

        let Some(running) = self.running.take() else {
            return;
        };

        let Running { ctx, router, tasks } = running;
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Node task ended abnormally: {}", e);
            }
        }
        drop(router);
        drop(ctx);

        log::info!("Node {} stopped", self.node_id);
    }

    /// Deliver a message, reporting the path that carried it.
    ///
    /// # Errors
    ///
    /// `NotRunning` before `start`, otherwise as
    /// [`MessageRouter::send_message`].
    pub async fn deliver(&self, peer_id: &str, content: &str) -> Result<DeliveryPath> {
        self.router()?.send_message(peer_id, content).await
    }

    /// Deliver a message; true if any path accepted it
    pub async fn send_message(&self, peer_id: &str, content: &str) -> bool {
        match self.deliver(peer_id, content).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to send message to {}: {}", peer_id, e);
                false
            }
        }
    }

    /// Send a connect request to a known peer
    pub async fn connect(&self, peer_id: &str) -> bool {
        let result = match self.router() {
            Ok(router) => router.connect_by_id(peer_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to connect to {}: {}", peer_id, e);
                false
            }
        }
    }

    /// Snapshot of the peer table
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.peers.read().await.snapshot()
    }

    /// Peers inside the online window
    pub async fn online_count(&self) -> usize {
        let window = self.config.discovery.timing().online_window;
        self.peers.read().await.online_count(window)
    }

    /// This node's id
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Name announced in discovery broadcasts
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Advertised address, once started
    pub fn live_address(&self) -> Option<LiveAddressInfo> {
        self.running.as_ref().map(|running| running.ctx.live)
    }

    /// Bound socket address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .and_then(|running| running.ctx.transport.local_addr().ok())
    }

    /// True between a successful `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.running.is_some() && self.flag.is_running()
    }

    fn router(&self) -> Result<&MessageRouter> {
        match &self.running {
            Some(running) if self.flag.is_running() => Ok(&running.router),
            _ => Err(NetworkError::NotRunning.into()),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.flag.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryContactStore;
    use crate::transport::mock::{MockTransport, RecordingRelay};
    use std::time::Duration;

    fn node() -> (Node, Arc<MemoryContactStore>) {
        let store = Arc::new(MemoryContactStore::new());
        let relay = Arc::new(RecordingRelay::new(false));
        let node = Node::new(NexpingConfig::default(), store.clone(), relay).with_display_name("Tester");
        (node, store)
    }

    #[tokio::test]
    async fn test_stopped_node_refuses_to_send() {
        let (node, _) = node();
        assert!(!node.is_running());

        let err = node.deliver("A1", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            crate::utils::NexpingError::Network(NetworkError::NotRunning)
        ));
        assert!(!node.send_message("A1", "hi").await);
        assert!(!node.connect("A1").await);
        assert!(node.live_address().is_none());
    }

    #[tokio::test]
    async fn test_start_registers_self_and_stop_joins_tasks() {
        let (mut node, store) = node();
        let transport = Arc::new(MockTransport::new());
        node.start_on(transport.clone(), LiveAddressInfo::loopback(2948))
            .unwrap();
        assert!(node.is_running());
        assert_eq!(node.local_addr(), Some("127.0.0.1:2948".parse().unwrap()));

        let own = store
            .find_contact_by_node_id(node.node_id().as_str())
            .unwrap()
            .unwrap();
        assert_eq!(own.name, "Tester");
        assert_eq!(own.ip_address, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));

        tokio::time::timeout(Duration::from_secs(5), node.stop())
            .await
            .unwrap();
        assert!(!node.is_running());
        assert!(node.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_running_node_learns_peers_and_delivers() {
        let (mut node, _) = node();
        let transport = Arc::new(MockTransport::new());
        node.start_on(transport.clone(), LiveAddressInfo::loopback(2948))
            .unwrap();

        transport.inject(
            br#"{"type":"discovery","node_id":"A1","name":"Alice"}"#.to_vec(),
            "192.168.1.23:2948".parse().unwrap(),
        );
        for _ in 0..100 {
            if !node.peers().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let peers = node.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].display_name, "Alice");
        assert_eq!(node.online_count().await, 1);

        assert_eq!(node.deliver("A1", "hello").await.unwrap(), DeliveryPath::Local);
        assert!(node.deliver("nobody", "hello").await.unwrap_err().is_peer_not_found());
        assert!(node.connect("A1").await);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_node_can_restart() {
        let (mut node, _) = node();
        node.start_on(Arc::new(MockTransport::new()), LiveAddressInfo::loopback(2948))
            .unwrap();
        node.stop().await;

        node.start_on(Arc::new(MockTransport::new()), LiveAddressInfo::loopback(2948))
            .unwrap();
        assert!(node.is_running());
        node.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_to_start() {
        let mut config = NexpingConfig::default();
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.discovery.broadcast_min_secs = 30;
        config.discovery.broadcast_max_secs = 20;
        config.discovery.keep_alive_secs = 90;
        config.resolver.stun_servers.clear();
        assert!(config.validate().is_err());

        let store = Arc::new(MemoryContactStore::new());
        let mut node = Node::new(config, store.clone(), Arc::new(RecordingRelay::new(false)));

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, crate::utils::NexpingError::Config(_)));
        assert!(!node.is_running());

        let transport = Arc::new(MockTransport::new());
        let err = node
            .start_on(transport.clone(), LiveAddressInfo::loopback(2948))
            .unwrap_err();
        assert!(matches!(err, crate::utils::NexpingError::Config(_)));
        assert!(!node.is_running());
        assert!(transport.sent().is_empty());
        assert!(store.contacts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let holder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let mut config = NexpingConfig::default();
        config.network.listen_port = port;
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.resolver.stun_servers.clear();
        config.resolver.fallback_probe_target = "127.0.0.1:9".to_string();

        let mut node = Node::new(
            config,
            Arc::new(MemoryContactStore::new()),
            Arc::new(RecordingRelay::new(false)),
        );
        let err = node.start().await.unwrap_err();
        assert!(!err.is_recoverable());
        assert!(!node.is_running());
    }
}
