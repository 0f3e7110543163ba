//! Two real nodes on loopback discovering each other and exchanging a message.

use nexping::{ContactStore, DeliveryPath, MemoryContactStore, NexpingConfig, Node, RelayChannel};
use nexping::{HttpRelay, NexpingError};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

const PORT_A: u16 = 47291;
const PORT_B: u16 = 47292;

fn loopback_config(port: u16, other: u16) -> NexpingConfig {
    let mut config = NexpingConfig::default();
    config.network.listen_port = port;
    config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.network.broadcast_addresses = vec![format!("127.0.0.1:{other}")];
    config.discovery.broadcast_min_secs = 1;
    config.discovery.broadcast_max_secs = 1;
    config.resolver.stun_servers.clear();
    config.resolver.fallback_probe_target = "127.0.0.1:9".to_string();
    config
}

fn relay() -> Arc<dyn RelayChannel> {
    Arc::new(HttpRelay::disabled().unwrap())
}

async fn wait_for_peer(node: &Node, peer_id: &str) -> bool {
    for _ in 0..200 {
        if node.peers().await.iter().any(|peer| peer.node_id == peer_id) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn test_nodes_discover_each_other_and_exchange_messages() {
    let store_a = Arc::new(MemoryContactStore::new());
    let store_b = Arc::new(MemoryContactStore::new());

    let mut alice = Node::new(loopback_config(PORT_A, PORT_B), store_a.clone(), relay())
        .with_display_name("Alice");
    let mut bob = Node::new(loopback_config(PORT_B, PORT_A), store_b.clone(), relay())
        .with_display_name("Bob");

    assert_ok!(alice.start().await);
    assert_ok!(bob.start().await);

    let alice_id = alice.node_id().to_string();
    let bob_id = bob.node_id().to_string();

    assert!(wait_for_peer(&alice, &bob_id).await, "alice never saw bob");
    assert!(wait_for_peer(&bob, &alice_id).await, "bob never saw alice");

    let seen_by_bob = bob
        .peers()
        .await
        .into_iter()
        .find(|peer| peer.node_id == alice_id)
        .unwrap();
    assert_eq!(seen_by_bob.display_name, "Alice");
    assert_eq!(seen_by_bob.local_address.map(|a| a.port()), Some(PORT_A));

    let path = alice.deliver(&bob_id, "hello bob").await.unwrap();
    assert_eq!(path, DeliveryPath::Local);

    let mut stored = Vec::new();
    for _ in 0..200 {
        if let Some(contact) = store_b.find_contact_by_node_id(&alice_id).unwrap() {
            stored = store_b.messages(contact.id).unwrap();
            if !stored.is_empty() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "hello bob");

    let own = store_a.find_contact_by_node_id(&alice_id).unwrap().unwrap();
    assert_eq!(own.port, Some(PORT_A));

    alice.stop().await;
    bob.stop().await;
    assert!(!alice.is_running());
    assert!(matches!(
        alice.deliver(&bob_id, "late").await,
        Err(NexpingError::Network(_))
    ));
}
