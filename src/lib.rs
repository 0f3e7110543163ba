//! # NexPing
//!
//! A peer-to-peer messaging node for local networks, with best-effort
//! reachability across NAT.
//!
//! ## Features
//!
//! - **LAN Discovery**: Periodic UDP broadcast announcements with randomized jitter
//! - **Liveness Tracking**: Keep-alives, an online window and timed eviction
//! - **Layered Delivery**: Direct LAN address, then public endpoint, then HTTP relay
//! - **Public Address Resolution**: STUN-style probing with local fallback
//! - **Contact Persistence**: Pluggable contact store for presence and messages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexping::{HttpRelay, MemoryContactStore, NexpingConfig, Node};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NexpingConfig::default();
//!     let relay = Arc::new(HttpRelay::new(&config.relay)?);
//!     let mut node = Node::new(config, Arc::new(MemoryContactStore::new()), relay);
//!     node.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     node.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`identity`]: Node identifiers
//! - [`network`]: Peer table, address resolution, discovery tasks and routing
//! - [`node`]: Lifecycle of a running node
//! - [`store`]: Contact persistence seam
//! - [`transport`]: Wire protocol, UDP socket and relay channel
//! - [`utils`]: Configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod identity;
pub mod network;
pub mod node;
pub mod store;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use identity::NodeId;
pub use network::{DeliveryPath, LiveAddressInfo, PeerRecord};
pub use node::Node;
pub use store::{Contact, ContactStore, MemoryContactStore};
pub use transport::{HttpRelay, RelayChannel, WireMessage};
pub use utils::{NexpingConfig, NexpingError, Result};

/// Largest datagram sent or accepted, in bytes
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Default configuration values
pub mod defaults {
    /// Default port for discovery and data
    pub const DEFAULT_PORT: u16 = 2948;

    /// Default discovery broadcast destinations
    pub const BROADCAST_ADDRESSES: &[&str] = &[
        "255.255.255.255",
        "192.168.1.255",
        "192.168.0.255",
        "10.0.0.255",
        "172.16.0.255",
    ];

    /// Default STUN endpoints, tried in order
    pub const STUN_SERVERS: &[&str] = &[
        "stun.l.google.com:19302",
        "stun1.l.google.com:19302",
        "stun2.l.google.com:19302",
        "stun3.l.google.com:19302",
        "stun4.l.google.com:19302",
    ];
}
