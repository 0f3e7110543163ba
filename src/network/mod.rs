//! Network layer for peer discovery and delivery.
//!
//! This module provides the peer table, public address resolution, the
//! discovery protocol tasks and the outbound message router.

pub mod context;
pub mod discovery;
pub mod peers;
pub mod resolver;
pub mod router;

pub use context::{NodeContext, RunFlag};
pub use discovery::{DiscoveryProtocol, MaintenanceReport};
pub use peers::{PeerRecord, PeerTable, PeerUpdate};
pub use resolver::{AddressResolver, LiveAddressInfo};
pub use router::{DeliveryPath, MessageRouter};
