//! Transport layer for the node.
//!
//! This module provides the datagram wire protocol, the UDP socket seam and
//! the pluggable relay fallback.

pub mod protocol;
pub mod relay;
pub mod udp;

#[cfg(test)]
pub(crate) mod mock;

pub use protocol::*;
pub use relay::{HttpRelay, RelayChannel};
pub use udp::{Transport, UdpTransport};
