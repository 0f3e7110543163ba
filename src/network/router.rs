//! Outbound delivery: direct LAN, then public endpoint, then relay.

use crate::network::{NodeContext, PeerRecord};
use crate::transport::{RelayChannel, WireMessage};
use crate::utils::{NetworkError, Result};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Path that carried a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPath {
    /// Peer's observed LAN address
    Local,
    /// Peer's self-reported public address
    Public,
    /// Relay service
    Relay,
}

impl fmt::Display for DeliveryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Public => "public",
            Self::Relay => "relay",
        };
        f.write_str(name)
    }
}

/// Sends messages and connect requests to known peers
pub struct MessageRouter {
    ctx: NodeContext,
    relay: Arc<dyn RelayChannel>,
}

impl MessageRouter {
    /// Router over a started node's context
    pub fn new(ctx: NodeContext, relay: Arc<dyn RelayChannel>) -> Self {
        Self { ctx, relay }
    }

    /// Deliver `content` to `peer_id`.
    ///
    /// Tries the peer's local address, then its public address, then the
    /// relay, stopping at the first path that accepts the message.
    ///
    /// # Errors
    ///
    /// `PeerNotFound` without any I/O when the peer is unknown,
    /// `DeliveryFailed` when every path fails, or a protocol error when the
    /// message does not fit in a datagram.
    pub async fn send_message(&self, peer_id: &str, content: &str) -> Result<DeliveryPath> {
        let peer = self.lookup(peer_id).await?;

        let message = WireMessage::message(self.ctx.node_id.as_str(), peer_id, content);
        let datagram = message.to_bytes(self.ctx.max_datagram_size)?;

        let direct = [
            (DeliveryPath::Local, peer.local_address),
            (DeliveryPath::Public, peer.public_address),
        ];
        for (path, target) in direct {
            if let Some(target) = target {
                if self.send_raw(&datagram, target, path).await {
                    log::info!("Message sent to {} via {} ({})", peer_id, path, target);
                    return Ok(path);
                }
            }
        }

        match self.relay.forward(peer_id, &message).await {
            Ok(()) => {
                log::info!("Message sent to {} via relay", peer_id);
                Ok(DeliveryPath::Relay)
            }
            Err(e) => {
                log::warn!("Relay delivery to {} failed: {}", peer_id, e);
                Err(NetworkError::DeliveryFailed {
                    peer_id: peer_id.to_string(),
                }
                .into())
            }
        }
    }

    /// Look up `peer_id` and [`connect`](MessageRouter::connect) to it.
    ///
    /// # Errors
    ///
    /// `PeerNotFound` for unknown peers, otherwise as `connect`.
    pub async fn connect_by_id(&self, peer_id: &str) -> Result<DeliveryPath> {
        let peer = self.lookup(peer_id).await?;
        self.connect(&peer).await
    }

    /// Send a connect request: public address, then local address, then relay.
    ///
    /// # Errors
    ///
    /// `DeliveryFailed` when nothing accepted the request.
    pub async fn connect(&self, peer: &PeerRecord) -> Result<DeliveryPath> {
        let request = WireMessage::connect_request(self.ctx.node_id.as_str(), &self.ctx.live);

        let direct = [
            (DeliveryPath::Public, peer.public_address),
            (DeliveryPath::Local, peer.local_address),
        ];
        for (path, target) in direct {
            if let Some(target) = target {
                if self.ctx.try_send(&request, target).await {
                    log::info!("Connect request sent to {} via {}", peer.node_id, path);
                    return Ok(path);
                }
            }
        }

        if let Err(e) = self.relay.forward(&peer.node_id, &request).await {
            log::warn!("Relay connect to {} failed: {}", peer.node_id, e);
            return Err(NetworkError::DeliveryFailed {
                peer_id: peer.node_id.clone(),
            }
            .into());
        }

        log::info!("Connect request sent to {} via relay", peer.node_id);
        Ok(DeliveryPath::Relay)
    }

    async fn lookup(&self, peer_id: &str) -> Result<PeerRecord> {
        self.ctx.peers.read().await.get(peer_id).ok_or_else(|| {
            NetworkError::PeerNotFound {
                peer_id: peer_id.to_string(),
            }
            .into()
        })
    }

    async fn send_raw(&self, datagram: &[u8], target: SocketAddr, path: DeliveryPath) -> bool {
        match self.ctx.transport.send_to(datagram, target).await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("{} delivery to {} failed: {}", path, target, e);
                false
            }
        }
    }
}
