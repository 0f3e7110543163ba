//! Datagram protocol definitions and serialization.
//!
//! Every UDP datagram carries exactly one [`WireMessage`], encoded as a JSON
//! object tagged by `"type"`. Field names are snake_case so nodes built from
//! other codebases can interoperate.

use crate::network::LiveAddressInfo;
use crate::utils::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// One message per datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Periodic broadcast announcing a node
    Discovery {
        /// Sender's node id
        node_id: String,
        /// Sender's display name
        #[serde(default)]
        name: Option<String>,
        /// Sender's self-reported public IP
        #[serde(default)]
        public_ip: Option<String>,
        /// Sender's self-reported public port
        #[serde(default)]
        public_port: Option<u16>,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Reply to a discovery carrying the responder's public address
    PeerInfo {
        /// Sender's node id
        node_id: String,
        /// Sender's self-reported public IP
        #[serde(default)]
        public_ip: Option<String>,
        /// Sender's self-reported public port
        #[serde(default)]
        public_port: Option<u16>,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Explicit connection attempt
    ConnectRequest {
        /// Sender's node id
        node_id: String,
        /// Sender's self-reported public IP
        #[serde(default)]
        public_ip: Option<String>,
        /// Sender's self-reported public port
        #[serde(default)]
        public_port: Option<u16>,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Answer to a connect request
    ConnectAck {
        /// Sender's node id
        node_id: String,
        /// Sender's self-reported public IP
        #[serde(default)]
        public_ip: Option<String>,
        /// Sender's self-reported public port
        #[serde(default)]
        public_port: Option<u16>,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Application payload
    Message {
        /// Sender's node id
        from: String,
        /// Recipient's node id
        to: String,
        /// Clear-text content
        content: String,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// Liveness refresh
    KeepAlive {
        /// Sender's node id
        node_id: String,
        /// Send time, informational
        #[serde(default)]
        timestamp: Option<String>,
    },
}

fn now_timestamp() -> Option<String> {
    Some(chrono::Utc::now().to_rfc3339())
}

impl WireMessage {
    /// Create a discovery announcement
    pub fn discovery(node_id: &str, name: &str, live: &LiveAddressInfo) -> Self {
        Self::Discovery {
            node_id: node_id.to_string(),
            name: Some(name.to_string()),
            public_ip: Some(live.public_ip.to_string()),
            public_port: Some(live.public_port),
            timestamp: now_timestamp(),
        }
    }

    /// Create a peer info reply
    pub fn peer_info(node_id: &str, live: &LiveAddressInfo) -> Self {
        Self::PeerInfo {
            node_id: node_id.to_string(),
            public_ip: Some(live.public_ip.to_string()),
            public_port: Some(live.public_port),
            timestamp: now_timestamp(),
        }
    }

    /// Create a connect request
    pub fn connect_request(node_id: &str, live: &LiveAddressInfo) -> Self {
        Self::ConnectRequest {
            node_id: node_id.to_string(),
            public_ip: Some(live.public_ip.to_string()),
            public_port: Some(live.public_port),
            timestamp: now_timestamp(),
        }
    }

    /// Create a connect acknowledgment
    pub fn connect_ack(node_id: &str, live: &LiveAddressInfo) -> Self {
        Self::ConnectAck {
            node_id: node_id.to_string(),
            public_ip: Some(live.public_ip.to_string()),
            public_port: Some(live.public_port),
            timestamp: now_timestamp(),
        }
    }

    /// Create an application message
    pub fn message(from: &str, to: &str, content: &str) -> Self {
        Self::Message {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            timestamp: now_timestamp(),
        }
    }

    /// Create a keep-alive
    pub fn keep_alive(node_id: &str) -> Self {
        Self::KeepAlive {
            node_id: node_id.to_string(),
            timestamp: now_timestamp(),
        }
    }

    /// Serialize to a datagram no larger than `max_size`
    pub fn to_bytes(&self, max_size: usize) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;

        if bytes.len() > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: max_size,
            }
            .into());
        }

        Ok(bytes)
    }

    /// Decode one datagram
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<Self> {
        if bytes.len() > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: max_size,
            }
            .into());
        }

        serde_json::from_slice(bytes).map_err(|e| {
            ProtocolError::InvalidMessage {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => "discovery",
            Self::PeerInfo { .. } => "peer_info",
            Self::ConnectRequest { .. } => "connect_request",
            Self::ConnectAck { .. } => "connect_ack",
            Self::Message { .. } => "message",
            Self::KeepAlive { .. } => "keep_alive",
        }
    }

    /// Node id of the sender
    pub fn sender(&self) -> &str {
        match self {
            Self::Discovery { node_id, .. }
            | Self::PeerInfo { node_id, .. }
            | Self::ConnectRequest { node_id, .. }
            | Self::ConnectAck { node_id, .. }
            | Self::KeepAlive { node_id, .. } => node_id,
            Self::Message { from, .. } => from,
        }
    }
}

/// Interpret a self-reported `(public_ip, public_port)` pair.
///
/// Absent or unparseable IPs yield `None`; a missing port defaults to
/// `default_port`.
pub fn declared_address(
    public_ip: Option<&str>,
    public_port: Option<u16>,
    default_port: u16,
) -> Option<SocketAddr> {
    let ip: IpAddr = match public_ip?.parse() {
        Ok(ip) => ip,
        Err(_) => {
            log::debug!("Ignoring unparseable public address {:?}", public_ip);
            return None;
        }
    };

    Some(SocketAddr::new(ip, public_port.unwrap_or(default_port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = crate::MAX_DATAGRAM_SIZE;

    fn live() -> LiveAddressInfo {
        LiveAddressInfo {
            public_ip: "203.0.113.7".parse().unwrap(),
            public_port: 40000,
        }
    }

    #[test]
    fn test_discovery_wire_shape() {
        let message = WireMessage::discovery("A1", "Alice", &live());
        let value: serde_json::Value =
            serde_json::from_slice(&message.to_bytes(MAX).unwrap()).unwrap();

        assert_eq!(value["type"], "discovery");
        assert_eq!(value["node_id"], "A1");
        assert_eq!(value["name"], "Alice");
        assert_eq!(value["public_ip"], "203.0.113.7");
        assert_eq!(value["public_port"], 40000);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_decode_minimal_discovery() {
        let decoded =
            WireMessage::from_bytes(br#"{"type":"discovery","node_id":"A1","name":"Alice"}"#, MAX)
                .unwrap();

        assert_eq!(
            decoded,
            WireMessage::Discovery {
                node_id: "A1".to_string(),
                name: Some("Alice".to_string()),
                public_ip: None,
                public_port: None,
                timestamp: None,
            }
        );
    }

    #[test]
    fn test_decode_accepts_null_fields_and_naive_timestamps() {
        let raw = br#"{"type":"peer_info","node_id":"B2","public_ip":null,"public_port":null,"timestamp":"2024-05-01T10:00:00.123456"}"#;
        let decoded = WireMessage::from_bytes(raw, MAX).unwrap();
        assert_eq!(decoded.kind(), "peer_info");
        assert_eq!(decoded.sender(), "B2");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = WireMessage::from_bytes(br#"{"type":"gossip","node_id":"A1"}"#, MAX);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(WireMessage::from_bytes(b"\xff\xfe not json", MAX).is_err());
        assert!(WireMessage::from_bytes(br#"{"node_id":"A1"}"#, MAX).is_err());
    }

    #[test]
    fn test_message_size_limit() {
        let message = WireMessage::message("a", "b", &"x".repeat(MAX));
        assert!(message.to_bytes(MAX).is_err());
        assert!(WireMessage::from_bytes(&vec![b' '; MAX + 1], MAX).is_err());
    }

    #[test]
    fn test_message_sender_is_from() {
        let message = WireMessage::message("alice", "bob", "hi");
        assert_eq!(message.sender(), "alice");
        assert_eq!(message.kind(), "message");
    }

    #[test]
    fn test_declared_address() {
        assert_eq!(
            declared_address(Some("198.51.100.1"), Some(5000), 2948),
            Some("198.51.100.1:5000".parse().unwrap())
        );
        assert_eq!(
            declared_address(Some("198.51.100.1"), None, 2948),
            Some("198.51.100.1:2948".parse().unwrap())
        );
        assert_eq!(declared_address(None, Some(5000), 2948), None);
        assert_eq!(declared_address(Some("stun.example"), Some(5000), 2948), None);
    }
}
