//! Error types and handling for the NexPing node.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is the [`NexpingError`] umbrella. The sub-enums mirror the layers of the
//! node: the UDP/relay network, the datagram protocol, configuration and the
//! contact store.

use thiserror::Error;

/// Result type alias for the NexPing library
pub type Result<T> = std::result::Result<T, NexpingError>;

/// Top-level error type for all node operations
#[derive(Error, Debug, Clone)]
pub enum NexpingError {
    /// Network and transport layer errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Datagram protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration and I/O errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Contact store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Network and transport layer errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    /// The listening socket could not be bound
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Socket address involved
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// A datagram could not be sent
    #[error("Send to {address} failed: {reason}")]
    SendFailed {
        /// Socket address involved
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// A datagram could not be received
    #[error("Receive failed: {reason}")]
    ReceiveFailed {
        /// Underlying cause
        reason: String,
    },

    /// Timeout during network operation
    #[error("Network timeout: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
    },

    /// Invalid network address
    #[error("Invalid address: {address}")]
    InvalidAddress {
        /// Socket address involved
        address: String,
    },

    /// Peer not found in the peer table
    #[error("Peer not found: {peer_id}")]
    PeerNotFound {
        /// Target node id
        peer_id: String,
    },

    /// Every delivery path to a peer failed
    #[error("Delivery to {peer_id} failed on every path")]
    DeliveryFailed {
        /// Target node id
        peer_id: String,
    },

    /// Relay forwarding failure
    #[error("Relay failed: {reason}")]
    RelayFailed {
        /// Underlying cause
        reason: String,
    },

    /// Operation requires a started node
    #[error("Node is not running")]
    NotRunning,
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Rejected value
        value: String,
    },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: String,
    },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError {
        /// Underlying cause
        reason: String,
    },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Datagram protocol errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Datagram is not a valid message
    #[error("Invalid message format: {reason}")]
    InvalidMessage {
        /// Underlying cause
        reason: String,
    },

    /// Datagram exceeds the configured size
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Encoded size
        size: usize,
        /// Configured limit
        max: usize,
    },
}

/// Contact store errors
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// No contact with the given id
    #[error("Contact not found: {contact}")]
    ContactNotFound {
        /// Contact that was looked up
        contact: String,
    },

    /// The store backend failed
    #[error("Store backend failure: {reason}")]
    Backend {
        /// Underlying cause
        reason: String,
    },
}

impl NexpingError {
    /// Returns true if the node keeps running after this error.
    ///
    /// Only a failed bind and broken configuration stop a node; everything
    /// else is logged and the affected operation reports failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Network(NetworkError::BindFailed { .. }) | Self::Config(..)
        )
    }

    /// Returns true if this error means the target peer is not known
    pub fn is_peer_not_found(&self) -> bool {
        matches!(self, Self::Network(NetworkError::PeerNotFound { .. }))
    }
}

impl From<std::io::Error> for NexpingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NexpingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for NexpingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(NetworkError::Timeout {
                operation: "relay forward".to_string(),
            })
        } else {
            Self::Network(NetworkError::RelayFailed {
                reason: err.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = NexpingError::Network(NetworkError::PeerNotFound {
            peer_id: "abcd".to_string(),
        });
        assert!(error.to_string().contains("Peer not found: abcd"));
    }

    #[test]
    fn test_error_recovery() {
        let send_error = NexpingError::Network(NetworkError::SendFailed {
            address: "10.0.0.2:2948".to_string(),
            reason: "unreachable".to_string(),
        });
        assert!(send_error.is_recoverable());

        let bind_error = NexpingError::Network(NetworkError::BindFailed {
            address: "0.0.0.0:2948".to_string(),
            reason: "in use".to_string(),
        });
        assert!(!bind_error.is_recoverable());
    }

    #[test]
    fn test_peer_not_found_classification() {
        let error: NexpingError = NetworkError::PeerNotFound {
            peer_id: "x".to_string(),
        }
        .into();
        assert!(error.is_peer_not_found());
        assert!(error.is_recoverable());
        assert!(!NexpingError::Io("closed".to_string()).is_peer_not_found());
    }
}
