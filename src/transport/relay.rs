//! Relay fallback for peers that cannot be reached over direct UDP.
//!
//! [`RelayChannel`] is the strategy seam: the router only ever sees the
//! trait. [`HttpRelay`] is the bundled backend; it ships with no endpoints,
//! in which case it fails immediately without touching the network.

use crate::transport::WireMessage;
use crate::utils::{NetworkError, RelayConfig, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Out-of-band delivery path
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Forward `message` towards node `target`
    async fn forward(&self, target: &str, message: &WireMessage) -> Result<()>;
}

/// Body POSTed to a relay endpoint
#[derive(Debug, Serialize)]
struct RelayRequest<'a> {
    target: &'a str,
    message: &'a WireMessage,
    timestamp: String,
}

/// Relay that POSTs JSON to a list of HTTP endpoints, first success wins
pub struct HttpRelay {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl HttpRelay {
    /// Build a relay from configuration
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoints: config.endpoints.clone(),
            client,
        })
    }

    /// Relay with no endpoints; every forward fails
    pub fn disabled() -> Result<Self> {
        Self::new(&RelayConfig::default())
    }

    /// Configured endpoints, in try order
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn post(&self, endpoint: &str, body: &RelayRequest<'_>) -> Result<()> {
        self.client
            .post(endpoint)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl RelayChannel for HttpRelay {
    async fn forward(&self, target: &str, message: &WireMessage) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(NetworkError::RelayFailed {
                reason: "no relay endpoints configured".to_string(),
            }
            .into());
        }

        let body = RelayRequest {
            target,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        for endpoint in &self.endpoints {
            match self.post(endpoint, &body).await {
                Ok(()) => {
                    log::info!("Relay: {} for {} sent via {}", message.kind(), target, endpoint);
                    return Ok(());
                }
                Err(e) => log::warn!("Relay: failed to send via {}: {}", endpoint, e),
            }
        }

        Err(NetworkError::RelayFailed {
            reason: format!("all {} relay endpoints failed", self.endpoints.len()),
        }
        .into())
    }
}
