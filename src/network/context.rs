//! State shared by the protocol tasks and the router of one running node.

use crate::identity::NodeId;
use crate::network::{LiveAddressInfo, PeerTable};
use crate::transport::{Transport, WireMessage};
use crate::utils::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;

/// Handles every task of a started node holds
#[derive(Clone)]
pub struct NodeContext {
    /// This node's id
    pub node_id: NodeId,
    /// This node's display name
    pub display_name: String,
    /// Address advertised in outgoing messages
    pub live: LiveAddressInfo,
    /// Discovery/data port
    pub port: u16,
    /// Largest datagram sent or accepted
    pub max_datagram_size: usize,
    /// The node's socket
    pub transport: Arc<dyn Transport>,
    /// The node's peer table
    pub peers: Arc<RwLock<PeerTable>>,
}

impl NodeContext {
    /// Encode and send one message
    pub async fn send(&self, message: &WireMessage, target: SocketAddr) -> Result<()> {
        let datagram = message.to_bytes(self.max_datagram_size)?;
        self.transport.send_to(&datagram, target).await
    }

    /// Send and log failure; true if the OS accepted the datagram
    pub async fn try_send(&self, message: &WireMessage, target: SocketAddr) -> bool {
        match self.send(message, target).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to send {} to {}: {}", message.kind(), target, e);
                false
            }
        }
    }
}

/// Shared "running" flag observed by every periodic task
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    /// A raised flag
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// False once `stop` was called
    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clear the flag; every waiter wakes up
    pub fn stop(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once the flag is cleared
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Sleep for `duration`; false if the flag was cleared meanwhile
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => self.is_running(),
            _ = self.stopped() => false,
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_wakes_sleepers() {
        let flag = RunFlag::new();
        let sleeper = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.sleep(Duration::from_secs(3600)).await })
        };

        tokio::task::yield_now().await;
        flag.stop();

        let kept_running = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!kept_running);
        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn test_sleep_completes_while_running() {
        let flag = RunFlag::new();
        assert!(flag.sleep(Duration::from_millis(5)).await);
    }

    #[test]
    fn test_stopped_pending_until_stop() {
        let flag = RunFlag::new();
        let mut stopped = tokio_test::task::spawn(flag.stopped());

        tokio_test::assert_pending!(stopped.poll());
        flag.stop();
        assert!(stopped.is_woken());
        tokio_test::assert_ready!(stopped.poll());
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_stopped() {
        let flag = RunFlag::new();
        flag.stop();
        tokio::time::timeout(Duration::from_secs(1), flag.stopped())
            .await
            .unwrap();
    }
}
