//! Recording transports for unit tests.

use crate::transport::{RelayChannel, Transport, WireMessage};
use crate::utils::{NetworkError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Transport that records every send and can refuse chosen targets.
pub struct MockTransport {
    local: SocketAddr,
    sent: Mutex<Vec<(SocketAddr, WireMessage)>>,
    failing: Mutex<HashSet<SocketAddr>>,
    recv_failures: Mutex<usize>,
    inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            local: "127.0.0.1:2948".parse().unwrap(),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            recv_failures: Mutex::new(0),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        }
    }

    /// Make every send to `target` fail
    pub fn fail_sends_to(&self, target: SocketAddr) {
        self.failing.lock().unwrap().insert(target);
    }

    /// Make the next `recv_from` call fail with a socket error
    pub fn fail_next_recv(&self) {
        *self.recv_failures.lock().unwrap() += 1;
    }

    /// Queue a datagram for `recv_from`
    pub fn inject(&self, datagram: Vec<u8>, from: SocketAddr) {
        self.inbound_tx.send((datagram, from)).unwrap();
    }

    /// Every attempted send, including failed ones, in order
    pub fn sent(&self) -> Vec<(SocketAddr, WireMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Attempted sends of one message kind
    pub fn sent_of_kind(&self, kind: &str) -> Vec<(SocketAddr, WireMessage)> {
        self.sent()
            .into_iter()
            .filter(|(_, message)| message.kind() == kind)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<()> {
        let message = WireMessage::from_bytes(datagram, usize::MAX)?;
        self.sent.lock().unwrap().push((target, message));

        if self.failing.lock().unwrap().contains(&target) {
            return Err(NetworkError::SendFailed {
                address: target.to_string(),
                reason: "simulated failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        {
            let mut failures = self.recv_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(NetworkError::ReceiveFailed {
                    reason: "simulated socket error".to_string(),
                }
                .into());
            }
        }

        let mut inbound = self.inbound_rx.lock().await;
        match inbound.recv().await {
            Some((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok((len, from))
            }
            None => Err(NetworkError::ReceiveFailed {
                reason: "mock closed".to_string(),
            }
            .into()),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Relay that records forwards and succeeds or fails as configured.
pub struct RecordingRelay {
    succeed: bool,
    forwarded: Mutex<Vec<(String, WireMessage)>>,
}

impl RecordingRelay {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            forwarded: Mutex::new(Vec::new()),
        }
    }

    pub fn forwarded(&self) -> Vec<(String, WireMessage)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayChannel for RecordingRelay {
    async fn forward(&self, target: &str, message: &WireMessage) -> Result<()> {
        self.forwarded
            .lock()
            .unwrap()
            .push((target.to_string(), message.clone()));

        if self.succeed {
            Ok(())
        } else {
            Err(NetworkError::RelayFailed {
                reason: "simulated relay failure".to_string(),
            }
            .into())
        }
    }
}
