//! UDP transport for discovery and data datagrams.
//!
//! The node uses a single socket for everything: broadcasts, replies,
//! keep-alives and application messages all leave from, and arrive on, the
//! discovery port.

use crate::utils::{NetworkError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Datagram send/receive seam used by the protocol tasks and the router.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram. Success means the OS accepted it, not delivery.
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<()>;

    /// Wait for the next datagram from anyone
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Tokio UDP socket with broadcast enabled
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::BindFailed` if the port cannot be bound or
    /// broadcast cannot be enabled.
    pub async fn bind(address: SocketAddr) -> Result<Self> {
        let bind_failed = |e: std::io::Error| NetworkError::BindFailed {
            address: address.to_string(),
            reason: e.to_string(),
        };

        let socket = UdpSocket::bind(address).await.map_err(bind_failed)?;
        socket.set_broadcast(true).map_err(bind_failed)?;

        log::debug!("UDP transport bound to {}", address);
        Ok(Self { socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<()> {
        self.socket
            .send_to(datagram, target)
            .await
            .map(|_| ())
            .map_err(|e| {
                NetworkError::SendFailed {
                    address: target.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.map_err(|e| {
            NetworkError::ReceiveFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
