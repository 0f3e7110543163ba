//! Best-effort public address acquisition.
//!
//! The resolver sends a bare STUN binding-request header to each configured
//! endpoint and takes the *source address of the reply datagram* as this
//! node's public address. The reply payload is never parsed. When nothing
//! answers it degrades to the outbound interface address, then loopback.

use crate::utils::{NetworkError, ResolverConfig, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

/// STUN binding request message type
const BINDING_REQUEST: u16 = 0x0001;

/// STUN magic cookie
const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Self-description attached to outgoing discovery and connect messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveAddressInfo {
    /// Advertised IP
    pub public_ip: IpAddr,
    /// Advertised port
    pub public_port: u16,
}

impl LiveAddressInfo {
    /// Loopback address with the given port
    pub fn loopback(port: u16) -> Self {
        Self {
            public_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            public_port: port,
        }
    }

    /// As a socket address
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.public_ip, self.public_port)
    }
}

impl fmt::Display for LiveAddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.public_ip, self.public_port)
    }
}

/// Resolves [`LiveAddressInfo`] once at startup
#[derive(Debug, Clone)]
pub struct AddressResolver {
    servers: Vec<String>,
    probe_timeout: Duration,
    fallback_target: String,
    default_port: u16,
}

impl AddressResolver {
    /// Create a resolver; `default_port` pairs with any fallback IP
    pub fn new(config: &ResolverConfig, default_port: u16) -> Self {
        Self {
            servers: config.stun_servers.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            fallback_target: config.fallback_probe_target.clone(),
            default_port,
        }
    }

    /// Resolve a usable address. Never fails.
    pub async fn resolve(&self) -> LiveAddressInfo {
        for server in &self.servers {
            match self.probe(server).await {
                Ok(info) => {
                    log::info!("STUN: got public address {} from {}", info, server);
                    return info;
                }
                Err(e) => log::warn!("STUN: failed to get info from {}: {}", server, e),
            }
        }

        log::warn!("STUN: all servers failed, using local address");
        self.local_info().await
    }

    /// One probe: send a binding request, trust the reply's source address.
    async fn probe(&self, server: &str) -> Result<LiveAddressInfo> {
        let target = lookup_host(server)
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| NetworkError::InvalidAddress {
                address: server.to_string(),
            })?;

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.send_to(&binding_request(), target).await?;

        let mut buf = [0u8; 1024];
        let (len, source) = timeout(self.probe_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: format!("STUN probe to {server}"),
            })??;

        if len == 0 {
            return Err(NetworkError::InvalidAddress {
                address: format!("empty reply from {server}"),
            }
            .into());
        }

        Ok(LiveAddressInfo {
            public_ip: source.ip(),
            public_port: source.port(),
        })
    }

    /// Outbound interface IP with the default port, or loopback.
    async fn local_info(&self) -> LiveAddressInfo {
        match self.outbound_ip().await {
            Ok(ip) => LiveAddressInfo {
                public_ip: ip,
                public_port: self.default_port,
            },
            Err(e) => {
                log::warn!("Could not determine local address: {}", e);
                LiveAddressInfo::loopback(self.default_port)
            }
        }
    }

    /// Connecting a UDP socket sends nothing; it only selects a route.
    async fn outbound_ip(&self) -> Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(&self.fallback_target).await?;
        Ok(socket.local_addr()?.ip())
    }
}

/// 20-byte STUN header with a fresh random transaction id
fn binding_request() -> [u8; 20] {
    let mut request = [0u8; 20];
    request[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    request[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut request[8..20]);
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(servers: Vec<String>, fallback: &str) -> ResolverConfig {
        ResolverConfig {
            stun_servers: servers,
            probe_timeout_secs: 1,
            fallback_probe_target: fallback.to_string(),
        }
    }

    #[test]
    fn test_binding_request_layout() {
        let first = binding_request();
        let second = binding_request();

        assert_eq!(&first[0..2], &[0x00, 0x01]);
        assert_eq!(&first[2..4], &[0x00, 0x00]);
        assert_eq!(&first[4..8], &[0x21, 0x12, 0xA4, 0x42]);
        assert_ne!(&first[8..], &second[8..]);
    }

    #[tokio::test]
    async fn test_reply_source_becomes_public_address() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 20);
            server.send_to(b"any reply", from).await.unwrap();
        });

        let resolver = AddressResolver::new(&config(vec![server_addr.to_string()], "8.8.8.8:80"), 2948);
        let info = resolver.resolve().await;
        responder.await.unwrap();

        assert_eq!(info.socket_addr(), server_addr);
    }

    #[tokio::test]
    async fn test_silent_server_falls_back_to_local() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();

        let resolver =
            AddressResolver::new(&config(vec![silent_addr.to_string()], "127.0.0.1:9"), 4321);
        let info = resolver.resolve().await;

        assert_eq!(info, LiveAddressInfo::loopback(4321));
        drop(silent);
    }

    #[tokio::test]
    async fn test_unusable_fallback_target_yields_loopback() {
        let resolver = AddressResolver::new(&config(Vec::new(), "not an address"), 2948);
        assert_eq!(resolver.resolve().await, LiveAddressInfo::loopback(2948));
    }
}
