//! Configuration management for the NexPing node.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters, including the liveness timing
//! ordering the peer table relies on.

use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "nexping.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "NEXPING";

/// Largest UDP payload an IPv4 datagram can carry
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Complete configuration for a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NexpingConfig {
    /// Socket and broadcast configuration
    pub network: NetworkConfig,
    /// Periodic task timing
    pub discovery: DiscoveryConfig,
    /// Public address resolution
    pub resolver: ResolverConfig,
    /// Relay fallback
    pub relay: RelayConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Socket and broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port used for discovery and data
    pub listen_port: u16,
    /// Local address the socket binds to
    pub bind_address: IpAddr,
    /// Broadcast targets for discovery, as `ip` (discovery port) or `ip:port`
    pub broadcast_addresses: Vec<String>,
    /// Largest datagram sent or accepted, in bytes
    pub max_datagram_size: usize,
}

/// Periodic task timing, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Lower bound of the randomized broadcast interval
    pub broadcast_min_secs: u64,
    /// Upper bound of the randomized broadcast interval
    pub broadcast_max_secs: u64,
    /// Keep-alive interval
    pub keep_alive_secs: u64,
    /// Maintenance interval
    pub maintenance_secs: u64,
    /// Freshness window for reporting a peer online
    pub online_window_secs: u64,
    /// Idle time after which a peer is evicted
    pub eviction_timeout_secs: u64,
}

/// Public address resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// STUN-like endpoints as `host:port`, tried in order
    pub stun_servers: Vec<String>,
    /// Per-probe reply timeout
    pub probe_timeout_secs: u64,
    /// Address "connected" to when reading the outbound interface IP
    pub fallback_probe_target: String,
}

/// Relay fallback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP relay endpoints, tried in order; empty disables the relay
    pub endpoints: Vec<String>,
    /// Per-endpoint timeout
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

/// Liveness thresholds shared by the keep-alive and maintenance tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessTiming {
    /// How often keep-alives go out
    pub keep_alive_interval: Duration,
    /// A peer seen within this window counts as online
    pub online_window: Duration,
    /// A peer idle longer than this is evicted
    pub eviction_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: crate::defaults::DEFAULT_PORT,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            broadcast_addresses: crate::defaults::BROADCAST_ADDRESSES
                .iter()
                .map(|addr| (*addr).to_string())
                .collect(),
            max_datagram_size: crate::MAX_DATAGRAM_SIZE,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_min_secs: 15,
            broadcast_max_secs: 25,
            keep_alive_secs: 20,
            maintenance_secs: 30,
            online_window_secs: 30,
            eviction_timeout_secs: 60,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stun_servers: crate::defaults::STUN_SERVERS
                .iter()
                .map(|server| (*server).to_string())
                .collect(),
            probe_timeout_secs: 3,
            fallback_probe_target: "8.8.8.8:80".to_string(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LivenessTiming {
    /// Check `eviction_timeout > online_window > keep_alive_interval`.
    ///
    /// A reachable peer refreshed by every keep-alive can then never be
    /// evicted between two consecutive keep-alives.
    pub fn validate(&self) -> Result<()> {
        if self.online_window <= self.keep_alive_interval {
            return Err(ConfigError::InvalidValue {
                field: "discovery.online_window_secs".to_string(),
                value: format!(
                    "{}s must exceed keep-alive interval {}s",
                    self.online_window.as_secs(),
                    self.keep_alive_interval.as_secs()
                ),
            }
            .into());
        }

        if self.eviction_timeout <= self.online_window {
            return Err(ConfigError::InvalidValue {
                field: "discovery.eviction_timeout_secs".to_string(),
                value: format!(
                    "{}s must exceed online window {}s",
                    self.eviction_timeout.as_secs(),
                    self.online_window.as_secs()
                ),
            }
            .into());
        }

        Ok(())
    }
}

impl Default for LivenessTiming {
    fn default() -> Self {
        DiscoveryConfig::default().timing()
    }
}

impl DiscoveryConfig {
    /// Liveness thresholds described by this section
    pub fn timing(&self) -> LivenessTiming {
        LivenessTiming {
            keep_alive_interval: Duration::from_secs(self.keep_alive_secs),
            online_window: Duration::from_secs(self.online_window_secs),
            eviction_timeout: Duration::from_secs(self.eviction_timeout_secs),
        }
    }
}

impl NexpingConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit path must exist. Without one, `nexping.toml` in the
    /// working directory and then the user config directory are tried.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_locations = [
                    PathBuf::from(DEFAULT_CONFIG_FILE),
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("nexping")
                        .join(DEFAULT_CONFIG_FILE),
                ];

                match default_locations.iter().find(|location| location.exists()) {
                    Some(location) => Self::from_file(location)?,
                    None => Self::default(),
                }
            }
        };

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Override fields from `NEXPING_*` environment variables
    fn merge_from_env(mut self) -> Result<Self> {
        if let Ok(port) = std::env::var(format!("{ENV_PREFIX}_NETWORK_LISTEN_PORT")) {
            self.network.listen_port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{ENV_PREFIX}_NETWORK_LISTEN_PORT"),
                value: port,
            })?;
        }

        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        if let Ok(endpoints) = std::env::var(format!("{ENV_PREFIX}_RELAY_ENDPOINTS")) {
            self.relay.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.network.listen_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "network.listen_port".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if self.network.max_datagram_size == 0 || self.network.max_datagram_size > MAX_UDP_PAYLOAD
        {
            return Err(ConfigError::InvalidValue {
                field: "network.max_datagram_size".to_string(),
                value: self.network.max_datagram_size.to_string(),
            }
            .into());
        }

        let discovery = &self.discovery;
        if discovery.broadcast_min_secs == 0
            || discovery.broadcast_min_secs > discovery.broadcast_max_secs
        {
            return Err(ConfigError::InvalidValue {
                field: "discovery.broadcast_min_secs".to_string(),
                value: format!(
                    "{}..{}",
                    discovery.broadcast_min_secs, discovery.broadcast_max_secs
                ),
            }
            .into());
        }

        if discovery.keep_alive_secs == 0 || discovery.maintenance_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery".to_string(),
                value: "intervals must be non-zero".to_string(),
            }
            .into());
        }

        discovery.timing().validate()?;

        if self.resolver.probe_timeout_secs == 0 || self.relay.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts".to_string(),
                value: "probe and relay timeouts must be non-zero".to_string(),
            }
            .into());
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    value: self.logging.level.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
