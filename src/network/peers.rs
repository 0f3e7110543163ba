//! In-memory directory of known peers with liveness bookkeeping.

use crate::identity::default_display_name;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// One known remote node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    /// Peer's node id
    pub node_id: String,
    /// Human-readable name
    pub display_name: String,
    /// Last observed datagram source
    pub local_address: Option<SocketAddr>,
    /// Self-reported public endpoint
    pub public_address: Option<SocketAddr>,
    /// Last time anything refreshed this peer
    pub last_seen: DateTime<Utc>,
}

impl PeerRecord {
    /// Seen within `window` of `now`
    pub fn is_online(&self, now: DateTime<Utc>, window: Duration) -> bool {
        idle(self, now) < window
    }
}

/// Partial peer info for [`PeerTable::upsert`]; `None` keeps what is stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerUpdate {
    /// New display name
    pub display_name: Option<String>,
    /// New observed address
    pub local_address: Option<SocketAddr>,
    /// New self-reported public address
    pub public_address: Option<SocketAddr>,
}

fn idle(record: &PeerRecord, now: DateTime<Utc>) -> Duration {
    (now - record.last_seen).to_std().unwrap_or(Duration::ZERO)
}

/// Known peers keyed by node id
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<String, PeerRecord>,
}

impl PeerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a peer and refresh `last_seen`. Returns true if new.
    pub fn upsert(&mut self, node_id: &str, update: PeerUpdate) -> bool {
        let now = Utc::now();

        if let Some(record) = self.peers.get_mut(node_id) {
            if let Some(name) = update.display_name {
                record.display_name = name;
            }
            if let Some(local) = update.local_address {
                record.local_address = Some(local);
            }
            if let Some(public) = update.public_address {
                record.public_address = Some(public);
            }
            record.last_seen = now;
            return false;
        }

        self.peers.insert(
            node_id.to_string(),
            PeerRecord {
                node_id: node_id.to_string(),
                display_name: update
                    .display_name
                    .unwrap_or_else(|| default_display_name(node_id)),
                local_address: update.local_address,
                public_address: update.public_address,
                last_seen: now,
            },
        );
        true
    }

    /// Refresh `last_seen` of a known peer; false if absent
    pub fn touch(&mut self, node_id: &str) -> bool {
        match self.peers.get_mut(node_id) {
            Some(record) => {
                record.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Copy of one peer's record
    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        self.peers.get(node_id).cloned()
    }

    /// Whether the peer is known
    pub fn contains(&self, node_id: &str) -> bool {
        self.peers.contains_key(node_id)
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peer is known
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Point-in-time copy ordered by node id
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.values().cloned().collect();
        records.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        records
    }

    /// Peers seen within `window`
    pub fn online_count(&self, window: Duration) -> usize {
        let now = Utc::now();
        self.peers
            .values()
            .filter(|record| record.is_online(now, window))
            .count()
    }

    /// Remove every peer idle longer than `eviction_timeout`.
    ///
    /// `on_evict` sees each evicted record exactly once, together with the
    /// table as it stands before that record is removed. Returns the
    /// evicted ids. Refuses to evict anything when
    /// `eviction_timeout` does not exceed `online_window`.
    pub fn evict_expired<F>(
        &mut self,
        online_window: Duration,
        eviction_timeout: Duration,
        mut on_evict: F,
    ) -> Vec<String>
    where
        F: FnMut(&PeerTable, &PeerRecord),
    {
        if eviction_timeout <= online_window {
            log::warn!(
                "Eviction timeout {:?} does not exceed online window {:?}; skipping eviction",
                eviction_timeout,
                online_window
            );
            return Vec::new();
        }

        let now = Utc::now();
        let mut expired: Vec<String> = self
            .peers
            .values()
            .filter(|record| idle(record, now) > eviction_timeout)
            .map(|record| record.node_id.clone())
            .collect();
        expired.sort();

        for node_id in &expired {
            if let Some(record) = self.peers.get(node_id) {
                on_evict(self, record);
            }
            self.peers.remove(node_id);
        }

        expired
    }

    /// Backdate a peer's `last_seen`
    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, node_id: &str, last_seen: DateTime<Utc>) {
        if let Some(record) = self.peers.get_mut(node_id) {
            record.last_seen = last_seen;
        }
    }
}
