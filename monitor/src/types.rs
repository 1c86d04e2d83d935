use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A roster entry older than this many seconds is considered offline.
pub const ONLINE_THRESHOLD_SECS: i64 = 300;

/// Latest last-seen value accepted from a pod (9999-12-31T23:59:59Z).
/// Anything outside `0..=MAX_LAST_SEEN_SECS` is treated as unknown.
pub const MAX_LAST_SEEN_SECS: i64 = 253_402_300_799;

/// Online is always derived from last-seen age, never stored.
pub fn is_online(last_seen_timestamp: i64, now: i64) -> bool {
    now.saturating_sub(last_seen_timestamp) < ONLINE_THRESHOLD_SECS
}

// ============================================================================
// Roster Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Gossip address, `ip:port`. Identity of the node across snapshots.
    pub address: String,
    pub pubkey: Option<String>,
    pub version: Option<String>,
    pub last_seen_timestamp: i64,
    pub is_public: bool,
    pub rpc_port: Option<u16>,
    pub storage_committed: u64,
    pub storage_used: u64,
    pub storage_usage_percent: Option<f64>,
    pub uptime: u64,
}

impl Pod {
    /// Host part of the address (brackets stripped for IPv6).
    pub fn host(&self) -> &str {
        let addr = self.address.as_str();
        if let Some(rest) = addr.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        match addr.rsplit_once(':') {
            // A bare IPv6 address has more than one colon and no port.
            Some((host, _)) if !host.contains(':') => host,
            _ => addr,
        }
    }
}

// ============================================================================
// Node Stats
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub cpu_percent: f64,
    pub ram_used: u64,
    pub ram_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub active_streams: u64,
    pub file_size: u64,
    pub total_bytes: Option<u64>,
    pub total_pages: Option<u64>,
    pub last_updated: Option<i64>,
    pub current_index: Option<u64>,
}

impl NodeStats {
    /// RAM utilization computed from used/total. `None` when total is unknown.
    pub fn ram_percent(&self) -> Option<f64> {
        if self.ram_total == 0 {
            return None;
        }
        Some(self.ram_used as f64 / self.ram_total as f64 * 100.0)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One poll cycle's roster plus per-node stats.
///
/// Built once and never mutated; the poller shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub roster: Vec<Pod>,
    stats: HashMap<String, Option<NodeStats>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Snapshot {
    /// Stats for addresses that are not in the roster are discarded.
    pub fn new(
        timestamp: i64,
        roster: Vec<Pod>,
        mut stats: HashMap<String, Option<NodeStats>>,
    ) -> Self {
        // First entry wins when a bootstrap repeats an address.
        let mut index = HashMap::with_capacity(roster.len());
        for (i, pod) in roster.iter().enumerate() {
            index.entry(pod.address.clone()).or_insert(i);
        }
        stats.retain(|address, _| index.contains_key(address));
        Self {
            timestamp,
            roster,
            stats,
            index,
        }
    }

    pub fn stats_for(&self, address: &str) -> Option<&NodeStats> {
        self.stats.get(address).and_then(|s| s.as_ref())
    }

    pub fn pod(&self, address: &str) -> Option<&Pod> {
        self.index.get(address).map(|&i| &self.roster[i])
    }

    pub fn is_online(&self, pod: &Pod) -> bool {
        is_online(pod.last_seen_timestamp, self.timestamp)
    }

    /// Number of nodes a stats fetch was attempted for.
    pub fn queried_count(&self) -> usize {
        self.stats.len()
    }

    /// Number of nodes that actually returned stats.
    pub fn reporting_count(&self) -> usize {
        self.stats.values().filter(|s| s.is_some()).count()
    }
}

// ============================================================================
// Change Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Bootstrap,
    StatusChange,
    VersionChange,
    DataServed,
    HighTraffic,
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: i64,
    /// Subject node. `None` for network-wide events.
    pub address: Option<String>,
    pub message: String,
    pub payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(
        kind: EventKind,
        timestamp: i64,
        address: Option<&str>,
        message: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp,
            address: address.map(str::to_string),
            message,
            payload,
        }
    }
}
