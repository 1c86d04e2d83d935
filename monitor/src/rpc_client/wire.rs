//! Reply shapes as they arrive from pods.
//!
//! Every field is optional and numbers are read as `f64` because pods in the
//! wild disagree on integer vs float encodings. Defaults are applied here, once,
//! when converting into the crate's domain types.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::types::{NodeStats, Pod, MAX_LAST_SEEN_SECS};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPod {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_seen_timestamp: Option<f64>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub rpc_port: Option<f64>,
    #[serde(default)]
    pub storage_committed: Option<f64>,
    #[serde(default)]
    pub storage_used: Option<f64>,
    #[serde(default)]
    pub storage_usage_percent: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

impl RawPod {
    /// Entries without an address cannot be tracked and are dropped.
    pub fn into_pod(self) -> Option<Pod> {
        let address = self.address.filter(|a| !a.trim().is_empty())?;
        Some(Pod {
            address,
            pubkey: non_empty(self.pubkey),
            version: non_empty(self.version),
            last_seen_timestamp: self
                .last_seen_timestamp
                .filter(|v| v.is_finite() && *v >= 0.0 && *v <= MAX_LAST_SEEN_SECS as f64)
                .map(|v| v as i64)
                .unwrap_or(0),
            is_public: self.is_public.unwrap_or(false),
            rpc_port: self
                .rpc_port
                .filter(|p| *p > 0.0 && *p <= u16::MAX as f64)
                .map(|p| p as u16),
            storage_committed: count(self.storage_committed),
            storage_used: count(self.storage_used),
            storage_usage_percent: self.storage_usage_percent.filter(|v| v.is_finite()),
            uptime: count(self.uptime),
        })
    }
}

/// `get-pods-with-stats` result. Older pods return the bare list.
///
/// Entries stay untyped until `into_pods` so one malformed entry only costs
/// that entry, not the whole roster.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PodsReply {
    Wrapped {
        #[serde(default)]
        pods: Vec<Value>,
        #[serde(default)]
        total_count: Option<f64>,
    },
    Bare(Vec<Value>),
}

impl PodsReply {
    pub fn into_pods(self) -> Vec<Pod> {
        let (entries, total_count) = match self {
            PodsReply::Wrapped { pods, total_count } => (pods, total_count),
            PodsReply::Bare(pods) => (pods, None),
        };

        if let Some(total) = total_count {
            if total as usize != entries.len() {
                debug!(
                    "Roster advertises total_count {} but carries {} entries",
                    total,
                    entries.len()
                );
            }
        }

        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<RawPod>(entry) {
                Ok(raw) => raw.into_pod(),
                Err(e) => {
                    debug!("Dropping malformed roster entry: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub ram_used: Option<f64>,
    #[serde(default)]
    pub ram_total: Option<f64>,
    #[serde(default)]
    pub disk_used: Option<f64>,
    #[serde(default)]
    pub disk_total: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub packets_received: Option<f64>,
    #[serde(default)]
    pub packets_sent: Option<f64>,
    #[serde(default)]
    pub active_streams: Option<f64>,
    #[serde(default)]
    pub file_size: Option<f64>,
    #[serde(default)]
    pub total_bytes: Option<f64>,
    #[serde(default)]
    pub total_pages: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<f64>,
    #[serde(default)]
    pub current_index: Option<f64>,
}

impl From<RawStats> for NodeStats {
    fn from(raw: RawStats) -> Self {
        let file_size = count(raw.file_size);
        let total_bytes = optional_count(raw.total_bytes);

        NodeStats {
            cpu_percent: raw
                .cpu_percent
                .filter(|v| v.is_finite())
                .map(|v| v.clamp(0.0, 100.0))
                .unwrap_or(0.0),
            ram_used: count(raw.ram_used),
            ram_total: count(raw.ram_total),
            // Pods that do not report disk figures expose their storage file instead.
            disk_used: optional_count(raw.disk_used)
                .or(total_bytes)
                .unwrap_or(0),
            disk_total: optional_count(raw.disk_total).unwrap_or(file_size),
            uptime: count(raw.uptime),
            packets_received: count(raw.packets_received),
            packets_sent: count(raw.packets_sent),
            active_streams: count(raw.active_streams),
            file_size,
            total_bytes,
            total_pages: optional_count(raw.total_pages),
            last_updated: raw
                .last_updated
                .filter(|v| v.is_finite())
                .map(|v| v as i64),
            current_index: optional_count(raw.current_index),
        }
    }
}

fn optional_count(v: Option<f64>) -> Option<u64> {
    v.filter(|x| x.is_finite()).map(|x| x.max(0.0) as u64)
}

fn count(v: Option<f64>) -> u64 {
    optional_count(v).unwrap_or(0)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
