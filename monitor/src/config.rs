use std::time::Duration;

use crate::rpc_client::DEFAULT_RPC_PORT;
use crate::services::geo::DEFAULT_GEO_URL;

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Bootstrap pods, tried in this order.
    pub bootstrap_hosts: Vec<String>,
    /// Port every bootstrap pod is queried on.
    pub rpc_port: u16,
    /// Per-call timeout for every pod RPC.
    pub rpc_timeout: Duration,
    /// How long a discovered roster is reused before asking a bootstrap again.
    /// Zero means every cycle rediscovers.
    pub roster_ttl: Duration,
    /// Also fetch stats from pods the roster already marks offline.
    pub fetch_offline: bool,
    /// ip-api compatible endpoint. `None` disables geolocation.
    pub geo_url: Option<String>,
    pub geo_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bootstrap_hosts: Vec::new(),
            rpc_port: DEFAULT_RPC_PORT,
            rpc_timeout: Duration::from_secs(8),
            roster_ttl: Duration::ZERO,
            fetch_offline: false,
            geo_url: Some(DEFAULT_GEO_URL.to_string()),
            geo_timeout: Duration::from_secs(10),
        }
    }
}
