use std::time::Duration;
use tracing::{info, warn};

use crate::error::DiscoveryError;
use crate::rpc_client::PodRpc;
use crate::types::Pod;

/// Roster obtained from a bootstrap node.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub source: String,
    pub roster: Vec<Pod>,
}

/// Walk the bootstrap candidates in order and return the first non-empty roster.
///
/// Each candidate is tried at most once. A candidate that errors and one that
/// answers with an empty roster are treated the same way.
pub async fn discover_roster<R: PodRpc + ?Sized>(
    rpc: &R,
    candidates: &[String],
    port: u16,
    timeout: Duration,
) -> Result<Discovered, DiscoveryError> {
    let mut errors = Vec::with_capacity(candidates.len());

    for host in candidates {
        match rpc.get_pods_with_stats(host, port, timeout).await {
            Ok(roster) if !roster.is_empty() => {
                info!(
                    "Discovered {} pod(s) via bootstrap {}:{}",
                    roster.len(),
                    host,
                    port
                );
                return Ok(Discovered {
                    source: host.clone(),
                    roster,
                });
            }
            Ok(_) => {
                warn!("Bootstrap {}:{} returned an empty roster", host, port);
                errors.push(format!("{}: empty roster", host));
            }
            Err(e) => {
                warn!("Bootstrap {}:{} failed: {}", host, port, e);
                errors.push(format!("{}: {}", host, e));
            }
        }
    }

    Err(DiscoveryError::AllBootstrapsFailed { errors })
}
