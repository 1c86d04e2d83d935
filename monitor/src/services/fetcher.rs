use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::rpc_client::{PodRpc, DEFAULT_RPC_PORT};
use crate::types::{NodeStats, Pod};

/// Maximum number of stats calls in flight at any moment.
pub const BATCH_SIZE: usize = 20;

/// Where to fetch stats for one roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Roster address, used as the key in the result map.
    pub address: String,
    pub host: String,
    pub port: u16,
}

impl FetchTarget {
    pub fn from_pod(pod: &Pod) -> Self {
        Self {
            address: pod.address.clone(),
            host: pod.host().to_string(),
            port: pod.rpc_port.unwrap_or(DEFAULT_RPC_PORT),
        }
    }
}

/// Upper bound on how long `fetch_all` can take for `targets` entries.
pub fn worst_case_duration(targets: usize, per_call_timeout: Duration) -> Duration {
    let batches = targets.div_ceil(BATCH_SIZE) as u32;
    per_call_timeout * batches
}

/// Fetch `get-stats` for every target, `BATCH_SIZE` at a time.
///
/// Batches run one after another; inside a batch all calls run concurrently.
/// Every target gets an entry in the result, `None` when its call failed.
pub async fn fetch_all<R: PodRpc + ?Sized>(
    rpc: &R,
    targets: &[FetchTarget],
    per_call_timeout: Duration,
) -> HashMap<String, Option<NodeStats>> {
    let mut results = HashMap::with_capacity(targets.len());

    for (batch_no, batch) in targets.chunks(BATCH_SIZE).enumerate() {
        debug!("Fetching stats batch {} ({} pods)", batch_no + 1, batch.len());

        let calls = batch.iter().map(|target| async move {
            let stats = match rpc
                .get_stats(&target.host, target.port, per_call_timeout)
                .await
            {
                Ok(stats) => Some(stats),
                Err(e) => {
                    debug!("Stats fetch for {} failed: {}", target.address, e);
                    None
                }
            };
            (target.address.clone(), stats)
        });

        for (address, stats) in join_all(calls).await {
            results.insert(address, stats);
        }
    }

    let reporting = results.values().filter(|s| s.is_some()).count();
    debug!("{} of {} pods returned stats", reporting, results.len());

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::types::test_support::{pod, stats};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Stats source that hangs for `slow_host`, refuses `dead_host` and tracks peak concurrency.
    struct FakeFleet {
        slow_host: Option<String>,
        dead_host: Option<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeFleet {
        fn new(slow_host: Option<&str>, dead_host: Option<&str>) -> Self {
            Self {
                slow_host: slow_host.map(str::to_string),
                dead_host: dead_host.map(str::to_string),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PodRpc for FakeFleet {
        async fn get_pods_with_stats(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<Vec<Pod>, RpcError> {
            unreachable!()
        }

        async fn get_stats(
            &self,
            host: &str,
            _port: u16,
            timeout: Duration,
        ) -> Result<NodeStats, RpcError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;
            let result = if self.slow_host.as_deref() == Some(host) {
                tokio::time::sleep(timeout).await;
                Err(RpcError::Timeout {
                    method: "get-stats".to_string(),
                    timeout,
                })
            } else if self.dead_host.as_deref() == Some(host) {
                Err(RpcError::Connect {
                    endpoint: host.to_string(),
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(stats(20.0, 1, 4))
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn get_version(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> Result<String, RpcError> {
            unreachable!()
        }
    }

    fn targets(n: usize) -> Vec<FetchTarget> {
        (0..n)
            .map(|i| FetchTarget::from_pod(&pod(&format!("10.0.{}.{}:9001", i / 250, i % 250), 0)))
            .collect()
    }

    #[tokio::test]
    async fn test_one_timeout_yields_one_none_within_one_window() {
        let targets = targets(10);
        let rpc = FakeFleet::new(Some("10.0.0.3"), None);
        let timeout = Duration::from_millis(300);

        let started = Instant::now();
        let results = fetch_all(&rpc, &targets, timeout).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 10);
        assert_eq!(results.values().filter(|s| s.is_none()).count(), 1);
        assert!(results["10.0.0.3:9001"].is_none());
        assert!(elapsed < timeout * 3, "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_hung_http_pod_is_cut_off_while_siblings_report() {
        use crate::rpc_client::RpcClient;
        use serde_json::json;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let timeout = Duration::from_millis(400);
        let reply = json!({"version": "2.0", "result": {"cpu_percent": 10.0, "ram_used": 1, "ram_total": 2}});

        let mut servers = Vec::new();
        for i in 0..6 {
            let server = MockServer::start().await;
            let mut response = ResponseTemplate::new(200).set_body_json(reply.clone());
            if i == 2 {
                response = response.set_delay(Duration::from_secs(5));
            }
            Mock::given(method("POST"))
                .respond_with(response)
                .mount(&server)
                .await;
            servers.push(server);
        }

        let targets: Vec<FetchTarget> = servers
            .iter()
            .enumerate()
            .map(|(i, server)| FetchTarget {
                address: format!("pod-{}", i),
                host: "127.0.0.1".to_string(),
                port: server.address().port(),
            })
            .collect();

        let rpc = RpcClient::new().unwrap();
        let started = Instant::now();
        let results = fetch_all(&rpc, &targets, timeout).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 6);
        assert_eq!(results.values().filter(|s| s.is_none()).count(), 1);
        assert!(results["pod-2"].is_none());
        assert_eq!(results["pod-0"].as_ref().map(|s| s.ram_percent()), Some(Some(50.0)));
        assert!(elapsed < timeout * 2, "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_refused_target_does_not_affect_siblings() {
        let targets = targets(5);
        let rpc = FakeFleet::new(None, Some("10.0.0.0"));

        let results = fetch_all(&rpc, &targets, Duration::from_secs(1)).await;

        assert_eq!(results.len(), 5);
        assert!(results["10.0.0.0:9001"].is_none());
        assert_eq!(results.values().filter(|s| s.is_some()).count(), 4);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_batch_size() {
        let targets = targets(65);
        let rpc = FakeFleet::new(None, None);

        let results = fetch_all(&rpc, &targets, Duration::from_secs(1)).await;

        assert_eq!(results.len(), 65);
        let peak = rpc.peak.load(Ordering::SeqCst);
        assert!(peak <= BATCH_SIZE, "peak concurrency {}", peak);
        assert!(peak > 1, "calls within a batch should overlap");
    }

    #[tokio::test]
    async fn test_empty_targets() {
        let rpc = FakeFleet::new(None, None);
        let results = fetch_all(&rpc, &[], Duration::from_secs(1)).await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_target_uses_advertised_port_or_default() {
        let mut p = pod("10.1.1.1:9001", 0);
        p.rpc_port = Some(7000);
        assert_eq!(FetchTarget::from_pod(&p).port, 7000);

        p.rpc_port = None;
        let target = FetchTarget::from_pod(&p);
        assert_eq!(target.port, DEFAULT_RPC_PORT);
        assert_eq!(target.host, "10.1.1.1");
        assert_eq!(target.address, "10.1.1.1:9001");
    }

    #[test]
    fn test_worst_case_duration() {
        let t = Duration::from_secs(5);
        assert_eq!(worst_case_duration(0, t), Duration::ZERO);
        assert_eq!(worst_case_duration(20, t), t);
        assert_eq!(worst_case_duration(21, t), t * 2);
        assert_eq!(worst_case_duration(1000, t), t * 50);
    }
}
