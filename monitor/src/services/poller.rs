use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::{now_millis, now_unix};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, RpcError};
use crate::rpc_client::{PodRpc, RpcClient};
use crate::services::aggregator::{aggregate, NetworkOverview};
use crate::services::differ::{SnapshotDiffer, EVENT_LOG_CAPACITY};
use crate::services::discovery::discover_roster;
use crate::services::fetcher::{fetch_all, worst_case_duration, FetchTarget};
use crate::services::geo::{GeoClient, GeoLocation};
use crate::services::health_scorer::{score, HealthInput, HealthScore};
use crate::types::{is_online, ChangeEvent, NodeStats, Pod, Snapshot};

// ============================================================================
// Cycle Results
// ============================================================================

/// One pod as served to consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodView {
    #[serde(flatten)]
    pub pod: Pod,
    pub stats: Option<NodeStats>,
    pub ram_percent: Option<f64>,
    pub online: bool,
    pub health: HealthScore,
    pub geo: Option<GeoLocation>,
}

/// Everything derived from the last successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub snapshot: Arc<Snapshot>,
    pub overview: NetworkOverview,
    pub pods: Vec<PodView>,
    pub events: Vec<ChangeEvent>,
    /// Bootstrap host the roster came from.
    pub source: String,
    pub duration_ms: u64,
    pub completed_at_ms: i64,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Arc<CycleReport>),
    /// Another cycle was already running.
    Skipped,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub data: NetworkOverview,
    pub nodes_reporting: usize,
    pub nodes_queried: usize,
    pub degraded: bool,
    pub source: String,
    pub cycle_duration_ms: u64,
    pub response_time: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodsResponse {
    pub success: bool,
    pub data: Vec<PodView>,
    pub total: usize,
    pub response_time: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub success: bool,
    pub data: Vec<ChangeEvent>,
    pub response_time: u64,
    pub timestamp: i64,
}

/// Structured failure returned in place of data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResponse {
    pub success: bool,
    pub status: &'static str,
    pub error: String,
    pub diagnostics: Vec<String>,
    pub response_time: u64,
    pub timestamp: i64,
}

impl FailureResponse {
    pub fn from_error(err: &MonitorError, started: Instant) -> Self {
        Self {
            success: false,
            status: err.status(),
            error: err.to_string(),
            diagnostics: err.diagnostics(),
            response_time: elapsed_ms(started),
            timestamp: now_millis(),
        }
    }

    fn no_data(started: Instant) -> Self {
        Self {
            success: false,
            status: "no_data",
            error: "no poll cycle has completed yet".to_string(),
            diagnostics: Vec::new(),
            response_time: elapsed_ms(started),
            timestamp: now_millis(),
        }
    }
}

// ============================================================================
// Poller
// ============================================================================

struct CachedRoster {
    fetched_at: Instant,
    source: String,
    roster: Vec<Pod>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs poll cycles and keeps the state that must survive between them.
///
/// At most one cycle runs at a time; a cycle requested while another is in
/// flight is skipped rather than queued.
pub struct Poller {
    config: MonitorConfig,
    rpc: Arc<dyn PodRpc>,
    geo: Option<GeoClient>,
    in_flight: AtomicBool,
    roster_cache: Mutex<Option<CachedRoster>>,
    differ: Mutex<SnapshotDiffer>,
    latest: RwLock<Option<Arc<CycleReport>>>,
    last_error: RwLock<Option<MonitorError>>,
}

impl Poller {
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let rpc = RpcClient::new().map_err(|e| MonitorError::Internal(e.to_string()))?;
        let geo = match &config.geo_url {
            Some(url) => Some(
                GeoClient::new(url, config.geo_timeout)
                    .map_err(|e| MonitorError::Internal(format!("geolocation client: {}", e)))?,
            ),
            None => None,
        };
        Ok(Self::with_rpc(config, Arc::new(rpc), geo))
    }

    pub fn with_rpc(config: MonitorConfig, rpc: Arc<dyn PodRpc>, geo: Option<GeoClient>) -> Self {
        Self {
            config,
            rpc,
            geo,
            in_flight: AtomicBool::new(false),
            roster_cache: Mutex::new(None),
            differ: Mutex::new(SnapshotDiffer::new()),
            latest: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_cycle_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn latest(&self) -> Option<Arc<CycleReport>> {
        self.latest.read().await.clone()
    }

    /// Run one cycle unless one is already in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, MonitorError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!("Poll cycle already in flight, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let started = Instant::now();
        match self.cycle(started).await {
            Ok(report) => {
                info!(
                    "Poll cycle finished in {}ms: {} pods, {} online, {} of {} reporting, {} event(s)",
                    report.duration_ms,
                    report.overview.total_nodes,
                    report.overview.online_nodes,
                    report.overview.nodes_reporting,
                    report.overview.nodes_queried,
                    report.events.len()
                );
                *self.latest.write().await = Some(report.clone());
                *self.last_error.write().await = None;
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                error!("Poll cycle failed: {}", e);
                *self.last_error.write().await = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn cycle(&self, started: Instant) -> Result<Arc<CycleReport>, MonitorError> {
        let now = now_unix();
        let (roster, source) = self.roster().await?;

        let targets: Vec<FetchTarget> = roster
            .iter()
            .filter(|p| self.config.fetch_offline || is_online(p.last_seen_timestamp, now))
            .map(FetchTarget::from_pod)
            .collect();
        debug!(
            "Fetching stats from {} of {} pods (worst case {:?})",
            targets.len(),
            roster.len(),
            worst_case_duration(targets.len(), self.config.rpc_timeout)
        );

        let stats = fetch_all(self.rpc.as_ref(), &targets, self.config.rpc_timeout).await;
        let snapshot = Arc::new(Snapshot::new(now, roster, stats));

        let locations = match &self.geo {
            Some(geo) => {
                let hosts: Vec<String> = snapshot.roster.iter().map(|p| p.host().to_string()).collect();
                geo.locate(&hosts).await
            }
            None => HashMap::new(),
        };

        let overview = aggregate(&snapshot, &locations);
        let pods = pod_views(&snapshot, &locations);
        let events = self.differ.lock().await.observe(snapshot.clone());

        Ok(Arc::new(CycleReport {
            snapshot,
            overview,
            pods,
            events,
            source,
            duration_ms: elapsed_ms(started),
            completed_at_ms: now_millis(),
        }))
    }

    async fn roster(&self) -> Result<(Vec<Pod>, String), MonitorError> {
        let mut cache = self.roster_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.config.roster_ttl {
                debug!("Reusing roster from {} ({} pods)", cached.source, cached.roster.len());
                return Ok((cached.roster.clone(), cached.source.clone()));
            }
        }

        let discovered = discover_roster(
            self.rpc.as_ref(),
            &self.config.bootstrap_hosts,
            self.config.rpc_port,
            self.config.rpc_timeout,
        )
        .await?;

        *cache = Some(CachedRoster {
            fetched_at: Instant::now(),
            source: discovered.source.clone(),
            roster: discovered.roster.clone(),
        });
        Ok((discovered.roster, discovered.source))
    }

    /// Latest report, running a first cycle on demand when none has completed.
    async fn report(&self) -> Result<Arc<CycleReport>, Option<MonitorError>> {
        if let Some(err) = self.last_error.read().await.clone() {
            return Err(Some(err));
        }
        if let Some(report) = self.latest().await {
            return Ok(report);
        }
        match self.run_cycle().await {
            Ok(CycleOutcome::Completed(report)) => Ok(report),
            Ok(CycleOutcome::Skipped) => Err(None),
            Err(e) => Err(Some(e)),
        }
    }

    pub async fn network_stats(&self) -> Result<StatsResponse, FailureResponse> {
        let started = Instant::now();
        let report = self.report().await.map_err(|e| failure(e, started))?;
        let overview = report.overview.clone();

        Ok(StatsResponse {
            success: true,
            nodes_reporting: overview.nodes_reporting,
            nodes_queried: overview.nodes_queried,
            degraded: overview.nodes_reporting < overview.nodes_queried,
            data: overview,
            source: report.source.clone(),
            cycle_duration_ms: report.duration_ms,
            response_time: elapsed_ms(started),
            timestamp: now_millis(),
        })
    }

    pub async fn pods(&self) -> Result<PodsResponse, FailureResponse> {
        let started = Instant::now();
        let report = self.report().await.map_err(|e| failure(e, started))?;

        Ok(PodsResponse {
            success: true,
            total: report.pods.len(),
            data: report.pods.clone(),
            response_time: elapsed_ms(started),
            timestamp: now_millis(),
        })
    }

    pub async fn events(&self, limit: Option<usize>) -> EventsResponse {
        let started = Instant::now();
        let limit = limit.unwrap_or(EVENT_LOG_CAPACITY);
        let data = self.differ.lock().await.log().recent(limit);

        EventsResponse {
            success: true,
            data,
            response_time: elapsed_ms(started),
            timestamp: now_millis(),
        }
    }

    /// Live `get-version` call against a pod from the latest roster.
    /// `None` when the address is not in the roster.
    pub async fn probe_version(&self, address: &str) -> Option<Result<String, RpcError>> {
        let report = self.latest().await?;
        let target = FetchTarget::from_pod(report.snapshot.pod(address)?);
        let result = self
            .rpc
            .get_version(&target.host, target.port, self.config.rpc_timeout)
            .await;
        if let Err(e) = &result {
            warn!("Version probe for {} failed: {}", address, e);
        }
        Some(result)
    }
}

fn pod_views(snapshot: &Snapshot, locations: &HashMap<String, GeoLocation>) -> Vec<PodView> {
    snapshot
        .roster
        .iter()
        .map(|pod| {
            let stats = snapshot.stats_for(&pod.address);
            PodView {
                pod: pod.clone(),
                stats: stats.cloned(),
                ram_percent: stats.and_then(NodeStats::ram_percent),
                online: snapshot.is_online(pod),
                health: score(&HealthInput::from_pod(pod, stats, snapshot.timestamp)),
                geo: locations.get(pod.host()).cloned(),
            }
        })
        .collect()
}

fn failure(err: Option<MonitorError>, started: Instant) -> FailureResponse {
    match err {
        Some(e) => FailureResponse::from_error(&e, started),
        None => FailureResponse::no_data(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
