use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::types::{ChangeEvent, EventKind, Pod, Snapshot};

/// Number of events retained by an `EventLog`.
pub const EVENT_LOG_CAPACITY: usize = 50;

/// Growth in cumulative bytes served between two polls that is worth reporting.
pub const DATA_SERVED_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

/// Active stream count above which a pod is considered under heavy traffic.
pub const HIGH_TRAFFIC_STREAMS: u64 = 50;

const BOOTSTRAP_TOP_N: usize = 3;
const MIB: f64 = 1024.0 * 1024.0;

/// Change events between two consecutive snapshots.
///
/// With no previous snapshot a single bootstrap summary is produced instead of
/// one event per node. Fields missing on either side never produce an event.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Vec<ChangeEvent> {
    match previous {
        None => bootstrap_summary(current).into_iter().collect(),
        Some(previous) => compare(previous, current),
    }
}

fn bootstrap_summary(current: &Snapshot) -> Option<ChangeEvent> {
    if current.roster.is_empty() {
        return None;
    }

    let total = current.roster.len();
    let online = current.roster.iter().filter(|p| current.is_online(p)).count();
    let public = current
        .roster
        .iter()
        .filter(|p| current.is_online(p) && p.is_public)
        .count();

    let mut versions: Vec<(String, usize)> = Vec::new();
    for pod in &current.roster {
        let Some(version) = pod.version.as_deref() else {
            continue;
        };
        match versions.iter_mut().find(|(v, _)| v == version) {
            Some((_, n)) => *n += 1,
            None => versions.push((version.to_string(), 1)),
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    versions.sort_by(|a, b| b.1.cmp(&a.1));
    versions.truncate(BOOTSTRAP_TOP_N);

    let mut contributors: Vec<(&str, u64)> = current
        .roster
        .iter()
        .filter_map(|p| {
            let bytes = current.stats_for(&p.address)?.total_bytes?;
            Some((p.address.as_str(), bytes))
        })
        .filter(|(_, bytes)| *bytes > 0)
        .collect();
    contributors.sort_by(|a, b| b.1.cmp(&a.1));
    contributors.truncate(BOOTSTRAP_TOP_N);

    Some(ChangeEvent::new(
        EventKind::Bootstrap,
        current.timestamp,
        None,
        format!("Observing {} pods ({} online, {} public)", total, online, public),
        json!({
            "total": total,
            "online": online,
            "offline": total - online,
            "public": public,
            "topVersions": versions
                .iter()
                .map(|(v, n)| json!({"version": v, "count": n}))
                .collect::<Vec<_>>(),
            "topContributors": contributors
                .iter()
                .map(|(a, b)| json!({"address": a, "totalBytes": b}))
                .collect::<Vec<_>>(),
        }),
    ))
}

fn compare(previous: &Snapshot, current: &Snapshot) -> Vec<ChangeEvent> {
    let ts = current.timestamp;
    let mut events = Vec::new();

    let previous_addrs: HashSet<&str> =
        previous.roster.iter().map(|p| p.address.as_str()).collect();
    let current_addrs: HashSet<&str> = current.roster.iter().map(|p| p.address.as_str()).collect();

    for pod in &current.roster {
        if !previous_addrs.contains(pod.address.as_str()) {
            events.push(ChangeEvent::new(
                EventKind::Joined,
                ts,
                Some(&pod.address),
                format!("{} joined the network", pod.address),
                json!({
                    "version": pod.version,
                    "isPublic": pod.is_public,
                    "online": current.is_online(pod),
                }),
            ));
        }
    }

    for pod in &previous.roster {
        if !current_addrs.contains(pod.address.as_str()) {
            events.push(ChangeEvent::new(
                EventKind::Left,
                ts,
                Some(&pod.address),
                format!("{} left the network", pod.address),
                json!({ "lastSeen": pod.last_seen_timestamp }),
            ));
        }
    }

    for pod in &current.roster {
        if let Some(before) = previous.pod(&pod.address) {
            compare_pod(previous, before, current, pod, &mut events);
        }
    }

    events
}

fn compare_pod(
    previous: &Snapshot,
    before: &Pod,
    current: &Snapshot,
    after: &Pod,
    events: &mut Vec<ChangeEvent>,
) {
    let ts = current.timestamp;
    let address = after.address.as_str();

    let was_online = previous.is_online(before);
    let is_online = current.is_online(after);
    if was_online != is_online {
        let state = if is_online { "online" } else { "offline" };
        events.push(ChangeEvent::new(
            EventKind::StatusChange,
            ts,
            Some(address),
            format!("{} went {}", address, state),
            json!({
                "from": if was_online { "online" } else { "offline" },
                "to": state,
                "lastSeen": after.last_seen_timestamp,
            }),
        ));
    }

    if let Some(new_version) = after.version.as_deref().filter(|v| !v.is_empty()) {
        if before.version.as_deref() != Some(new_version) {
            events.push(ChangeEvent::new(
                EventKind::VersionChange,
                ts,
                Some(address),
                format!(
                    "{} upgraded {} -> {}",
                    address,
                    before.version.as_deref().unwrap_or("unknown"),
                    new_version
                ),
                json!({ "from": before.version, "to": new_version }),
            ));
        }
    }

    let (Some(old), Some(new)) = (previous.stats_for(address), current.stats_for(address)) else {
        return;
    };

    if let (Some(old_bytes), Some(new_bytes)) = (old.total_bytes, new.total_bytes) {
        let served = new_bytes.saturating_sub(old_bytes);
        if served > DATA_SERVED_THRESHOLD_BYTES {
            events.push(ChangeEvent::new(
                EventKind::DataServed,
                ts,
                Some(address),
                format!("{} served {:.1} MiB", address, served as f64 / MIB),
                json!({ "bytes": served, "totalBytes": new_bytes }),
            ));
        }
    }

    if old.active_streams <= HIGH_TRAFFIC_STREAMS && new.active_streams > HIGH_TRAFFIC_STREAMS {
        events.push(ChangeEvent::new(
            EventKind::HighTraffic,
            ts,
            Some(address),
            format!("{} has {} active streams", address, new.active_streams),
            json!({ "from": old.active_streams, "to": new.active_streams }),
        ));
    }
}

/// Bounded history of change events, newest first.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<ChangeEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one diff's events. The batch lands at the front in its own order.
    pub fn record(&mut self, batch: &[ChangeEvent]) {
        for event in batch.iter().rev() {
            self.events.push_front(event.clone());
        }
        self.events.truncate(self.capacity);
    }

    pub fn recent(&self, limit: usize) -> Vec<ChangeEvent> {
        self.events.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

/// Owns the previous snapshot so consecutive observations can be diffed.
///
/// Each poller holds its own instance; nothing here is global.
#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    previous: Option<Arc<Snapshot>>,
    log: EventLog,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the last observed snapshot, record and return the events.
    pub fn observe(&mut self, current: Arc<Snapshot>) -> Vec<ChangeEvent> {
        let events = diff(self.previous.as_deref(), &current);
        self.log.record(&events);
        self.previous = Some(current);
        events
    }

    pub fn previous(&self) -> Option<&Arc<Snapshot>> {
        self.previous.as_ref()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}
