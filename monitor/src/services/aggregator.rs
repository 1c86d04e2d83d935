use serde::Serialize;
use std::collections::HashMap;

use crate::services::geo::GeoLocation;
use crate::types::Snapshot;

pub use crate::types::{is_online, ONLINE_THRESHOLD_SECS};

pub const UNKNOWN_VERSION: &str = "unknown";
pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountEntry {
    pub name: String,
    pub count: usize,
}

/// Network-wide counters and distributions for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkOverview {
    pub timestamp: i64,

    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    /// Public/private split among online nodes.
    pub public_nodes: usize,
    pub private_nodes: usize,

    pub nodes_queried: usize,
    pub nodes_reporting: usize,

    pub total_storage_committed: u64,
    pub total_storage_used: u64,
    pub storage_utilization_percent: f64,

    pub total_ram: u64,
    pub used_ram: u64,
    pub ram_utilization_percent: f64,

    pub packets_received: u64,
    pub packets_sent: u64,
    pub active_streams: u64,
    pub total_pages: u64,
    pub total_bytes: u64,

    pub avg_cpu_percent: f64,
    pub avg_ram_percent: f64,
    pub avg_uptime_seconds: f64,

    /// In first-seen order; callers sort if they need to.
    pub versions: Vec<CountEntry>,
    pub countries: Vec<CountEntry>,
}

/// Frequency table that keeps first-occurrence order.
#[derive(Default)]
struct Tally {
    entries: Vec<CountEntry>,
    index: HashMap<String, usize>,
}

impl Tally {
    fn add(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&i) => self.entries[i].count += 1,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(CountEntry {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }
}

/// Single pass over the roster.
///
/// CPU/RAM averages only cover nodes that returned stats. The uptime average
/// covers every online node from the roster's own uptime, with or without stats.
pub fn aggregate(snapshot: &Snapshot, geo: &HashMap<String, GeoLocation>) -> NetworkOverview {
    let now = snapshot.timestamp;

    let mut online = 0usize;
    let mut public = 0usize;
    let mut private = 0usize;

    let mut storage_committed = 0u64;
    let mut storage_used = 0u64;
    let mut ram_total = 0u64;
    let mut ram_used = 0u64;
    let mut packets_received = 0u64;
    let mut packets_sent = 0u64;
    let mut active_streams = 0u64;
    let mut total_pages = 0u64;
    let mut total_bytes = 0u64;

    let mut cpu_sum = 0.0f64;
    let mut cpu_count = 0usize;
    let mut ram_pct_sum = 0.0f64;
    let mut ram_pct_count = 0usize;
    let mut uptime_sum = 0.0f64;

    let mut versions = Tally::default();
    let mut countries = Tally::default();

    for pod in &snapshot.roster {
        if is_online(pod.last_seen_timestamp, now) {
            online += 1;
            uptime_sum += pod.uptime as f64;
            if pod.is_public {
                public += 1;
            } else {
                private += 1;
            }
        }

        storage_committed = storage_committed.saturating_add(pod.storage_committed);
        storage_used = storage_used.saturating_add(pod.storage_used);

        versions.add(pod.version.as_deref().unwrap_or(UNKNOWN_VERSION));
        countries.add(
            geo.get(pod.host())
                .map(|g| g.country.as_str())
                .filter(|c| !c.is_empty())
                .unwrap_or(UNKNOWN_COUNTRY),
        );

        if let Some(stats) = snapshot.stats_for(&pod.address) {
            ram_total = ram_total.saturating_add(stats.ram_total);
            ram_used = ram_used.saturating_add(stats.ram_used);
            packets_received = packets_received.saturating_add(stats.packets_received);
            packets_sent = packets_sent.saturating_add(stats.packets_sent);
            active_streams = active_streams.saturating_add(stats.active_streams);
            total_pages = total_pages.saturating_add(stats.total_pages.unwrap_or(0));
            total_bytes = total_bytes.saturating_add(stats.total_bytes.unwrap_or(0));

            cpu_sum += stats.cpu_percent;
            cpu_count += 1;
            if let Some(pct) = stats.ram_percent() {
                ram_pct_sum += pct;
                ram_pct_count += 1;
            }
        }
    }

    let total = snapshot.roster.len();

    NetworkOverview {
        timestamp: now,
        total_nodes: total,
        online_nodes: online,
        offline_nodes: total - online,
        public_nodes: public,
        private_nodes: private,
        nodes_queried: snapshot.queried_count(),
        nodes_reporting: snapshot.reporting_count(),
        total_storage_committed: storage_committed,
        total_storage_used: storage_used,
        storage_utilization_percent: round2(percent(storage_used, storage_committed)),
        total_ram: ram_total,
        used_ram: ram_used,
        ram_utilization_percent: round2(percent(ram_used, ram_total)),
        packets_received,
        packets_sent,
        active_streams,
        total_pages,
        total_bytes,
        avg_cpu_percent: round2(mean(cpu_sum, cpu_count)),
        avg_ram_percent: round2(mean(ram_pct_sum, ram_pct_count)),
        avg_uptime_seconds: round2(mean(uptime_sum, online)),
        versions: versions.entries,
        countries: countries.entries,
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sum / count as f64
}

/// Only applied to values leaving the aggregator.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::{pod, stats};
    use crate::types::{NodeStats, Pod};

    const NOW: i64 = 1_700_000_000;

    fn snapshot(roster: Vec<Pod>, stats: Vec<(&str, Option<NodeStats>)>) -> Snapshot {
        Snapshot::new(
            NOW,
            roster,
            stats
                .into_iter()
                .map(|(a, s)| (a.to_string(), s))
                .collect(),
        )
    }

    fn geo(country: &str) -> GeoLocation {
        GeoLocation {
            country: country.to_string(),
            country_code: None,
            city: None,
            lat: None,
            lon: None,
        }
    }

    #[test]
    fn test_counts_add_up() {
        let mut private = pod("10.0.0.2:9001", NOW - 10);
        private.is_public = false;
        let roster = vec![
            pod("10.0.0.1:9001", NOW - 10),
            private,
            pod("10.0.0.3:9001", NOW - 3600),
            pod("10.0.0.4:9001", NOW - 299),
            pod("10.0.0.5:9001", NOW - 301),
        ];

        let overview = aggregate(&snapshot(roster, vec![]), &HashMap::new());

        assert_eq!(overview.total_nodes, 5);
        assert_eq!(overview.online_nodes, 3);
        assert_eq!(overview.offline_nodes, 2);
        assert_eq!(overview.online_nodes + overview.offline_nodes, overview.total_nodes);
        assert_eq!(overview.public_nodes, 2);
        assert_eq!(overview.private_nodes, 1);
    }

    #[test]
    fn test_empty_roster() {
        let overview = aggregate(&snapshot(vec![], vec![]), &HashMap::new());
        assert_eq!(overview.total_nodes, 0);
        assert_eq!(overview.avg_cpu_percent, 0.0);
        assert_eq!(overview.avg_uptime_seconds, 0.0);
        assert!(overview.versions.is_empty());
    }

    #[test]
    fn test_cpu_average_only_over_reporting_nodes_but_uptime_over_all_online() {
        let mut a = pod("10.0.0.1:9001", NOW);
        a.uptime = 100;
        let mut b = pod("10.0.0.2:9001", NOW);
        b.uptime = 300;
        let mut c = pod("10.0.0.3:9001", NOW);
        c.uptime = 500;

        let overview = aggregate(
            &snapshot(
                vec![a, b, c],
                vec![
                    ("10.0.0.1:9001", Some(stats(30.0, 10, 100))),
                    ("10.0.0.2:9001", Some(stats(60.0, 30, 100))),
                    ("10.0.0.3:9001", None),
                ],
            ),
            &HashMap::new(),
        );

        assert_eq!(overview.avg_cpu_percent, 45.0);
        assert_eq!(overview.avg_ram_percent, 20.0);
        assert_eq!(overview.avg_uptime_seconds, 300.0);
        assert_eq!(overview.nodes_queried, 3);
        assert_eq!(overview.nodes_reporting, 2);
        assert_eq!(overview.total_ram, 200);
        assert_eq!(overview.used_ram, 40);
    }

    #[test]
    fn test_rounding_happens_at_output() {
        let overview = aggregate(
            &snapshot(
                vec![
                    pod("10.0.0.1:9001", NOW),
                    pod("10.0.0.2:9001", NOW),
                    pod("10.0.0.3:9001", NOW),
                ],
                vec![
                    ("10.0.0.1:9001", Some(stats(10.001, 1, 3))),
                    ("10.0.0.2:9001", Some(stats(10.004, 1, 3))),
                    ("10.0.0.3:9001", Some(stats(10.004, 1, 3))),
                ],
            ),
            &HashMap::new(),
        );

        assert_eq!(overview.avg_cpu_percent, 10.0);
        assert_eq!(overview.avg_ram_percent, 33.33);
    }

    #[test]
    fn test_distributions_keep_first_seen_order_and_unknowns() {
        let mut a = pod("10.0.0.1:9001", NOW);
        a.version = Some("0.9.0".to_string());
        let mut b = pod("10.0.0.2:9001", NOW);
        b.version = None;
        let mut c = pod("10.0.0.3:9001", NOW);
        c.version = Some("0.8.0".to_string());
        let mut d = pod("10.0.0.4:9001", NOW);
        d.version = Some("0.9.0".to_string());

        let mut locations = HashMap::new();
        locations.insert("10.0.0.1".to_string(), geo("Germany"));
        locations.insert("10.0.0.3".to_string(), geo("Brazil"));
        locations.insert("10.0.0.4".to_string(), geo("Germany"));

        let overview = aggregate(&snapshot(vec![a, b, c, d], vec![]), &locations);

        let versions: Vec<(&str, usize)> = overview
            .versions
            .iter()
            .map(|e| (e.name.as_str(), e.count))
            .collect();
        assert_eq!(versions, vec![("0.9.0", 2), ("unknown", 1), ("0.8.0", 1)]);

        let countries: Vec<(&str, usize)> = overview
            .countries
            .iter()
            .map(|e| (e.name.as_str(), e.count))
            .collect();
        assert_eq!(countries, vec![("Germany", 2), ("Unknown", 1), ("Brazil", 1)]);
    }

    #[test]
    fn test_storage_and_traffic_sums() {
        let mut a = pod("10.0.0.1:9001", NOW);
        a.storage_committed = 1000;
        a.storage_used = 250;
        let mut b = pod("10.0.0.2:9001", NOW - 5000);
        b.storage_committed = 1000;
        b.storage_used = 0;

        let mut s = stats(5.0, 1, 2);
        s.packets_received = 7;
        s.packets_sent = 9;
        s.active_streams = 4;
        s.total_bytes = Some(1024);
        s.total_pages = None;

        let overview = aggregate(
            &snapshot(vec![a, b], vec![("10.0.0.1:9001", Some(s))]),
            &HashMap::new(),
        );

        assert_eq!(overview.total_storage_committed, 2000);
        assert_eq!(overview.total_storage_used, 250);
        assert_eq!(overview.storage_utilization_percent, 12.5);
        assert_eq!(overview.packets_received, 7);
        assert_eq!(overview.packets_sent, 9);
        assert_eq!(overview.active_streams, 4);
        assert_eq!(overview.total_bytes, 1024);
        assert_eq!(overview.total_pages, 0);
    }
}
