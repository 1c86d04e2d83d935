use serde::Serialize;

use crate::types::{is_online, NodeStats, Pod};

pub const AVAILABILITY_WEIGHT: f64 = 0.35;
pub const PERFORMANCE_WEIGHT: f64 = 0.35;
pub const STORAGE_WEIGHT: f64 = 0.20;
pub const UPTIME_WEIGHT: f64 = 0.10;

const DAY: f64 = 86_400.0;
const WEEK: f64 = 7.0 * DAY;
const MONTH: f64 = 30.0 * DAY;

/// Score given to a component when there is nothing to judge it on.
const NEUTRAL: f64 = 50.0;

/// Raw metrics a health score is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInput {
    pub online: bool,
    pub is_public: bool,
    pub cpu_percent: Option<f64>,
    pub ram_percent: Option<f64>,
    pub storage_committed: u64,
    pub storage_used: u64,
    /// Current session uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthInput {
    pub fn from_pod(pod: &Pod, stats: Option<&NodeStats>, now: i64) -> Self {
        Self {
            online: is_online(pod.last_seen_timestamp, now),
            is_public: pod.is_public,
            cpu_percent: stats.map(|s| s.cpu_percent),
            ram_percent: stats.and_then(NodeStats::ram_percent),
            storage_committed: pod.storage_committed,
            storage_used: pod.storage_used,
            uptime_seconds: pod.uptime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub weight: f64,
    /// The input value the score was derived from, when there was one.
    pub raw: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthComponents {
    pub availability: ScoreBreakdown,
    pub performance: ScoreBreakdown,
    pub storage: ScoreBreakdown,
    pub uptime: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthScore {
    pub overall: u8,
    pub grade: &'static str,
    pub components: HealthComponents,
}

/// Weighted composite health score. Pure and deterministic.
pub fn score(input: &HealthInput) -> HealthScore {
    let availability = ScoreBreakdown {
        score: availability_score(input.online, input.is_public),
        weight: AVAILABILITY_WEIGHT,
        raw: Some(if input.online { 1.0 } else { 0.0 }),
    };

    let performance = ScoreBreakdown {
        score: performance_score(input.cpu_percent, input.ram_percent),
        weight: PERFORMANCE_WEIGHT,
        raw: input.cpu_percent,
    };

    let storage = ScoreBreakdown {
        score: storage_score(input.storage_committed, input.storage_used),
        weight: STORAGE_WEIGHT,
        raw: storage_utilization(input.storage_committed, input.storage_used),
    };

    let uptime = ScoreBreakdown {
        score: uptime_score(input.uptime_seconds),
        weight: UPTIME_WEIGHT,
        raw: Some(input.uptime_seconds as f64),
    };

    let weighted = availability.score * availability.weight
        + performance.score * performance.weight
        + storage.score * storage.weight
        + uptime.score * uptime.weight;
    let overall = weighted.round().clamp(0.0, 100.0) as u8;

    HealthScore {
        overall,
        grade: grade(overall),
        components: HealthComponents {
            availability,
            performance,
            storage,
            uptime,
        },
    }
}

pub fn availability_score(online: bool, is_public: bool) -> f64 {
    match (online, is_public) {
        (false, _) => 0.0,
        (true, true) => 100.0,
        (true, false) => 70.0,
    }
}

/// Mean of the CPU and RAM sub-scores. A missing side is neutral.
pub fn performance_score(cpu_percent: Option<f64>, ram_percent: Option<f64>) -> f64 {
    if cpu_percent.is_none() && ram_percent.is_none() {
        return NEUTRAL;
    }
    let cpu = cpu_percent.map(cpu_score).unwrap_or(NEUTRAL);
    let ram = ram_percent.map(ram_score).unwrap_or(NEUTRAL);
    (cpu + ram) / 2.0
}

pub fn cpu_score(cpu_percent: f64) -> f64 {
    if cpu_percent < 10.0 {
        95.0
    } else if cpu_percent > 90.0 {
        10.0
    } else {
        100.0 - cpu_percent
    }
}

pub fn ram_score(ram_percent: f64) -> f64 {
    if ram_percent < 20.0 {
        70.0 + ram_percent
    } else if ram_percent <= 60.0 {
        100.0
    } else {
        (100.0 - (ram_percent - 60.0) * 2.0).max(0.0)
    }
}

fn storage_utilization(committed: u64, used: u64) -> Option<f64> {
    if committed == 0 {
        return None;
    }
    Some(used as f64 / committed as f64 * 100.0)
}

pub fn storage_score(committed: u64, used: u64) -> f64 {
    let Some(utilization) = storage_utilization(committed, used) else {
        return NEUTRAL;
    };
    if used == 0 {
        return 30.0;
    }
    if utilization < 40.0 {
        60.0 + utilization
    } else if utilization <= 80.0 {
        100.0
    } else {
        (100.0 - (utilization - 80.0) * 2.0).max(50.0)
    }
}

/// Session continuity curve: 0-60 over the first day, 60-80 up to a week,
/// 80-100 up to thirty days, flat afterwards.
pub fn uptime_score(uptime_seconds: u64) -> f64 {
    let t = uptime_seconds as f64;
    if t <= 0.0 {
        0.0
    } else if t < DAY {
        60.0 * t / DAY
    } else if t < WEEK {
        60.0 + 20.0 * (t - DAY) / (WEEK - DAY)
    } else if t < MONTH {
        80.0 + 20.0 * (t - WEEK) / (MONTH - WEEK)
    } else {
        100.0
    }
}

pub fn grade(overall: u8) -> &'static str {
    match overall {
        95.. => "A+",
        85..=94 => "A",
        80..=84 => "B+",
        70..=79 => "B",
        65..=69 => "C+",
        55..=64 => "C",
        40..=54 => "D",
        _ => "F",
    }
}
