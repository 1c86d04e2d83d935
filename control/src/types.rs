use serde::{Deserialize, Serialize};

// ============================================================================
// Refresh
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub status: String,
    pub events: usize,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// Version Probe
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub address: String,
    pub version: String,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
