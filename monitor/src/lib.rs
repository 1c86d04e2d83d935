//! Polling core for a network of independently operated storage pods.
//!
//! One cycle discovers the roster from a bootstrap pod, fetches per-pod stats
//! in bounded batches, and derives an overview, per-pod health scores and
//! change events from the resulting snapshot.

pub mod clock;
pub mod config;
pub mod error;
pub mod rpc_client;
pub mod services;
pub mod types;

pub use config::MonitorConfig;
pub use error::{DiscoveryError, MonitorError, RpcError};
pub use rpc_client::{PodRpc, RpcClient};
pub use types::{ChangeEvent, EventKind, NodeStats, Pod, Snapshot};
pub use services::{CycleOutcome, Poller};
