pub mod aggregator;
pub mod differ;
pub mod discovery;
pub mod fetcher;
pub mod geo;
pub mod health_scorer;
pub mod poller;

pub use aggregator::{aggregate, NetworkOverview};
pub use differ::{diff, EventLog, SnapshotDiffer};
pub use discovery::discover_roster;
pub use fetcher::{fetch_all, FetchTarget};
pub use geo::{GeoClient, GeoLocation};
pub use health_scorer::{score, HealthInput, HealthScore};
pub use poller::{CycleOutcome, CycleReport, Poller};
