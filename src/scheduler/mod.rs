mod backoff;
mod coordinator;
mod error;
mod handle;
mod state;

use std::time::Duration;

pub use backoff::Backoff;
pub use coordinator::{Coordinator, SchedulerTask};
pub use error::SchedulerError;
pub use handle::SchedulerHandle;
pub use state::{ForceSnapshotAccepted, LiveVisibility, SchedulerState, SchedulerStatus};

/// Cadences and limits for the coordinator loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tle_fetch_interval: Duration,
    pub plane_fetch_interval: Duration,
    pub snapshot_interval: Duration,
    pub tick: Duration,
    pub force_snapshot_cooldown: Duration,
    pub force_wait_timeout: Duration,
    /// Aircraft older than this are dropped when fetches keep failing.
    pub aircraft_stale_after: Duration,
    pub retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tle_fetch_interval: Duration::from_secs(2 * 60 * 60),
            plane_fetch_interval: Duration::from_secs(10),
            snapshot_interval: Duration::from_secs(30 * 60),
            tick: Duration::from_secs(1),
            force_snapshot_cooldown: Duration::from_secs(30),
            force_wait_timeout: Duration::from_secs(15),
            aircraft_stale_after: Duration::from_secs(2 * 60),
            retention_days: 7,
        }
    }
}
