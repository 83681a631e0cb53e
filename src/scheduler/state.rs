use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::visibility::VisibilityReport;

/// Coordinator bookkeeping. Only the coordinator loop mutates it; handlers
/// see it through [`SchedulerStatus`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub last_tle_fetch: Option<DateTime<Utc>>,
    pub last_aircraft_fetch: Option<DateTime<Utc>>,
    pub last_computation: Option<DateTime<Utc>>,
    pub next_snapshot_at: Option<DateTime<Utc>>,
    pub aircraft_rate_limit_until: Option<DateTime<Utc>>,
    pub force_cooldown_until: Option<DateTime<Utc>>,
    pub last_tle_error: Option<String>,
    pub last_aircraft_error: Option<String>,
    pub last_snapshot_error: Option<String>,
    pub last_snapshot_id: Option<i64>,
    pub satellites_tracked: usize,
    pub aircraft_tracked: usize,
}

/// Read-only view of [`SchedulerState`]. Times are Unix seconds, `null`
/// when the event has not happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub last_tle_fetch: Option<i64>,
    pub last_aircraft_fetch: Option<i64>,
    pub last_computation: Option<i64>,
    pub next_snapshot_at: Option<i64>,
    pub force_snapshot_available_at: Option<i64>,
    pub aircraft_rate_limit_until: Option<i64>,
    pub last_tle_error: Option<String>,
    pub last_aircraft_error: Option<String>,
    pub last_snapshot_error: Option<String>,
    pub last_snapshot_id: Option<i64>,
    pub satellites_tracked: usize,
    pub aircraft_tracked: usize,
}

impl From<&SchedulerState> for SchedulerStatus {
    fn from(state: &SchedulerState) -> Self {
        let secs = |t: Option<DateTime<Utc>>| t.map(|t| t.timestamp());
        Self {
            last_tle_fetch: secs(state.last_tle_fetch),
            last_aircraft_fetch: secs(state.last_aircraft_fetch),
            last_computation: secs(state.last_computation),
            next_snapshot_at: secs(state.next_snapshot_at),
            force_snapshot_available_at: secs(state.force_cooldown_until),
            aircraft_rate_limit_until: secs(state.aircraft_rate_limit_until),
            last_tle_error: state.last_tle_error.clone(),
            last_aircraft_error: state.last_aircraft_error.clone(),
            last_snapshot_error: state.last_snapshot_error.clone(),
            last_snapshot_id: state.last_snapshot_id,
            satellites_tracked: state.satellites_tracked,
            aircraft_tracked: state.aircraft_tracked,
        }
    }
}

/// Most recent visibility computation together with the age of the data it
/// was computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct LiveVisibility {
    #[serde(flatten)]
    pub report: VisibilityReport,
    pub tle_fetched_at: Option<DateTime<Utc>>,
    pub aircraft_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForceSnapshotAccepted {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub satellites: usize,
    pub aircraft: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_unix_seconds_or_null() {
        let state = SchedulerState {
            last_tle_fetch: DateTime::from_timestamp(1_700_000_000, 500_000_000),
            next_snapshot_at: DateTime::from_timestamp(1_700_001_800, 0),
            ..Default::default()
        };
        let value = serde_json::to_value(SchedulerStatus::from(&state)).unwrap();

        assert_eq!(value["last_tle_fetch"], 1_700_000_000);
        assert_eq!(value["next_snapshot_at"], 1_700_001_800);
        assert!(value["last_aircraft_fetch"].is_null());
        assert!(value["force_snapshot_available_at"].is_null());
    }
}
