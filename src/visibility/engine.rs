use chrono::{DateTime, Utc};

use super::propagation::{aircraft_position, satellite_position};
use super::types::{ObjectKind, VisibilityReport, VisibleObject};
use crate::fetch::{AircraftSet, ElementCatalog};
use crate::horizon::HorizonProfile;
use crate::observer::{ObserverLocation, Topocentric};

/// Satellites are visible at or above the local horizon altitude.
pub fn satellite_is_visible(horizon: &HorizonProfile, look: &Topocentric) -> bool {
    horizon.is_loaded() && look.altitude_deg >= horizon.altitude_at(look.azimuth_deg)
}

/// Aircraft must also be within the line-of-sight distance for their
/// azimuth, since nearby terrain can hide low traffic.
pub fn aircraft_is_visible(horizon: &HorizonProfile, look: &Topocentric) -> bool {
    satellite_is_visible(horizon, look) && look.range_m <= horizon.max_distance_at(look.azimuth_deg)
}

/// Compute every satellite and aircraft visible from `observer` at `now`.
///
/// Deterministic and free of side effects: identical inputs give an
/// identical report. Element sets that fail to propagate are left out.
pub fn compute_visibility(
    observer: &ObserverLocation,
    horizon: &HorizonProfile,
    catalog: &ElementCatalog,
    aircraft: &AircraftSet,
    now: DateTime<Utc>,
) -> VisibilityReport {
    let mut report = VisibilityReport::empty(now);

    for set in catalog.values() {
        let Ok(position) = satellite_position(observer, set, now) else {
            continue;
        };
        if !satellite_is_visible(horizon, &position.look) {
            continue;
        }
        report
            .satellites
            .entry(set.group.clone())
            .or_default()
            .push(VisibleObject {
                kind: ObjectKind::Satellite,
                name: set.name.clone(),
                azimuth_deg: position.look.azimuth_deg,
                altitude_deg: position.look.altitude_deg,
                distance_m: None,
                group: Some(set.group.clone()),
                position: position.ecef_km.into(),
            });
    }

    for state in aircraft.values() {
        let position = aircraft_position(observer, state);
        if !aircraft_is_visible(horizon, &position.look) {
            continue;
        }
        report.aircraft.push(VisibleObject {
            kind: ObjectKind::Aircraft,
            name: state.callsign.clone(),
            azimuth_deg: position.look.azimuth_deg,
            altitude_deg: position.look.altitude_deg,
            distance_m: Some(position.look.range_m),
            group: None,
            position: position.ecef_km.into(),
        });
    }

    report.sort();
    report
}
