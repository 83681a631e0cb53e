use chrono::{DateTime, Utc};

use super::error::PropagationError;
use crate::fetch::{AircraftState, OrbitalElementSet};
use crate::observer::{geodetic_to_ecef_km, teme_to_ecef_position, ObserverLocation, Topocentric};

/// Where an object sits relative to the observer and in the Earth-fixed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    pub look: Topocentric,
    pub ecef_km: [f64; 3],
}

pub fn satellite_position(
    observer: &ObserverLocation,
    set: &OrbitalElementSet,
    timestamp: DateTime<Utc>,
) -> Result<SkyPosition, PropagationError> {
    let minutes = set
        .elements
        .datetime_to_minutes_since_epoch(&timestamp.naive_utc())
        .map_err(|e| PropagationError::Time(e.to_string()))?;

    let prediction = set.constants.propagate(minutes)?;

    let sidereal =
        sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&timestamp.naive_utc()));
    let ecef_km = teme_to_ecef_position(prediction.position, sidereal);

    Ok(SkyPosition {
        look: observer.look_at(ecef_km),
        ecef_km,
    })
}

pub fn aircraft_position(observer: &ObserverLocation, aircraft: &AircraftState) -> SkyPosition {
    let ecef_km = geodetic_to_ecef_km(
        aircraft.latitude_deg,
        aircraft.longitude_deg,
        aircraft.altitude_m,
    );
    SkyPosition {
        look: observer.look_at(ecef_km),
        ecef_km,
    }
}
