use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sgp4::{Constants, Elements};

/// One parsed two-line element set with its propagator constants.
#[derive(Debug)]
pub struct OrbitalElementSet {
    pub name: String,
    pub norad_id: u64,
    pub epoch: DateTime<Utc>,
    pub line1: String,
    pub line2: String,
    pub group: String,
    pub elements: Elements,
    pub constants: Constants,
}

/// Element sets keyed by NORAD catalog number. Replaced as a whole on every
/// successful fetch.
pub type ElementCatalog = BTreeMap<u64, OrbitalElementSet>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftState {
    pub callsign: String,
    pub icao24: String,
    pub timestamp: DateTime<Utc>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    /// Barometric altitude above mean sea level.
    pub altitude_m: f64,
}

/// Aircraft keyed by callsign, one fetch cycle's worth.
pub type AircraftSet = BTreeMap<String, AircraftState>;
