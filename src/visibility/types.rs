use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Satellite,
    Aircraft,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Satellite => "satellite",
            ObjectKind::Aircraft => "aircraft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "satellite" => Some(ObjectKind::Satellite),
            "aircraft" => Some(ObjectKind::Aircraft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EcefPosition {
    pub x_km: f64,
    pub y_km: f64,
    pub z_km: f64,
}

impl From<[f64; 3]> for EcefPosition {
    fn from(p: [f64; 3]) -> Self {
        Self {
            x_km: p[0],
            y_km: p[1],
            z_km: p[2],
        }
    }
}

/// An object above the local horizon at computation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VisibleObject {
    pub kind: ObjectKind,
    pub name: String,
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
    /// Slant range, aircraft only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    /// Constellation tag, satellites only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub position: EcefPosition,
}

/// Result of one visibility computation. Live reads and stored snapshots
/// share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VisibilityReport {
    pub timestamp: DateTime<Utc>,
    /// Visible satellites by constellation, each list ordered by name.
    pub satellites: BTreeMap<String, Vec<VisibleObject>>,
    /// Visible aircraft ordered by callsign.
    pub aircraft: Vec<VisibleObject>,
}

impl VisibilityReport {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn satellite_count(&self) -> usize {
        self.satellites.values().map(Vec::len).sum()
    }

    pub fn aircraft_count(&self) -> usize {
        self.aircraft.len()
    }

    /// All objects, satellites first by group then aircraft.
    pub fn objects(&self) -> impl Iterator<Item = &VisibleObject> {
        self.satellites.values().flatten().chain(self.aircraft.iter())
    }

    /// Rebuild a report from a flat object list, restoring grouping and order.
    pub fn from_objects(
        timestamp: DateTime<Utc>,
        objects: impl IntoIterator<Item = VisibleObject>,
    ) -> Self {
        let mut report = Self::empty(timestamp);
        for object in objects {
            match object.kind {
                ObjectKind::Satellite => {
                    let group = object.group.clone().unwrap_or_else(|| object.name.clone());
                    report.satellites.entry(group).or_default().push(object);
                }
                ObjectKind::Aircraft => report.aircraft.push(object),
            }
        }
        report.sort();
        report
    }

    pub(crate) fn sort(&mut self) {
        for list in self.satellites.values_mut() {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }
        self.aircraft.sort_by(|a, b| a.name.cmp(&b.name));
    }
}
