use serde::{Deserialize, Serialize};

use super::frames::{geodetic_to_ecef_km, topocentric_from_ecef, Topocentric};

/// Fixed observatory position. Loaded once from config and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl ObserverLocation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        geodetic_to_ecef_km(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }

    /// Look angles from this observer to an Earth-fixed point.
    pub fn look_at(&self, target_ecef_km: [f64; 3]) -> Topocentric {
        topocentric_from_ecef(
            self.position_ecef_km(),
            self.lat_rad(),
            self.lon_rad(),
            target_ecef_km,
        )
    }

    /// Lat/lon box of `half_width_deg` around the observer, as
    /// (lat_min, lon_min, lat_max, lon_max).
    pub fn bounding_box(&self, half_width_deg: f64) -> (f64, f64, f64, f64) {
        (
            (self.latitude_deg - half_width_deg).max(-90.0),
            self.longitude_deg - half_width_deg,
            (self.latitude_deg + half_width_deg).min(90.0),
            self.longitude_deg + half_width_deg,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equator_prime_meridian_is_on_x_axis() {
        let obs = ObserverLocation::new(0.0, 0.0, 0.0);
        let [x, y, z] = obs.position_ecef_km();
        assert!((x - 6378.137).abs() < 1e-6);
        assert!(y.abs() < 1e-9);
        assert!(z.abs() < 1e-9);
    }

    #[test]
    fn bounding_box_is_clamped_at_the_poles() {
        let obs = ObserverLocation::new(88.0, 10.0, 0.0);
        let (lat_min, lon_min, lat_max, lon_max) = obs.bounding_box(4.0);
        assert_eq!(lat_min, 84.0);
        assert_eq!(lat_max, 90.0);
        assert_eq!(lon_min, 6.0);
        assert_eq!(lon_max, 14.0);
    }
}
