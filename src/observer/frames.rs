// WGS-84
const WGS84_A_KM: f64 = 6378.137;
const WGS84_E2: f64 = 0.00669437999014;

/// Azimuth/altitude/range of a target as seen from an observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Topocentric {
    pub azimuth_deg: f64,
    pub altitude_deg: f64,
    pub range_m: f64,
}

pub fn geodetic_to_ecef_km(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> [f64; 3] {
    let lat = latitude_deg.to_radians();
    let lon = longitude_deg.to_radians();
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let n = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let alt_km = altitude_m / 1000.0;
    [
        (n + alt_km) * cos_lat * lon.cos(),
        (n + alt_km) * cos_lat * lon.sin(),
        (n * (1.0 - WGS84_E2) + alt_km) * sin_lat,
    ]
}

pub fn teme_to_ecef_position(pos_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    [
        pos_teme[0] * cos_gmst + pos_teme[1] * sin_gmst,
        -pos_teme[0] * sin_gmst + pos_teme[1] * cos_gmst,
        pos_teme[2],
    ]
}

pub fn ecef_to_enu(dr: [f64; 3], lat_rad: f64, lon_rad: f64) -> (f64, f64, f64) {
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}

pub fn topocentric_from_ecef(
    observer_ecef_km: [f64; 3],
    observer_lat_rad: f64,
    observer_lon_rad: f64,
    target_ecef_km: [f64; 3],
) -> Topocentric {
    let dr = [
        target_ecef_km[0] - observer_ecef_km[0],
        target_ecef_km[1] - observer_ecef_km[1],
        target_ecef_km[2] - observer_ecef_km[2],
    ];
    let range_km = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();

    let (east, north, up) = ecef_to_enu(dr, observer_lat_rad, observer_lon_rad);
    let azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
    let altitude = if range_km > 0.0 {
        (up / range_km).clamp(-1.0, 1.0).asin().to_degrees()
    } else {
        0.0
    };

    Topocentric {
        azimuth_deg: azimuth,
        altitude_deg: altitude,
        range_m: range_km * 1000.0,
    }
}
