use std::io::Read;
use std::path::Path;

use serde::Serialize;
use utoipa::ToSchema;

use super::error::HorizonError;

/// Altitude reported for every azimuth when no profile could be loaded.
/// Nothing is ever classified visible against it.
const OBSTRUCTED_ALTITUDE_DEG: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct HorizonSample {
    pub azimuth_deg: f64,
    pub min_altitude_deg: f64,
    pub max_distance_m: f64,
}

/// Terrain obstruction curve, periodic over [0, 360).
///
/// Samples are kept sorted with strictly increasing azimuth. Between the last
/// and the first sample the curve wraps through 360/0. A profile is immutable;
/// reloading means building a new one and swapping it in.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonProfile {
    samples: Vec<HorizonSample>,
}

impl HorizonProfile {
    pub fn new(samples: Vec<HorizonSample>) -> Result<Self, HorizonError> {
        if samples.is_empty() {
            return Err(HorizonError::Empty);
        }

        let mut normalized = Vec::with_capacity(samples.len());
        for sample in samples {
            let fields = [
                sample.azimuth_deg,
                sample.min_altitude_deg,
                sample.max_distance_m,
            ];
            if fields.iter().any(|v| !v.is_finite()) {
                return Err(HorizonError::InvalidSample {
                    azimuth_deg: sample.azimuth_deg,
                    reason: "non-finite value".into(),
                });
            }
            if !(-90.0..=90.0).contains(&sample.min_altitude_deg) {
                return Err(HorizonError::InvalidSample {
                    azimuth_deg: sample.azimuth_deg,
                    reason: format!("altitude {} out of range", sample.min_altitude_deg),
                });
            }
            normalized.push(HorizonSample {
                azimuth_deg: normalize_azimuth(sample.azimuth_deg),
                ..sample
            });
        }

        normalized.sort_by(|a, b| a.azimuth_deg.total_cmp(&b.azimuth_deg));
        if let Some(pair) = normalized
            .windows(2)
            .find(|w| w[0].azimuth_deg >= w[1].azimuth_deg)
        {
            return Err(HorizonError::InvalidSample {
                azimuth_deg: pair[1].azimuth_deg,
                reason: "duplicate azimuth".into(),
            });
        }

        Ok(Self {
            samples: normalized,
        })
    }

    /// Same minimum altitude and distance cutoff in every direction.
    pub fn flat(min_altitude_deg: f64, max_distance_m: f64) -> Self {
        Self {
            samples: vec![HorizonSample {
                azimuth_deg: 0.0,
                min_altitude_deg,
                max_distance_m,
            }],
        }
    }

    /// Profile used when loading failed: everything counts as obstructed.
    pub fn obstructed() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn samples(&self) -> &[HorizonSample] {
        &self.samples
    }

    pub fn altitude_at(&self, azimuth_deg: f64) -> f64 {
        self.interpolate(azimuth_deg, |s| s.min_altitude_deg)
            .unwrap_or(OBSTRUCTED_ALTITUDE_DEG)
    }

    pub fn max_distance_at(&self, azimuth_deg: f64) -> f64 {
        self.interpolate(azimuth_deg, |s| s.max_distance_m)
            .unwrap_or(0.0)
    }

    fn interpolate(&self, azimuth_deg: f64, value: impl Fn(&HorizonSample) -> f64) -> Option<f64> {
        let first = self.samples.first()?;
        let last = self.samples.last()?;
        if self.samples.len() == 1 {
            return Some(value(first));
        }

        let az = normalize_azimuth(azimuth_deg);
        let idx = self.samples.partition_point(|s| s.azimuth_deg <= az);
        let (lo, hi, lo_az, hi_az) = if idx == 0 {
            (last, first, last.azimuth_deg - 360.0, first.azimuth_deg)
        } else if idx == self.samples.len() {
            (last, first, last.azimuth_deg, first.azimuth_deg + 360.0)
        } else {
            let lo = &self.samples[idx - 1];
            let hi = &self.samples[idx];
            (lo, hi, lo.azimuth_deg, hi.azimuth_deg)
        };

        let span = hi_az - lo_az;
        let t = if span > 0.0 { (az - lo_az) / span } else { 0.0 };
        Some(value(lo) + t * (value(hi) - value(lo)))
    }

    /// Parse a HeyWhatsThat-style CSV: one header row, then
    /// `<index>,<azimuth>,<altitude>,<distance>` rows. Short or unparsable
    /// rows are skipped; a repeated azimuth keeps its first occurrence.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, HorizonError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut samples: Vec<HorizonSample> = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            if record.len() < 4 {
                continue;
            }
            let parsed = (
                record[1].parse::<f64>(),
                record[2].parse::<f64>(),
                record[3].parse::<f64>(),
            );
            let (Ok(az), Ok(alt), Ok(dist)) = parsed else {
                continue;
            };
            samples.push(HorizonSample {
                azimuth_deg: normalize_azimuth(az),
                min_altitude_deg: alt,
                max_distance_m: dist,
            });
        }

        samples.sort_by(|a, b| a.azimuth_deg.total_cmp(&b.azimuth_deg));
        let before = samples.len();
        samples.dedup_by(|b, a| a.azimuth_deg == b.azimuth_deg);
        if samples.len() != before {
            log::warn!(
                "Dropped {} horizon rows with repeated azimuth",
                before - samples.len()
            );
        }

        Self::new(samples)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, HorizonError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load the profile, falling back to [`HorizonProfile::obstructed`] on
    /// any error so visibility fails closed.
    pub fn load_or_obstructed(path: &Path) -> Self {
        match Self::from_csv_path(path) {
            Ok(profile) => {
                log::info!(
                    "Loaded {} horizon points from {}",
                    profile.samples.len(),
                    path.display()
                );
                profile
            }
            Err(e) => {
                log::error!(
                    "Failed to load horizon profile {}: {}; treating sky as obstructed",
                    path.display(),
                    e
                );
                Self::obstructed()
            }
        }
    }
}

fn normalize_azimuth(azimuth_deg: f64) -> f64 {
    let az = azimuth_deg.rem_euclid(360.0);
    // rem_euclid can round tiny negatives up to exactly 360
    if az >= 360.0 {
        0.0
    } else {
        az
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(az: f64, alt: f64, dist: f64) -> HorizonSample {
        HorizonSample {
            azimuth_deg: az,
            min_altitude_deg: alt,
            max_distance_m: dist,
        }
    }

    fn ridge() -> HorizonProfile {
        HorizonProfile::new(vec![
            sample(10.0, 4.0, 20_000.0),
            sample(90.0, 12.0, 40_000.0),
            sample(180.0, 2.0, 80_000.0),
            sample(350.0, 8.0, 10_000.0),
        ])
        .unwrap()
    }

    #[test]
    fn interpolates_between_bracketing_samples() {
        let p = ridge();
        assert!((p.altitude_at(50.0) - 8.0).abs() < 1e-9);
        assert!((p.max_distance_at(135.0) - 60_000.0).abs() < 1e-6);
        assert_eq!(p.altitude_at(90.0), 12.0);
    }

    #[test]
    fn wraps_between_last_and_first_sample() {
        let p = ridge();
        // 350 -> 10 spans 20 degrees, 0 is halfway
        assert!((p.altitude_at(0.0) - 6.0).abs() < 1e-9);
        assert!((p.altitude_at(355.0) - 7.0).abs() < 1e-9);
        assert!((p.altitude_at(5.0) - 5.0).abs() < 1e-9);
        assert!((p.max_distance_at(0.0) - 15_000.0).abs() < 1e-6);
    }

    #[test]
    fn continuous_at_the_wrap_boundary() {
        let p = ridge();
        let below = p.altitude_at(359.999);
        let at_zero = p.altitude_at(0.0);
        let at_360 = p.altitude_at(360.0);
        assert!((below - at_zero).abs() < 1e-3);
        assert_eq!(at_zero, at_360);
        assert_eq!(p.altitude_at(-10.0), p.altitude_at(350.0));
    }

    #[test]
    fn continuous_across_the_whole_circle() {
        let p = ridge();
        let mut prev = p.altitude_at(0.0);
        for i in 1..36_000 {
            let az = i as f64 * 0.01;
            let alt = p.altitude_at(az);
            assert!((alt - prev).abs() < 0.01, "jump at {}", az);
            prev = alt;
        }
        assert!((p.altitude_at(0.0) - prev).abs() < 0.01);
    }

    #[test]
    fn single_sample_is_flat() {
        let p = HorizonProfile::flat(10.0, 40_000.0);
        for az in [0.0, 45.0, 90.0, 359.9] {
            assert_eq!(p.altitude_at(az), 10.0);
            assert_eq!(p.max_distance_at(az), 40_000.0);
        }
    }

    #[test]
    fn obstructed_profile_fails_closed() {
        let p = HorizonProfile::obstructed();
        assert!(!p.is_loaded());
        assert_eq!(p.altitude_at(123.0), 90.0);
        assert_eq!(p.max_distance_at(123.0), 0.0);
    }

    #[test]
    fn rejects_duplicate_azimuths() {
        let err = HorizonProfile::new(vec![sample(10.0, 1.0, 1.0), sample(370.0, 2.0, 1.0)]);
        assert!(matches!(err, Err(HorizonError::InvalidSample { .. })));
    }

    #[test]
    fn rejects_empty_profile() {
        assert!(matches!(
            HorizonProfile::new(Vec::new()),
            Err(HorizonError::Empty)
        ));
    }

    #[test]
    fn parses_csv_and_skips_bad_rows() {
        let csv = "\
idx,azimuth,altitude,distance
0,90.0,12.0,40000
1,10.0,4.0,20000
2,not-a-number,1.0,1.0
3,180
4,90.0,99.0,1.0
5,350.0,8.0,10000
";
        let p = HorizonProfile::from_csv_reader(csv.as_bytes()).unwrap();
        let azimuths: Vec<f64> = p.samples().iter().map(|s| s.azimuth_deg).collect();
        assert_eq!(azimuths, vec![10.0, 90.0, 350.0]);
        assert_eq!(p.altitude_at(90.0), 12.0);
    }

    #[test]
    fn missing_file_loads_as_obstructed() {
        let p = HorizonProfile::load_or_obstructed(Path::new("/nonexistent/horizon.csv"));
        assert!(!p.is_loaded());
    }
}
