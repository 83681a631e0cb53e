use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::error::FetchError;
use super::types::{AircraftSet, AircraftState};
use super::AircraftSource;
use crate::observer::ObserverLocation;

const USER_AGENT: &str = concat!("sky-monitor/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RATE_LIMIT_PENALTY: Duration = Duration::from_secs(300);
const RETRY_AFTER_MARGIN: Duration = Duration::from_secs(5);
const FEET_TO_M: f64 = 0.3048;
const MAX_POINT_RADIUS_NM: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AircraftApi {
    /// `GET <url>?lamin=..&lomin=..&lamax=..&lomax=..` returning `states` rows.
    OpenSky,
    /// `GET <url>/<lat>/<lon>/<radius_nm>` returning `ac` objects.
    AirplanesLive,
}

#[derive(Default)]
struct CacheState {
    aircraft: Arc<AircraftSet>,
    fetched_at: Option<DateTime<Utc>>,
    rate_limited_until: Option<DateTime<Utc>>,
}

/// Queries an aircraft-position service for a box around the observatory.
pub struct AircraftFetcher {
    client: reqwest::Client,
    api: AircraftApi,
    url: String,
    observer: ObserverLocation,
    search_box_deg: f64,
    credentials: Option<(String, String)>,
    state: Mutex<CacheState>,
}

impl AircraftFetcher {
    pub fn new(
        api: AircraftApi,
        url: String,
        observer: ObserverLocation,
        search_box_deg: f64,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let credentials = credentials.filter(|(user, pass)| !user.is_empty() && !pass.is_empty());

        Ok(Self {
            client,
            api,
            url,
            observer,
            search_box_deg,
            credentials,
            state: Mutex::new(CacheState::default()),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let request = match self.api {
            AircraftApi::OpenSky => {
                let (lamin, lomin, lamax, lomax) = self.observer.bounding_box(self.search_box_deg);
                self.client.get(&self.url).query(&[
                    ("lamin", lamin),
                    ("lomin", lomin),
                    ("lamax", lamax),
                    ("lomax", lomax),
                ])
            }
            AircraftApi::AirplanesLive => {
                let radius_nm = (self.search_box_deg * 60.0).min(MAX_POINT_RADIUS_NM);
                self.client.get(format!(
                    "{}/{:.4}/{:.4}/{:.0}",
                    self.url.trim_end_matches('/'),
                    self.observer.latitude_deg,
                    self.observer.longitude_deg,
                    radius_nm
                ))
            }
        };

        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AircraftSource for AircraftFetcher {
    async fn fetch(&self) -> Result<Arc<AircraftSet>, FetchError> {
        let now = Utc::now();
        if let Some(until) = self.rate_limited_until() {
            if now < until {
                log::debug!("Aircraft fetch skipped, rate limited until {}", until);
                return Err(FetchError::RateLimited { until });
            }
        }

        let response = self.request().send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let penalty = retry_after(response.headers());
            let until = now
                + chrono::Duration::from_std(penalty)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300));
            log::warn!(
                "Aircraft API rate limit (429), backing off {}s until {}",
                penalty.as_secs(),
                until
            );
            self.lock().rate_limited_until = Some(until);
            return Err(FetchError::Http {
                status: status.as_u16(),
                retry_after: Some(penalty),
            });
        }

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                retry_after: None,
            });
        }

        let body: Value = response.json().await?;
        let aircraft = match self.api {
            AircraftApi::OpenSky => parse_opensky(&body, now)?,
            AircraftApi::AirplanesLive => parse_airplanes_live(&body, now)?,
        };
        log::debug!("Aircraft API returned {} usable aircraft", aircraft.len());

        let aircraft = Arc::new(aircraft);
        let mut state = self.lock();
        state.aircraft = aircraft.clone();
        state.fetched_at = Some(now);
        state.rate_limited_until = None;
        Ok(aircraft)
    }

    fn cached(&self) -> Arc<AircraftSet> {
        self.lock().aircraft.clone()
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        self.lock().fetched_at
    }

    fn rate_limited_until(&self) -> Option<DateTime<Utc>> {
        self.lock().rate_limited_until
    }
}

fn retry_after(headers: &HeaderMap) -> Duration {
    ["x-rate-limit-retry-after-seconds", "retry-after"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs) + RETRY_AFTER_MARGIN)
        .next()
        .unwrap_or(DEFAULT_RATE_LIMIT_PENALTY)
}

fn timestamp_or(value: Option<&Value>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fallback)
}

fn callsign_or_icao(callsign: Option<&str>, icao24: &str) -> String {
    match callsign.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => icao24.trim().to_uppercase(),
    }
}

/// OpenSky `states` rows: `[icao24, callsign, country, time_position,
/// last_contact, lon, lat, baro_altitude, on_ground, ..., geo_altitude, ...]`.
fn parse_opensky(body: &Value, now: DateTime<Utc>) -> Result<AircraftSet, FetchError> {
    let mut aircraft = AircraftSet::new();
    let states = match body.get("states") {
        None | Some(Value::Null) => return Ok(aircraft),
        Some(Value::Array(rows)) => rows,
        Some(_) => return Err(FetchError::Parse("'states' is not an array".into())),
    };

    for row in states {
        let Some(row) = row.as_array() else {
            continue;
        };
        let field = |i: usize| row.get(i).filter(|v| !v.is_null());
        let (Some(lon), Some(lat)) = (
            field(5).and_then(Value::as_f64),
            field(6).and_then(Value::as_f64),
        ) else {
            continue;
        };
        let Some(alt) = field(7).or_else(|| field(13)).and_then(Value::as_f64) else {
            continue;
        };

        let icao24 = field(0).and_then(Value::as_str).unwrap_or_default();
        let callsign = callsign_or_icao(field(1).and_then(Value::as_str), icao24);
        if callsign.is_empty() {
            continue;
        }
        let timestamp = timestamp_or(field(4).or_else(|| field(3)), now);

        aircraft.insert(
            callsign.clone(),
            AircraftState {
                callsign,
                icao24: icao24.to_string(),
                timestamp,
                latitude_deg: lat,
                longitude_deg: lon,
                altitude_m: alt,
            },
        );
    }

    Ok(aircraft)
}

/// airplanes.live `ac` objects; altitudes are in feet and `alt_baro` may be
/// the string `"ground"`.
fn parse_airplanes_live(body: &Value, now: DateTime<Utc>) -> Result<AircraftSet, FetchError> {
    let mut aircraft = AircraftSet::new();
    let entries = match body.get("ac") {
        None | Some(Value::Null) => return Ok(aircraft),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(FetchError::Parse("'ac' is not an array".into())),
    };
    let response_time = body
        .get("now")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(now);

    for entry in entries {
        let (Some(lat), Some(lon)) = (
            entry.get("lat").and_then(Value::as_f64),
            entry.get("lon").and_then(Value::as_f64),
        ) else {
            continue;
        };
        let Some(alt_ft) = entry
            .get("alt_baro")
            .and_then(Value::as_f64)
            .or_else(|| entry.get("alt_geom").and_then(Value::as_f64))
        else {
            continue;
        };

        let icao24 = entry.get("hex").and_then(Value::as_str).unwrap_or_default();
        let callsign = callsign_or_icao(entry.get("flight").and_then(Value::as_str), icao24);
        if callsign.is_empty() {
            continue;
        }
        let seen = entry.get("seen_pos").and_then(Value::as_f64).unwrap_or(0.0);
        let timestamp = response_time - chrono::Duration::milliseconds((seen * 1000.0) as i64);

        aircraft.insert(
            callsign.clone(),
            AircraftState {
                callsign,
                icao24: icao24.to_string(),
                timestamp,
                latitude_deg: lat,
                longitude_deg: lon,
                altitude_m: alt_ft * FEET_TO_M,
            },
        );
    }

    Ok(aircraft)
}
