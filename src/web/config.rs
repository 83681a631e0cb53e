use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::AircraftApi;
use crate::observer::ObserverLocation;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub observatory: ObservatoryConfig,
    pub horizon: HorizonConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub tle: TleConfig,
    #[serde(default)]
    pub aircraft: AircraftConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservatoryConfig {
    pub name: Option<String>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HorizonConfig {
    /// HeyWhatsThat horizon CSV.
    pub file: PathBuf,
    /// Panorama id, only needed by `fetch-horizon`.
    pub panorama_id: Option<String>,
    #[serde(default = "default_horizon_resolution")]
    pub resolution: f64,
    #[serde(default = "default_horizon_url")]
    pub url: String,
}

fn default_horizon_resolution() -> f64 {
    0.1
}

fn default_horizon_url() -> String {
    "https://www.heywhatsthat.com/api/horizon.csv".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_tle_interval", deserialize_with = "deserialize_duration")]
    pub tle_fetch_interval: Duration,
    #[serde(default = "default_plane_interval", deserialize_with = "deserialize_duration")]
    pub plane_fetch_interval: Duration,
    #[serde(default = "default_snapshot_interval", deserialize_with = "deserialize_duration")]
    pub db_snapshot_interval: Duration,
    #[serde(default = "default_tick", deserialize_with = "deserialize_duration")]
    pub tick: Duration,
    #[serde(default = "default_force_cooldown", deserialize_with = "deserialize_duration")]
    pub force_snapshot_cooldown: Duration,
    #[serde(default = "default_force_wait", deserialize_with = "deserialize_duration")]
    pub force_wait_timeout: Duration,
    #[serde(default = "default_aircraft_stale", deserialize_with = "deserialize_duration")]
    pub aircraft_stale_after: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tle_fetch_interval: default_tle_interval(),
            plane_fetch_interval: default_plane_interval(),
            db_snapshot_interval: default_snapshot_interval(),
            tick: default_tick(),
            force_snapshot_cooldown: default_force_cooldown(),
            force_wait_timeout: default_force_wait(),
            aircraft_stale_after: default_aircraft_stale(),
        }
    }
}

fn default_tle_interval() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_plane_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_snapshot_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_force_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_force_wait() -> Duration {
    Duration::from_secs(15)
}

fn default_aircraft_stale() -> Duration {
    Duration::from_secs(2 * 60)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TleConfig {
    /// The first source must succeed; the others are appended when they do.
    #[serde(default = "default_tle_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_tle_cache")]
    pub cache_file: PathBuf,
    #[serde(default = "default_tle_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for TleConfig {
    fn default() -> Self {
        Self {
            urls: default_tle_urls(),
            cache_file: default_tle_cache(),
            timeout: default_tle_timeout(),
        }
    }
}

fn default_tle_urls() -> Vec<String> {
    vec!["https://celestrak.org/NORAD/elements/gp.php?GROUP=active&FORMAT=tle".to_string()]
}

fn default_tle_cache() -> PathBuf {
    PathBuf::from("data/tle.txt")
}

fn default_tle_timeout() -> Duration {
    Duration::from_secs(45)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AircraftConfig {
    #[serde(default = "default_aircraft_api")]
    pub api: AircraftApi,
    /// Defaults to the public endpoint of the selected API.
    pub url: Option<String>,
    /// Half-width of the query box around the observatory, in degrees.
    #[serde(default = "default_search_box")]
    pub search_box_deg: f64,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_aircraft_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for AircraftConfig {
    fn default() -> Self {
        Self {
            api: default_aircraft_api(),
            url: None,
            search_box_deg: default_search_box(),
            username: None,
            password: None,
            timeout: default_aircraft_timeout(),
        }
    }
}

impl AircraftConfig {
    pub fn endpoint(&self) -> String {
        self.url.clone().unwrap_or_else(|| match self.api {
            AircraftApi::OpenSky => "https://opensky-network.org/api/states/all".to_string(),
            AircraftApi::AirplanesLive => "https://api.airplanes.live/v2/point".to_string(),
        })
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

fn default_aircraft_api() -> AircraftApi {
    AircraftApi::OpenSky
}

fn default_search_box() -> f64 {
    4.0
}

fn default_aircraft_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_db_path() -> String {
    "data/snapshots.db".to_string()
}

fn default_retention_days() -> u32 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ForceSnapshot,
    ViewStatus,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let obs = &self.observatory;
        if !(-90.0..=90.0).contains(&obs.latitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "latitude {} out of range",
                obs.latitude_deg
            )));
        }
        if !(-180.0..=180.0).contains(&obs.longitude_deg) {
            return Err(ConfigError::Invalid(format!(
                "longitude {} out of range",
                obs.longitude_deg
            )));
        }
        if self.tle.urls.is_empty() {
            return Err(ConfigError::Invalid("tle.urls must not be empty".into()));
        }
        if self.timing.tick.is_zero() {
            return Err(ConfigError::Invalid("timing.tick must be positive".into()));
        }
        if self.timing.db_snapshot_interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "timing.db_snapshot_interval must be at least 1s".into(),
            ));
        }
        if self.aircraft.search_box_deg <= 0.0 {
            return Err(ConfigError::Invalid(
                "aircraft.search_box_deg must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn observer(&self) -> ObserverLocation {
        ObserverLocation::new(
            self.observatory.latitude_deg,
            self.observatory.longitude_deg,
            self.observatory.altitude_m,
        )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let t = &self.timing;
        SchedulerConfig {
            tle_fetch_interval: t.tle_fetch_interval,
            plane_fetch_interval: t.plane_fetch_interval,
            snapshot_interval: t.db_snapshot_interval,
            tick: t.tick,
            force_snapshot_cooldown: t.force_snapshot_cooldown,
            force_wait_timeout: t.force_wait_timeout,
            aircraft_stale_after: t.aircraft_stale_after,
            retention_days: self.database.retention_days,
        }
    }

    pub fn find_api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }
}
