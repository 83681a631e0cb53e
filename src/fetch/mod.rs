mod aircraft;
mod error;
mod tle;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use aircraft::{AircraftApi, AircraftFetcher};
pub use error::FetchError;
pub use tle::{group_for_name, parse_catalog, TleFetcher};
pub use types::{AircraftSet, AircraftState, ElementCatalog, OrbitalElementSet};

#[cfg(test)]
pub(crate) use tle::tests::{ISS_TLE, STARLINK_TLE};

/// Upstream source of orbital elements.
///
/// `fetch` replaces the cached catalog wholesale on success and leaves it
/// untouched on failure.
#[async_trait]
pub trait TleSource: Send + Sync {
    async fn fetch(&self) -> Result<Arc<ElementCatalog>, FetchError>;

    /// Last good catalog, possibly empty.
    fn cached(&self) -> Arc<ElementCatalog>;

    fn last_success(&self) -> Option<DateTime<Utc>>;

    fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_success().map(|t| now - t)
    }
}

/// Upstream source of aircraft state vectors around the observatory.
#[async_trait]
pub trait AircraftSource: Send + Sync {
    /// Fails with [`FetchError::RateLimited`] without touching the network
    /// while a rate-limit penalty is active.
    async fn fetch(&self) -> Result<Arc<AircraftSet>, FetchError>;

    fn cached(&self) -> Arc<AircraftSet>;

    fn last_success(&self) -> Option<DateTime<Utc>>;

    fn rate_limited_until(&self) -> Option<DateTime<Utc>>;

    fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_success().map(|t| now - t)
    }
}
