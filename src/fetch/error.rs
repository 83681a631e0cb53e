use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned HTTP {status}")]
    Http {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("rate limited until {until}")]
    RateLimited { until: DateTime<Utc> },
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("cache file error: {0}")]
    Cache(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Transport(err)
        }
    }
}
