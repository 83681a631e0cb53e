use thiserror::Error;

#[derive(Debug, Error)]
pub enum HorizonError {
    #[error("horizon file read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("horizon CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("horizon profile has no usable samples")]
    Empty,
    #[error("invalid horizon sample at azimuth {azimuth_deg}: {reason}")]
    InvalidSample { azimuth_deg: f64, reason: String },
    #[error("horizon download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("horizon download returned HTTP {0}")]
    DownloadStatus(u16),
}
