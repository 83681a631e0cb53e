use thiserror::Error;

use crate::snapshot::StorageError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("force snapshot is cooling down, retry in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("scheduler is not running")]
    Stopped,
}
