use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot {0} not found")]
    NotFound(i64),
    #[error("corrupt snapshot record: {0}")]
    Serialization(String),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}
