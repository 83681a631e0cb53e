use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("time conversion error: {0}")]
    Time(String),
    #[error("propagation error: {0}")]
    Propagation(String),
}

impl From<sgp4::Error> for PropagationError {
    fn from(err: sgp4::Error) -> Self {
        PropagationError::Propagation(err.to_string())
    }
}
