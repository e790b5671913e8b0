use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceryError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Observation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
