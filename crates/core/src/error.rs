use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    /// Harness infrastructure failure (spawn, temp script, wait).
    /// Failures inside the snippet never use this variant.
    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Repair exhausted: {0}")]
    RepairExhausted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
