//! Crate-wide error types.

use thiserror::Error;

pub type TpuProfResult<T> = Result<T, TpuProfError>;

#[derive(Debug, Error)]
pub enum TpuProfError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed input {source_name}: {message}")]
    MalformedInput { source_name: String, message: String },
}

impl From<csv::Error> for TpuProfError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value.to_string())
    }
}
