//! Crate-wide error types.

use thiserror::Error;

pub type TaskprofResult<T> = Result<T, TaskprofError>;

#[derive(Debug, Error)]
pub enum TaskprofError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("handoff error: {0}")]
    Handoff(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<zip::result::ZipError> for TaskprofError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Zip(value.to_string())
    }
}

impl From<ureq::Error> for TaskprofError {
    fn from(value: ureq::Error) -> Self {
        Self::Http(value.to_string())
    }
}
