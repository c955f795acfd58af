use thiserror::Error;

use crate::acquire::AcquireError;
use crate::publish::PublishError;

#[derive(Error, Debug)]
pub enum PortageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PortageError>;
