//! Errors shared by the DSS crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file missing, unreadable or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Name does not refer to a known resource (bucket, ...)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Value outside the accepted vocabulary (doc type, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
