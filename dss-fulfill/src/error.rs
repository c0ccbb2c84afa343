//! Error types for dss-fulfill
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for dss-fulfill
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport errors talking to the fulfillment API
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Fulfillment API answered with a non-success status
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Credential could not be obtained or refreshed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Live feed socket errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Shared-crate errors
    #[error(transparent)]
    Common(#[from] dss_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

/// Convenience Result type using dss-fulfill Error
pub type Result<T> = std::result::Result<T, Error>;
