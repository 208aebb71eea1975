//! Error types for the platform collaborators.

use thiserror::Error;

/// Errors that can occur while talking to the virtualization platform.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The platform does not support the requested feature at all.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// The platform rejected the credentials or the session expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request failed in transport or returned an unexpected status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The platform answered with a body we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PlatformError {
    /// Returns true if the platform reported the feature as unsupported.
    #[must_use]
    pub const fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }

    /// Returns true if the requested entity does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::NotSupported(_) => 501,
            Self::Unauthorized(_) => 401,
            Self::Config(_) => 400,
            Self::Http(_) | Self::InvalidResponse(_) => 502,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// A specialized Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;
