//! Common error types for the provisioner.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the provisioner.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An invalid identifier or version was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A server action string did not name a known action.
    #[error("Invalid server action: '{0}'")]
    UnknownAction(String),
}
