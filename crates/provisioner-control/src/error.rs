//! Error types for the control plane.
//!
//! This module defines all errors that can occur while starting the service,
//! handling lifecycle actions, and supervising workers.

use provisioner_core::{CoreError, Revision, ServiceState};
use provisioner_platform::PlatformError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested action is not valid in the current state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The service is in a state that admits no actions at all.
    #[error("invalid server state: {0}")]
    InvalidServerState(ServiceState),

    /// The template catalog holds no templates.
    #[error("no templates found in catalog '{catalog}' of org '{org}'")]
    NoTemplates {
        /// Organization queried.
        org: String,
        /// Catalog queried.
        catalog: String,
    },

    /// The configured default template is not in the catalog.
    #[error("default template '{name}' at revision {revision} not found in catalog")]
    DefaultTemplateMissing {
        /// Configured template name.
        name: String,
        /// Configured template revision.
        revision: Revision,
    },

    /// The service's API extension is not registered on the platform.
    #[error("API extension '{0}' is not registered, run the installer first")]
    NotInstalled(String),

    /// `run` was called while the service was already running.
    #[error("service is already running")]
    AlreadyRunning,

    /// The run configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Platform collaborator error.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Core type error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::Core(_) => 400,
            Self::Platform(e) => e.http_status_code(),
            Self::InvalidServerState(_)
            | Self::NoTemplates { .. }
            | Self::DefaultTemplateMissing { .. }
            | Self::NotInstalled(_)
            | Self::AlreadyRunning
            | Self::Config(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error must terminate the process.
    ///
    /// Invalid requests are answered and forgotten; everything else only
    /// arises during startup or from a broken state machine.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::Core(_))
    }
}
