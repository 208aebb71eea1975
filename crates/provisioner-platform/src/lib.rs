//! Virtualization platform collaborators for the provisioner control plane.
//!
//! This crate wraps the platform REST API behind a small set of traits:
//!
//! - [`Platform`] logs in and hands out [`PlatformSession`]s
//! - [`PolicyBackend`] manages compute policies and their attachment to templates
//! - [`SchemaService`] looks up capability interfaces and entity types
//!
//! Sessions are short lived. Use [`with_session`] so every session is
//! logged out once the work inside it is done, whatever the outcome.
//!
//! # Example
//!
//! ```ignore
//! use provisioner_core::ApiVersion;
//! use provisioner_platform::{with_session, HttpPlatform, PlatformConfig, PlatformError};
//!
//! # async fn example() -> Result<(), PlatformError> {
//! let config = PlatformConfig::new(
//!     "https://vcd.example.com",
//!     "administrator",
//!     "secret",
//!     ApiVersion::new(35, 0),
//! );
//! let platform = HttpPlatform::new(config)?;
//!
//! let templates = with_session(&platform, |session| async move {
//!     session.list_templates("system-org", "templates").await
//! })
//! .await?;
//! println!("{} templates", templates.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to get [`MockPlatform`], an in-memory
//! platform that records logins, logouts and policy calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod http;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{with_session, Platform, PlatformSession, PolicyBackend, SchemaService};
pub use error::{PlatformError, Result};
pub use http::HttpPlatform;
pub use types::{CapabilityEntityType, CapabilityInterface, PlatformConfig, Policy};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockPlatform, PolicyCall};
