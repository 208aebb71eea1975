//! Core types and identifiers for the provisioner control plane.
//!
//! This crate provides the foundational types shared by the platform
//! collaborators and the lifecycle orchestrator:
//!
//! - **Server lifecycle**: [`ServiceState`] and [`ServerAction`]
//! - **Templates**: [`TemplateDefinition`], [`TemplateRule`] and their revision type
//! - **Identifiers**: platform API versions, capability schema ids, worker ids
//!
//! # Example
//!
//! ```
//! use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId, ServerAction};
//!
//! let version: ApiVersion = "35.0".parse().unwrap();
//! assert!(version >= ApiVersion::new(35, 0));
//!
//! let interface = InterfaceId::new("vmware", "k8s", "1.0.0");
//! assert_eq!(interface.as_str(), "urn:vcloud:interface:vmware:k8s:1.0.0");
//!
//! let entity_type = EntityTypeId::new("vmware", "nativeCluster", "1.0.0");
//! assert_eq!(entity_type.as_str(), "urn:vcloud:type:vmware:nativeCluster:1.0.0");
//!
//! let action: ServerAction = "disable".parse().unwrap();
//! assert_eq!(action, ServerAction::Disable);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod state;
pub mod template;

pub use error::{CoreError, Result};
pub use ids::{ApiVersion, ConsumerTag, EntityTypeId, IdError, InterfaceId, WorkerId};
pub use state::{ServerAction, ServiceState};
pub use template::{Revision, RuleAction, RuleTarget, TemplateDefinition, TemplateRule};
