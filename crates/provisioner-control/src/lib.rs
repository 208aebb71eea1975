//! Lifecycle orchestrator for the provisioner control plane.
//!
//! This crate starts the provisioner: it loads the template catalog,
//! patches templates with rules, reconciles compute policies, loads the
//! capability schema and then runs a pool of message-consuming workers
//! until an administrator stops it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Admin surface (HTTP)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Service                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Startup    │ │   Drain     │ │    Lifecycle        │    │
//! │  │  pipeline   │ │   loop      │ │    State Machine    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌──────────────┐              ┌──────────────┐
//!        │   Platform   │              │ Worker pool  │
//!        │   (REST)     │              │ (consumers)  │
//!        └──────────────┘              └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use provisioner_control::{shutdown, IdleConsumerFactory, RunConfiguration, Service};
//! use provisioner_platform::HttpPlatform;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfiguration::from_file("/etc/provisioner/config.yaml")?;
//! let platform = Arc::new(HttpPlatform::new(config.platform.clone())?);
//! let service = Service::new(config, platform, Arc::new(IdleConsumerFactory));
//!
//! let (_trigger, shutdown) = shutdown::channel();
//! service.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```
//!
//! See the [`lifecycle`] module for the server state machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admin;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod rules;
pub mod schema;
pub mod service;
pub mod shutdown;
pub mod workers;

pub use admin::router;
pub use config::{CatalogConfig, ComputePolicyConfig, RunConfiguration, ServiceConfig};
pub use consumer::{
    BrokerConfig, ConsumerFactory, IdleConsumer, IdleConsumerFactory, MessageConsumer,
};
pub use error::{ControlError, Result};
pub use lifecycle::StateView;
pub use schema::CapabilitySchema;
pub use service::{ServerControl, ServerInfo, Service};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use workers::WorkerPool;

// Re-export commonly used types from dependencies for convenience
pub use provisioner_core::{ServerAction, ServiceState, TemplateDefinition};
