//! Collaborator traits for the virtualization platform.
//!
//! These traits abstract the platform REST API so the orchestrator can be
//! driven by the HTTP implementation in production and by the in-memory
//! mock in tests.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId, TemplateDefinition};

use crate::error::{PlatformError, Result};
use crate::types::{CapabilityEntityType, CapabilityInterface, Policy};

/// Entry point to the platform: authenticates and hands out sessions.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Log in as system administrator.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Unauthorized` if the credentials are rejected.
    async fn login(&self) -> Result<Arc<dyn PlatformSession>>;
}

/// An authenticated platform session.
///
/// Sessions must be released with [`PlatformSession::logout`]; prefer
/// [`with_session`] which does so on every exit path.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// The API version negotiated for this session.
    fn api_version(&self) -> ApiVersion;

    /// List every valid provisioning template in `org`/`catalog`.
    ///
    /// Catalog items without template metadata are not templates and are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    async fn list_templates(&self, org: &str, catalog: &str) -> Result<Vec<TemplateDefinition>>;

    /// Check whether an API extension named `name` is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension registry cannot be queried.
    async fn is_extension_registered(&self, name: &str) -> Result<bool>;

    /// Access the compute policy backend.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotSupported` if the platform has no compute policies.
    fn policy_backend(&self) -> Result<Box<dyn PolicyBackend>>;

    /// Access the capability schema service.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotSupported` if the platform has no entity schemas.
    fn schema_service(&self) -> Result<Box<dyn SchemaService>>;

    /// End the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the logout.
    async fn logout(&self) -> Result<()>;
}

/// Compute policy operations.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    /// Look up a policy by name.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotFound` if no policy has this name.
    async fn get_policy(&self, name: &str) -> Result<Policy>;

    /// Create a policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform rejects the creation.
    async fn create_policy(&self, name: &str) -> Result<Policy>;

    /// Attach the policy to every VM backing the catalog item.
    ///
    /// Attaching a policy that is already attached is a no-op on the platform.
    ///
    /// # Errors
    ///
    /// Returns an error if any VM cannot be updated.
    async fn attach(
        &self,
        policy_href: &str,
        org: &str,
        catalog: &str,
        catalog_item: &str,
    ) -> Result<()>;

    /// Remove every policy from the VMs backing the catalog item.
    ///
    /// # Errors
    ///
    /// Returns an error if any VM cannot be updated.
    async fn detach_all(&self, org: &str, catalog: &str, catalog_item: &str) -> Result<()>;
}

/// Capability schema lookups.
#[async_trait]
pub trait SchemaService: Send + Sync {
    /// Fetch an entity interface.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotFound` if the interface is not registered.
    async fn get_interface(&self, id: &InterfaceId) -> Result<CapabilityInterface>;

    /// Fetch an entity type.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::NotFound` if the entity type is not registered.
    async fn get_entity_type(&self, id: &EntityTypeId) -> Result<CapabilityEntityType>;
}

/// Run `f` inside a platform session, logging out afterwards.
///
/// The session is released whether `f` succeeds or fails. A failed logout
/// is logged and does not mask the result of `f`.
///
/// # Errors
///
/// Returns the login error, or whatever `f` returns.
pub async fn with_session<T, E, F, Fut>(platform: &dyn Platform, f: F) -> std::result::Result<T, E>
where
    E: From<PlatformError>,
    F: FnOnce(Arc<dyn PlatformSession>) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let session = platform.login().await?;
    let result = f(Arc::clone(&session)).await;

    if let Err(e) = session.logout().await {
        tracing::warn!(error = %e, "Failed to log out of platform session");
    }

    result
}
