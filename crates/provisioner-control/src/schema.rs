//! Capability schema loading.
//!
//! Platforms from API version 35.0 register an entity interface and an
//! entity type describing the clusters this service manages. Which
//! versions of them to look up depends on the platform's API version.

use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId};
use provisioner_platform::{CapabilityEntityType, CapabilityInterface, PlatformSession};
use serde::Serialize;

use crate::error::{ControlError, Result};

/// First API version with capability schemas.
pub const SCHEMA_MIN_VERSION: ApiVersion = ApiVersion::new(35, 0);

/// The interface and entity type registered for this service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySchema {
    /// Entity interface descriptor.
    pub interface: CapabilityInterface,
    /// Entity type descriptor.
    pub entity_type: CapabilityEntityType,
}

struct SchemaKeys {
    api_version: ApiVersion,
    vendor: &'static str,
    interface_nss: &'static str,
    interface_version: &'static str,
    entity_type_nss: &'static str,
    entity_type_version: &'static str,
}

const SCHEMA_KEYS: &[SchemaKeys] = &[
    SchemaKeys {
        api_version: ApiVersion::new(35, 0),
        vendor: "vmware",
        interface_nss: "k8s",
        interface_version: "1.0.0",
        entity_type_nss: "nativeCluster",
        entity_type_version: "1.0.0",
    },
    SchemaKeys {
        api_version: ApiVersion::new(36, 0),
        vendor: "vmware",
        interface_nss: "k8s",
        interface_version: "1.0.0",
        entity_type_nss: "nativeCluster",
        entity_type_version: "2.0.0",
    },
];

/// Identifiers of the interface and entity type for an API version.
///
/// Returns `None` if the version has no entry.
#[must_use]
pub fn schema_ids(api_version: ApiVersion) -> Option<(InterfaceId, EntityTypeId)> {
    SCHEMA_KEYS
        .iter()
        .find(|keys| keys.api_version == api_version)
        .map(|keys| {
            (
                InterfaceId::new(keys.vendor, keys.interface_nss, keys.interface_version),
                EntityTypeId::new(keys.vendor, keys.entity_type_nss, keys.entity_type_version),
            )
        })
}

/// Fetch the capability schema registered on the platform.
///
/// Returns `Ok(None)` on platforms that predate capability schemas or
/// report them as unsupported.
///
/// # Errors
///
/// Returns `ControlError::Config` if the API version is recent enough but
/// has no known schema identifiers, or the platform error if a lookup fails.
pub async fn load_schema(session: &dyn PlatformSession) -> Result<Option<CapabilitySchema>> {
    let api_version = session.api_version();
    if api_version < SCHEMA_MIN_VERSION {
        tracing::info!(
            api_version = %api_version,
            "Capability schemas not available on this API version"
        );
        return Ok(None);
    }

    let (interface_id, entity_type_id) = schema_ids(api_version).ok_or_else(|| {
        ControlError::Config(format!(
            "no capability schema known for API version {api_version}"
        ))
    })?;

    match fetch(session, &interface_id, &entity_type_id).await {
        Ok(schema) => {
            tracing::info!(
                interface = %schema.interface.id,
                entity_type = %schema.entity_type.id,
                "Loaded capability schema"
            );
            Ok(Some(schema))
        }
        Err(e) if e.is_not_supported() => {
            tracing::info!(reason = %e, "Capability schemas not supported, skipping");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(
                interface = %interface_id,
                entity_type = %entity_type_id,
                error = %e,
                "Failed to load capability schema"
            );
            Err(e.into())
        }
    }
}

async fn fetch(
    session: &dyn PlatformSession,
    interface_id: &InterfaceId,
    entity_type_id: &EntityTypeId,
) -> provisioner_platform::Result<CapabilitySchema> {
    let service = session.schema_service()?;
    let interface = service.get_interface(interface_id).await?;
    let entity_type = service.get_entity_type(entity_type_id).await?;
    Ok(CapabilitySchema {
        interface,
        entity_type,
    })
}

#[cfg(test)]
mod tests {
    use provisioner_platform::{with_session, MockPlatform, PlatformError};

    use super::*;

    async fn load(platform: &MockPlatform) -> Result<Option<CapabilitySchema>> {
        with_session(platform, |session| async move {
            load_schema(session.as_ref()).await
        })
        .await
    }

    fn descriptors(api_version: ApiVersion) -> (CapabilityInterface, CapabilityEntityType) {
        let (interface_id, entity_type_id) = schema_ids(api_version).unwrap();
        let interface = CapabilityInterface {
            id: interface_id.clone(),
            name: "Kubernetes".to_string(),
            version: "1.0.0".to_string(),
            vendor: "vmware".to_string(),
            nss: "k8s".to_string(),
            readonly: false,
        };
        let entity_type = CapabilityEntityType {
            id: entity_type_id,
            name: "nativeCluster".to_string(),
            version: "1.0.0".to_string(),
            vendor: "vmware".to_string(),
            nss: "nativeCluster".to_string(),
            interfaces: vec![interface_id],
            schema: serde_json::Value::Null,
        };
        (interface, entity_type)
    }

    #[test]
    fn ids_follow_version_table() {
        let (interface, entity_type) = schema_ids(ApiVersion::new(35, 0)).unwrap();
        assert_eq!(interface.as_str(), "urn:vcloud:interface:vmware:k8s:1.0.0");
        assert_eq!(entity_type.as_str(), "urn:vcloud:type:vmware:nativeCluster:1.0.0");

        let (_, entity_type) = schema_ids(ApiVersion::new(36, 0)).unwrap();
        assert_eq!(entity_type.as_str(), "urn:vcloud:type:vmware:nativeCluster:2.0.0");

        assert!(schema_ids(ApiVersion::new(34, 0)).is_none());
    }

    #[tokio::test]
    async fn loads_registered_schema() {
        let version = ApiVersion::new(36, 0);
        let (interface, entity_type) = descriptors(version);
        let platform = MockPlatform::new(version).with_schema(interface, entity_type.clone());

        let schema = load(&platform).await.unwrap().unwrap();
        assert_eq!(schema.entity_type, entity_type);
        assert_eq!(platform.logout_count(), 1);
    }

    #[tokio::test]
    async fn old_platform_has_no_schema() {
        let platform = MockPlatform::new(ApiVersion::new(34, 0));

        assert!(load(&platform).await.unwrap().is_none());
        assert_eq!(platform.login_count(), 1);
        assert_eq!(platform.logout_count(), 1);
    }

    #[tokio::test]
    async fn unsupported_schema_service_is_tolerated() {
        let platform = MockPlatform::new(ApiVersion::new(35, 0)).without_schema_support();
        assert!(load(&platform).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_recent_version_is_config_error() {
        let platform = MockPlatform::new(ApiVersion::new(37, 0));

        let err = load(&platform).await.unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
        assert_eq!(platform.logout_count(), 1);
    }

    #[tokio::test]
    async fn lookup_failure_is_fatal_and_logs_out() {
        let version = ApiVersion::new(35, 0);
        let (interface, entity_type) = descriptors(version);
        let platform = MockPlatform::new(version)
            .with_schema(interface, entity_type)
            .fail_schema();

        let err = load(&platform).await.unwrap_err();
        assert!(matches!(err, ControlError::Platform(PlatformError::Http(_))));
        assert!(err.is_fatal());
        assert_eq!(platform.logout_count(), 1);
    }

    #[tokio::test]
    async fn missing_registration_is_fatal() {
        let platform = MockPlatform::new(ApiVersion::new(35, 0));

        let err = load(&platform).await.unwrap_err();
        assert!(matches!(err, ControlError::Platform(PlatformError::NotFound(_))));
    }
}
