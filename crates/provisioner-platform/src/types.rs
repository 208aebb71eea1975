//! Types for the platform collaborators.

use std::fmt;
use std::time::Duration;

use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId};
use serde::{Deserialize, Serialize};

/// Connection parameters for the virtualization platform.
#[derive(Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform, e.g. `https://vcd.example.com`.
    pub host: String,
    /// System administrator user name.
    pub username: String,
    /// System administrator password.
    pub password: String,
    /// REST API version to negotiate.
    pub api_version: ApiVersion,
    /// Verify the platform's TLS certificate.
    #[serde(default = "PlatformConfig::default_verify")]
    pub verify: bool,
    /// Log request/response summaries at trace level.
    #[serde(default)]
    pub log_wire: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "PlatformConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl PlatformConfig {
    const fn default_verify() -> bool {
        true
    }

    const fn default_timeout() -> u64 {
        30
    }

    /// Create a config with default TLS and timeout settings.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        api_version: ApiVersion,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            api_version,
            verify: Self::default_verify(),
            log_wire: false,
            timeout_seconds: Self::default_timeout(),
        }
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// The host with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("api_version", &self.api_version)
            .field("verify", &self.verify)
            .field("log_wire", &self.log_wire)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// A compute (sizing) policy managed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Platform identifier.
    pub id: String,
    /// Policy name.
    pub name: String,
    /// Reference used when attaching the policy to VMs.
    pub href: String,
}

/// Entity interface descriptor registered on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInterface {
    /// Interface id.
    pub id: InterfaceId,
    /// Display name.
    pub name: String,
    /// Interface version.
    pub version: String,
    /// Vendor component of the id.
    pub vendor: String,
    /// Namespace component of the id.
    pub nss: String,
    /// Whether the interface is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Entity type descriptor registered on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityEntityType {
    /// Entity type id.
    pub id: EntityTypeId,
    /// Display name.
    pub name: String,
    /// Entity type version.
    pub version: String,
    /// Vendor component of the id.
    pub vendor: String,
    /// Namespace component of the id.
    pub nss: String,
    /// Interfaces this type implements.
    #[serde(default)]
    pub interfaces: Vec<InterfaceId>,
    /// JSON schema of the entity.
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PlatformConfig {
        PlatformConfig::new(
            "https://vcd.example.com/",
            "administrator",
            "hunter2",
            ApiVersion::new(35, 0),
        )
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn base_url_trims_slash() {
        assert_eq!(config().base_url(), "https://vcd.example.com");
    }

    #[test]
    fn config_defaults() {
        let config: PlatformConfig = serde_json::from_value(serde_json::json!({
            "host": "https://vcd.example.com",
            "username": "administrator",
            "password": "secret",
            "api_version": 34.0
        }))
        .unwrap();
        assert!(config.verify);
        assert!(!config.log_wire);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.api_version, ApiVersion::new(34, 0));
    }

    #[test]
    fn entity_type_deserializes_from_platform_json() {
        let entity_type: CapabilityEntityType = serde_json::from_value(serde_json::json!({
            "id": "urn:vcloud:type:vmware:nativeCluster:1.0.0",
            "name": "nativeCluster",
            "version": "1.0.0",
            "vendor": "vmware",
            "nss": "nativeCluster",
            "interfaces": ["urn:vcloud:interface:vmware:k8s:1.0.0"]
        }))
        .unwrap();
        assert_eq!(entity_type.interfaces.len(), 1);
        assert!(entity_type.schema.is_null());
    }
}
