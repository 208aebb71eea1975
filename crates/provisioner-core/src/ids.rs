//! Identifier and version types for the provisioner.
//!
//! This module provides strongly-typed identifiers for platform API versions,
//! capability schema descriptors, and message-consuming workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The API version string is not of the form `major[.minor]`.
    #[error("invalid API version: {0}")]
    InvalidVersion(String),

    /// The URN does not have the expected `urn:vcloud:<kind>:<vendor>:<nss>:<version>` shape.
    #[error("invalid URN: {0}")]
    InvalidUrn(String),
}

/// A platform REST API version such as `35.0`.
///
/// Versions order numerically, so `9.0 < 35.0 < 36.0`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr", into = "String")]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

/// Config files write versions either as `"35.0"` or as a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Text(String),
    Number(f64),
}

impl ApiVersion {
    /// Create a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The major component.
    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// The minor component.
    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

impl FromStr for ApiVersion {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let (major, minor) = match trimmed.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (trimmed, "0"),
        };
        let major = major.parse().map_err(|_| invalid())?;
        let minor = minor.parse().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<VersionRepr> for ApiVersion {
    type Error = IdError;

    fn try_from(value: VersionRepr) -> Result<Self, Self::Error> {
        match value {
            VersionRepr::Text(text) => text.parse(),
            VersionRepr::Number(number) => number.to_string().parse(),
        }
    }
}

impl From<ApiVersion> for String {
    fn from(version: ApiVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Debug for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiVersion({self})")
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_urn(s: &str, kind: &str) -> Result<(), IdError> {
    let parts: Vec<&str> = s.split(':').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "urn"
        && parts[1] == "vcloud"
        && parts[2] == kind
        && parts[3..].iter().all(|p| !p.is_empty());
    if well_formed {
        Ok(())
    } else {
        Err(IdError::InvalidUrn(s.to_string()))
    }
}

/// Identifier of a platform-registered entity interface.
///
/// Interface ids are derived deterministically from a vendor, namespace
/// and version triple.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceId(String);

impl InterfaceId {
    /// Build the interface id for a vendor/namespace/version triple.
    #[must_use]
    pub fn new(vendor: &str, nss: &str, version: &str) -> Self {
        Self(format!("urn:vcloud:interface:{vendor}:{nss}:{version}"))
    }

    /// Return the URN string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InterfaceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_urn(s, "interface")?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for InterfaceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InterfaceId> for String {
    fn from(id: InterfaceId) -> Self {
        id.0
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({})", self.0)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a platform-registered entity type.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityTypeId(String);

impl EntityTypeId {
    /// Build the entity type id for a vendor/namespace/version triple.
    #[must_use]
    pub fn new(vendor: &str, nss: &str, version: &str) -> Self {
        Self(format!("urn:vcloud:type:{vendor}:{nss}:{version}"))
    }

    /// Return the URN string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntityTypeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_urn(s, "type")?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for EntityTypeId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityTypeId> for String {
    fn from(id: EntityTypeId) -> Self {
        id.0
    }
}

impl fmt::Debug for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityTypeId({})", self.0)
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordinal identity of a worker in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Create a worker id from its ordinal index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The ordinal index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageConsumer-{}", self.0)
    }
}

/// A broker consumer tag, unique per consumer instance.
///
/// Tags combine the worker ordinal with a random UUID so that restarted
/// processes never reuse a tag the broker may still hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    /// Generate a fresh tag for the given worker.
    #[must_use]
    pub fn generate(worker: WorkerId) -> Self {
        Self(format!(
            "provisioner-{}-{}",
            worker.index(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Return the tag string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_parse() {
        let version: ApiVersion = "35.0".parse().unwrap();
        assert_eq!(version, ApiVersion::new(35, 0));

        let bare: ApiVersion = "36".parse().unwrap();
        assert_eq!(bare, ApiVersion::new(36, 0));

        assert!("thirty-five".parse::<ApiVersion>().is_err());
        assert!("35.x".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn api_version_ordering() {
        let v9: ApiVersion = "9.0".parse().unwrap();
        let v34: ApiVersion = "34.0".parse().unwrap();
        let v35: ApiVersion = "35.0".parse().unwrap();
        assert!(v9 < v34);
        assert!(v34 < v35);
    }

    #[test]
    fn api_version_serde_accepts_numbers_and_strings() {
        let from_string: ApiVersion = serde_json::from_str("\"35.0\"").unwrap();
        let from_number: ApiVersion = serde_json::from_str("35.0").unwrap();
        assert_eq!(from_string, from_number);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"35.0\"");
    }

    #[test]
    fn interface_id_format() {
        let id = InterfaceId::new("vmware", "k8s", "1.0.0");
        assert_eq!(id.to_string(), "urn:vcloud:interface:vmware:k8s:1.0.0");

        let parsed: InterfaceId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn entity_type_id_rejects_wrong_kind() {
        let interface = InterfaceId::new("vmware", "k8s", "1.0.0");
        assert!(interface.as_str().parse::<EntityTypeId>().is_err());
        assert!("urn:vcloud:type:vmware::1.0.0"
            .parse::<EntityTypeId>()
            .is_err());
    }

    #[test]
    fn worker_id_display() {
        assert_eq!(WorkerId::new(3).to_string(), "MessageConsumer-3");
    }

    #[test]
    fn consumer_tags_are_unique() {
        let worker = WorkerId::new(0);
        let a = ConsumerTag::generate(worker);
        let b = ConsumerTag::generate(worker);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("provisioner-0-"));
    }
}
