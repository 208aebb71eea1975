//! Provisioning template definitions and override rules.
//!
//! Template definitions are discovered from the platform catalog on every
//! startup. Rules patch them in place before compute-policy compliance is
//! enforced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A template revision.
///
/// Catalog metadata and config files write revisions either as integers or
/// as strings; both forms compare by their string representation, so `1`
/// and `"1"` are the same revision.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RevisionRepr", into = "String")]
pub struct Revision(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RevisionRepr {
    Number(u64),
    Text(String),
}

impl Revision {
    /// Create a revision from any displayable value.
    #[must_use]
    pub fn new(value: impl fmt::Display) -> Self {
        Self(value.to_string().trim().to_string())
    }

    /// Return the revision as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<RevisionRepr> for Revision {
    fn from(value: RevisionRepr) -> Self {
        match value {
            RevisionRepr::Number(n) => Self::new(n),
            RevisionRepr::Text(s) => Self::new(s),
        }
    }
}

impl From<Revision> for String {
    fn from(revision: Revision) -> Self {
        revision.0
    }
}

impl From<&str> for Revision {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A provisioning template discovered in the platform catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Template name.
    pub name: String,
    /// Template revision.
    pub revision: Revision,
    /// Name of the catalog item backing this template.
    pub catalog_item_name: String,
    /// Compute policy to enforce on the template's VMs. Empty means none.
    #[serde(default)]
    pub compute_policy: String,
    /// CPU count hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Memory hint in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    /// Cluster kind this template provisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TemplateDefinition {
    /// Create a template with no compute policy or sizing hints.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        revision: impl Into<Revision>,
        catalog_item_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            revision: revision.into(),
            catalog_item_name: catalog_item_name.into(),
            compute_policy: String::new(),
            cpu: None,
            memory_mb: None,
            kind: None,
        }
    }

    /// Set the compute policy.
    #[must_use]
    pub fn with_compute_policy(mut self, policy: impl Into<String>) -> Self {
        self.compute_policy = policy.into();
        self
    }

    /// Returns true if the template names a compute policy.
    #[must_use]
    pub fn has_compute_policy(&self) -> bool {
        !self.compute_policy.trim().is_empty()
    }

    /// Returns true if this template is `name` at `revision`.
    #[must_use]
    pub fn is(&self, name: &str, revision: &Revision) -> bool {
        self.name == name && self.revision == *revision
    }
}

/// Selects the template a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    /// Template name to match.
    pub name: String,
    /// Template revision to match.
    pub revision: Revision,
}

impl RuleTarget {
    /// Returns true if the template is selected by this target.
    #[must_use]
    pub fn matches(&self, template: &TemplateDefinition) -> bool {
        template.is(&self.name, &self.revision)
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (revision {})", self.name, self.revision)
    }
}

/// Fields a rule overwrites on its target template.
///
/// Unset fields leave the template untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    /// New compute policy name. An empty string removes the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_policy: Option<String>,
    /// New CPU count hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// New memory hint in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    /// New cluster kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl RuleAction {
    /// Returns true if the action would not change any field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compute_policy.is_none()
            && self.cpu.is_none()
            && self.memory_mb.is_none()
            && self.kind.is_none()
    }

    /// Patch the template in place.
    pub fn apply_to(&self, template: &mut TemplateDefinition) {
        if let Some(policy) = &self.compute_policy {
            template.compute_policy.clone_from(policy);
        }
        if let Some(cpu) = self.cpu {
            template.cpu = Some(cpu);
        }
        if let Some(memory) = self.memory_mb {
            template.memory_mb = Some(memory);
        }
        if let Some(kind) = &self.kind {
            template.kind = Some(kind.clone());
        }
    }
}

/// A named override applied to catalog templates at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRule {
    /// Rule name, used in logs.
    pub name: String,
    /// Template selector.
    pub target: RuleTarget,
    /// Field patch.
    #[serde(default)]
    pub action: RuleAction,
}

impl fmt::Display for TemplateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' targeting {}", self.name, self.target)
    }
}
