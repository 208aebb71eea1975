//! Run configuration.
//!
//! The configuration is read once from a YAML file at startup and never
//! changes afterwards.

use std::path::Path;
use std::time::Duration;

use provisioner_core::{Revision, TemplateRule};
use provisioner_platform::PlatformConfig;
use serde::Deserialize;

use crate::consumer::BrokerConfig;
use crate::error::{ControlError, Result};

/// Complete configuration of one service run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfiguration {
    /// Virtualization platform connection.
    pub platform: PlatformConfig,

    /// Message broker connection.
    pub broker: BrokerConfig,

    /// Worker and lifecycle settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Template catalog location and default template.
    pub catalog: CatalogConfig,

    /// Overrides applied to catalog templates at startup.
    #[serde(default)]
    pub template_rules: Vec<TemplateRule>,

    /// Compute policy enforcement.
    #[serde(default)]
    pub compute_policies: ComputePolicyConfig,
}

impl RunConfiguration {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the file cannot be read, is not
    /// valid YAML, or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ControlError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` if the document is invalid.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| ControlError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("platform.host", self.platform.host.as_str()),
            ("broker.host", self.broker.host.as_str()),
            ("catalog.org", self.catalog.org.as_str()),
            ("catalog.catalog", self.catalog.catalog.as_str()),
            (
                "catalog.default_template_name",
                self.catalog.default_template_name.as_str(),
            ),
            (
                "catalog.default_template_revision",
                self.catalog.default_template_revision.as_str(),
            ),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ControlError::Config(format!("{field} must not be empty")));
        }

        if self.service.listeners == 0 {
            return Err(ControlError::Config(
                "service.listeners must be at least 1".to_string(),
            ));
        }
        if self.service.drain_poll_interval_ms == 0 {
            return Err(ControlError::Config(
                "service.drain_poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.service.check_installation && self.service.extension_name.trim().is_empty() {
            return Err(ControlError::Config(
                "service.extension_name must not be empty when check_installation is set"
                    .to_string(),
            ));
        }

        for rule in &self.template_rules {
            if rule.action.is_empty() {
                tracing::warn!(rule = %rule, "Template rule changes nothing");
            }
        }

        Ok(())
    }
}

/// Worker pool and lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Number of message consumers to start.
    #[serde(default = "ServiceConfig::default_listeners")]
    pub listeners: u32,

    /// Delay between consecutive worker spawns in milliseconds.
    #[serde(default = "ServiceConfig::default_spawn_delay")]
    pub spawn_delay_ms: u64,

    /// Interval between drain polls in milliseconds.
    #[serde(default = "ServiceConfig::default_drain_poll_interval")]
    pub drain_poll_interval_ms: u64,

    /// Give up waiting for in-flight requests after this many seconds.
    #[serde(default)]
    pub drain_timeout_seconds: Option<u64>,

    /// Refuse to start unless the API extension is registered.
    #[serde(default)]
    pub check_installation: bool,

    /// Name the API extension is registered under.
    #[serde(default = "ServiceConfig::default_extension_name")]
    pub extension_name: String,
}

impl ServiceConfig {
    const fn default_listeners() -> u32 {
        10
    }

    const fn default_spawn_delay() -> u64 {
        250
    }

    const fn default_drain_poll_interval() -> u64 {
        1000
    }

    fn default_extension_name() -> String {
        "provisioner".to_string()
    }

    /// Get the spawn delay as a `Duration`.
    #[must_use]
    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }

    /// Get the drain poll interval as a `Duration`.
    #[must_use]
    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    /// Get the drain timeout, if any, as a `Duration`.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listeners: Self::default_listeners(),
            spawn_delay_ms: Self::default_spawn_delay(),
            drain_poll_interval_ms: Self::default_drain_poll_interval(),
            drain_timeout_seconds: None,
            check_installation: false,
            extension_name: Self::default_extension_name(),
        }
    }
}

/// Where templates live and which one is the default.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Organization owning the catalog.
    pub org: String,
    /// Catalog holding the templates.
    pub catalog: String,
    /// Name of the default template.
    pub default_template_name: String,
    /// Revision of the default template.
    pub default_template_revision: Revision,
}

/// Compute policy enforcement settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputePolicyConfig {
    /// Reconcile template compute policies at startup.
    #[serde(default = "ComputePolicyConfig::default_enabled")]
    pub enabled: bool,
}

impl ComputePolicyConfig {
    const fn default_enabled() -> bool {
        true
    }
}

impl Default for ComputePolicyConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}
