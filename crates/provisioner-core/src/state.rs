//! Server lifecycle states and the actions that drive them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle state of the provisioner server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Workers are consuming requests.
    Running,
    /// Workers are up but the service refuses new work.
    Disabled,
    /// Waiting for in-flight requests to finish.
    Stopping,
    /// Not running. Initial and terminal state.
    #[default]
    Stopped,
}

impl ServiceState {
    /// Human-readable status string reported to administrators.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Disabled => "Disabled",
            Self::Stopping => "Shutting down",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An administrative action requested against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAction {
    /// Resume accepting requests.
    Enable,
    /// Stop accepting new requests.
    Disable,
    /// Drain and shut down.
    Stop,
}

impl ServerAction {
    /// The wire name of this action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for ServerAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "stop" => Ok(Self::Stop),
            _ => Err(CoreError::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for ServerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_stopped() {
        assert_eq!(ServiceState::default(), ServiceState::Stopped);
    }

    #[test]
    fn status_strings() {
        assert_eq!(ServiceState::Running.to_string(), "Running");
        assert_eq!(ServiceState::Stopping.to_string(), "Shutting down");
    }

    #[test]
    fn parse_actions() {
        assert_eq!("enable".parse::<ServerAction>().unwrap(), ServerAction::Enable);
        assert_eq!("DISABLE".parse::<ServerAction>().unwrap(), ServerAction::Disable);
        assert_eq!(" stop ".parse::<ServerAction>().unwrap(), ServerAction::Stop);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = "restart".parse::<ServerAction>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownAction(ref a) if a == "restart"));
        assert_eq!(err.to_string(), "Invalid server action: 'restart'");
    }
}
