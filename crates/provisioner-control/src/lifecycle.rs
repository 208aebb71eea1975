//! Server lifecycle state machine.
//!
//! This module defines which administrative actions are legal in which
//! server state and what each one does.
//!
//! # State Machine
//!
//! ```text
//!        startup complete
//!   ┌─────────┐        ┌──────────┐  disable   ┌──────────┐
//!   │ Stopped │───────▶│ Running  │───────────▶│ Disabled │
//!   └─────────┘        │          │◀───────────│          │
//!        ▲             └──────────┘   enable   └────┬─────┘
//!        │                                          │ stop
//!        │ drain complete  ┌──────────┐             │
//!        └─────────────────│ Stopping │◀────────────┘
//!                          └──────────┘
//! ```
//!
//! The `Stopped -> Running` and `Stopping -> Stopped` edges are taken by the
//! service itself, never by an action.

use provisioner_core::{ServerAction, ServiceState};
use tokio::sync::watch;

use crate::error::{ControlError, Result};

/// Outcome of an accepted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the action.
    pub state: ServiceState,
    /// Human-readable message for the caller.
    pub message: String,
}

impl Transition {
    fn new(state: ServiceState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// Apply `action` to `current`.
///
/// `in_flight` is the number of requests being processed; it only shapes
/// the message of a stop.
///
/// # Errors
///
/// Returns `ControlError::InvalidRequest` if the action is illegal in the
/// current state, and `ControlError::InvalidServerState` if the server is
/// stopped and accepts no actions.
pub fn transition(
    current: ServiceState,
    action: ServerAction,
    in_flight: usize,
) -> Result<Transition> {
    use ServerAction::{Disable, Enable, Stop};
    use ServiceState::{Disabled, Running, Stopped, Stopping};

    match (current, action) {
        (Running, Enable) => Ok(Transition::new(
            Running,
            "Server is already enabled and running.",
        )),
        (Running, Disable) => Ok(Transition::new(Disabled, "Server has been disabled.")),
        (Running, Stop) => Err(ControlError::InvalidRequest(
            "Server must be disabled before it can be stopped.".to_string(),
        )),

        (Disabled, Enable) => Ok(Transition::new(
            Running,
            "Server has been enabled and is running.",
        )),
        (Disabled, Disable) => Ok(Transition::new(Disabled, "Server is already disabled.")),
        (Disabled | Stopping, Stop) => Ok(Transition::new(Stopping, shutdown_message(in_flight))),

        (Stopping, Enable) => Err(ControlError::InvalidRequest(
            "Cannot enable the server while it is being stopped.".to_string(),
        )),
        (Stopping, Disable) => Err(ControlError::InvalidRequest(
            "Cannot disable the server while it is being stopped.".to_string(),
        )),

        (Stopped, _) => Err(ControlError::InvalidServerState(Stopped)),
    }
}

fn shutdown_message(in_flight: usize) -> String {
    let mut message = "Shutting down the server.".to_string();
    if in_flight > 0 {
        message.push_str(&format!(
            " The server will finish processing {in_flight} requests."
        ));
    }
    message
}

/// Returns true if workers should pick up new requests in this state.
#[must_use]
pub const fn accepts_requests(state: ServiceState) -> bool {
    matches!(state, ServiceState::Running)
}

/// Read-only view of the server state, handed to every consumer.
///
/// Consumers check [`StateView::accepts_requests`] before taking a new
/// request, so disabling the server pauses intake without stopping workers.
#[derive(Debug, Clone)]
pub struct StateView {
    rx: watch::Receiver<ServiceState>,
}

impl StateView {
    /// Wrap the receiving half of the service's state channel.
    #[must_use]
    pub fn new(rx: watch::Receiver<ServiceState>) -> Self {
        Self { rx }
    }

    /// A view pinned to one state, for consumers built outside a service.
    #[must_use]
    pub fn fixed(state: ServiceState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { rx }
    }

    /// Current server state.
    #[must_use]
    pub fn current(&self) -> ServiceState {
        *self.rx.borrow()
    }

    /// Returns true if new requests may be picked up right now.
    #[must_use]
    pub fn accepts_requests(&self) -> bool {
        accepts_requests(self.current())
    }

    /// Wait for the next state change and return the new state.
    ///
    /// If the service has been dropped this never completes.
    pub async fn changed(&mut self) -> ServiceState {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        *self.rx.borrow_and_update()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ServerAction::{Disable, Enable, Stop};
    use ServiceState::{Disabled, Running, Stopped, Stopping};

    #[test]
    fn transition_table() {
        let accepted = [
            (Running, Enable, Running),
            (Running, Disable, Disabled),
            (Disabled, Enable, Running),
            (Disabled, Disable, Disabled),
            (Disabled, Stop, Stopping),
            (Stopping, Stop, Stopping),
        ];
        for (from, action, to) in accepted {
            let result = transition(from, action, 0).unwrap();
            assert_eq!(result.state, to, "{from} + {action}");
        }

        let rejected = [(Running, Stop), (Stopping, Enable), (Stopping, Disable)];
        for (from, action) in rejected {
            let err = transition(from, action, 0).unwrap_err();
            assert!(
                matches!(err, ControlError::InvalidRequest(_)),
                "{from} + {action}"
            );
        }

        for action in [Enable, Disable, Stop] {
            let err = transition(Stopped, action, 0).unwrap_err();
            assert!(matches!(
                err,
                ControlError::InvalidServerState(ServiceState::Stopped)
            ));
            assert_eq!(err.http_status_code(), 500);
        }
    }

    #[test]
    fn messages() {
        assert_eq!(
            transition(Running, Enable, 0).unwrap().message,
            "Server is already enabled and running."
        );
        assert_eq!(
            transition(Disabled, Disable, 0).unwrap().message,
            "Server is already disabled."
        );
        assert_eq!(
            transition(Running, Stop, 0).unwrap_err().to_string(),
            "invalid request: Server must be disabled before it can be stopped."
        );
    }

    #[test]
    fn stop_reports_in_flight_requests() {
        assert_eq!(
            transition(Disabled, Stop, 0).unwrap().message,
            "Shutting down the server."
        );
        assert_eq!(
            transition(Disabled, Stop, 3).unwrap().message,
            "Shutting down the server. The server will finish processing 3 requests."
        );
    }

    #[test]
    fn stop_is_idempotent_while_stopping() {
        let first = transition(Stopping, Stop, 2).unwrap();
        let second = transition(first.state, Stop, 1).unwrap();
        assert_eq!(second.state, Stopping);
        assert!(second.message.contains("1 requests"));
    }

    #[test]
    fn only_running_accepts_requests() {
        assert!(accepts_requests(Running));
        assert!(!accepts_requests(Disabled));
        assert!(!accepts_requests(Stopping));
        assert!(!accepts_requests(Stopped));
    }

    #[tokio::test]
    async fn state_view_follows_the_sender() {
        let (tx, rx) = watch::channel(Running);
        let mut view = StateView::new(rx);
        assert!(view.accepts_requests());

        tx.send_replace(Disabled);
        assert_eq!(view.changed().await, Disabled);
        assert!(!view.clone().accepts_requests());

        assert!(!StateView::fixed(Stopping).accepts_requests());
    }
}
