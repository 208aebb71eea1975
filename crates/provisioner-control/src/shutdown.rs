//! Process interrupt signalling.
//!
//! An interrupt aborts startup and the drain loop. It is delivered over a
//! `watch` channel so every stage can both poll it and await it.

use tokio::sync::watch;

/// Create a connected trigger/signal pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Sending half, owned by whoever watches for OS signals.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal an interrupt. Calling it again has no further effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, handed to the service.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns true once an interrupt has been signalled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for an interrupt.
    ///
    /// If the trigger is dropped without firing, this never completes.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
