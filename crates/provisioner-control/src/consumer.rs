//! Message consumer seam.
//!
//! The broker wire protocol and per-message business logic live behind
//! [`MessageConsumer`]. The service only starts consumers, asks them how
//! many requests they are processing, and tells them to stop. Each consumer
//! gets a [`StateView`] so it stops taking new requests while the server is
//! disabled or shutting down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::{ConsumerTag, WorkerId};
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::lifecycle::{self, StateView};

/// Connection parameters for the message broker.
#[derive(Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    #[serde(default = "BrokerConfig::default_port")]
    pub port: u16,
    /// Connect over TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Virtual host.
    #[serde(default = "BrokerConfig::default_vhost")]
    pub vhost: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Exchange requests are published to.
    pub exchange: String,
    /// Routing key requests are published with.
    pub routing_key: String,
}

impl BrokerConfig {
    const fn default_port() -> u16 {
        5672
    }

    fn default_vhost() -> String {
        "/".to_string()
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("password", &"***")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .finish()
    }
}

/// A worker's connection to the broker.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Consume messages until stopped or until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot continue.
    async fn run(&self) -> Result<()>;

    /// Ask the consumer to stop. Must be idempotent and callable from
    /// another task while `run` is in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop request could not be delivered.
    fn stop(&self) -> Result<()>;

    /// Number of requests this consumer is processing right now.
    fn in_flight(&self) -> usize;
}

/// Builds one consumer per worker.
pub trait ConsumerFactory: Send + Sync {
    /// Create the consumer for `worker`. `state` tells it whether new
    /// requests may be taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be constructed.
    fn create(
        &self,
        broker: &BrokerConfig,
        worker: WorkerId,
        state: StateView,
    ) -> Result<Arc<dyn MessageConsumer>>;
}

/// Consumer that holds its worker slot open without consuming anything.
///
/// This is what the binary runs until a broker client is plugged in.
pub struct IdleConsumer {
    tag: ConsumerTag,
    state: StateView,
    stopped: watch::Sender<bool>,
}

impl IdleConsumer {
    /// Create an idle consumer for `worker`.
    #[must_use]
    pub fn new(worker: WorkerId, state: StateView) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            tag: ConsumerTag::generate(worker),
            state,
            stopped,
        }
    }

    /// The consumer tag this consumer registers under.
    #[must_use]
    pub fn tag(&self) -> &ConsumerTag {
        &self.tag
    }
}

#[async_trait]
impl MessageConsumer for IdleConsumer {
    async fn run(&self) -> Result<()> {
        let mut stopped = self.stopped.subscribe();
        let mut state = self.state.clone();
        tracing::debug!(
            consumer_tag = %self.tag,
            accepting = state.accepts_requests(),
            "Consumer waiting for stop"
        );

        loop {
            tokio::select! {
                // The sender lives in `self`, so the channel cannot close here.
                _ = stopped.wait_for(|stopped| *stopped) => break,
                current = state.changed() => {
                    tracing::debug!(
                        consumer_tag = %self.tag,
                        state = %current,
                        accepting = lifecycle::accepts_requests(current),
                        "Consumer saw server state change"
                    );
                }
            }
        }

        tracing::debug!(consumer_tag = %self.tag, "Consumer stopped");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.send_replace(true);
        Ok(())
    }

    fn in_flight(&self) -> usize {
        0
    }
}

/// Factory for [`IdleConsumer`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleConsumerFactory;

impl ConsumerFactory for IdleConsumerFactory {
    fn create(
        &self,
        broker: &BrokerConfig,
        worker: WorkerId,
        state: StateView,
    ) -> Result<Arc<dyn MessageConsumer>> {
        let consumer = IdleConsumer::new(worker, state);
        tracing::info!(
            worker = %worker,
            consumer_tag = %consumer.tag(),
            broker = %broker.host,
            exchange = %broker.exchange,
            routing_key = %broker.routing_key,
            "Created idle consumer"
        );
        Ok(Arc::new(consumer))
    }
}

/// Scriptable consumers for testing the worker pool and the service.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::ControlError;

    /// How a mock consumer's `run` ends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum MockBehavior {
        /// Run until stopped.
        #[default]
        UntilStopped,
        /// Return an error immediately.
        Fail,
        /// Panic immediately.
        Panic,
    }

    /// A consumer whose in-flight count is set by the test.
    pub struct MockConsumer {
        worker: WorkerId,
        behavior: MockBehavior,
        state: StateView,
        stopped: watch::Sender<bool>,
        in_flight: AtomicUsize,
        stop_calls: AtomicUsize,
    }

    impl MockConsumer {
        /// Create a mock consumer.
        #[must_use]
        pub fn new(worker: WorkerId, behavior: MockBehavior, state: StateView) -> Self {
            let (stopped, _) = watch::channel(false);
            Self {
                worker,
                behavior,
                state,
                stopped,
                in_flight: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
            }
        }

        /// The worker this consumer belongs to.
        #[must_use]
        pub fn worker(&self) -> WorkerId {
            self.worker
        }

        /// Whether this consumer may take new requests right now.
        #[must_use]
        pub fn accepts_requests(&self) -> bool {
            self.state.accepts_requests()
        }

        /// Set the number of requests reported as in flight.
        pub fn set_in_flight(&self, count: usize) {
            self.in_flight.store(count, Ordering::SeqCst);
        }

        /// Number of times `stop` was called.
        #[must_use]
        pub fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }

        /// Returns true once `stop` has been called.
        #[must_use]
        pub fn is_stopped(&self) -> bool {
            *self.stopped.borrow()
        }
    }

    #[async_trait]
    impl MessageConsumer for MockConsumer {
        async fn run(&self) -> Result<()> {
            match self.behavior {
                MockBehavior::UntilStopped => {
                    let mut stopped = self.stopped.subscribe();
                    let _ = stopped.wait_for(|stopped| *stopped).await;
                    Ok(())
                }
                MockBehavior::Fail => Err(ControlError::Internal(format!(
                    "{} lost its broker connection",
                    self.worker
                ))),
                MockBehavior::Panic => panic!("{} panicked", self.worker),
            }
        }

        fn stop(&self) -> Result<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.stopped.send_replace(true);
            Ok(())
        }

        fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }
    }

    /// Factory that records every consumer it builds.
    #[derive(Default)]
    pub struct MockConsumerFactory {
        fail_on: HashSet<u32>,
        behaviors: Vec<(u32, MockBehavior)>,
        created: Mutex<Vec<Arc<MockConsumer>>>,
    }

    impl MockConsumerFactory {
        /// Create a factory whose consumers run until stopped.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail construction of the worker with this index.
        #[must_use]
        pub fn fail_on(mut self, index: u32) -> Self {
            self.fail_on.insert(index);
            self
        }

        /// Give the worker with this index a specific behavior.
        #[must_use]
        pub fn with_behavior(mut self, index: u32, behavior: MockBehavior) -> Self {
            self.behaviors.push((index, behavior));
            self
        }

        /// Every consumer built so far, in creation order.
        #[must_use]
        pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
            self.created.lock().clone()
        }
    }

    impl ConsumerFactory for MockConsumerFactory {
        fn create(
            &self,
            _broker: &BrokerConfig,
            worker: WorkerId,
            state: StateView,
        ) -> Result<Arc<dyn MessageConsumer>> {
            if self.fail_on.contains(&worker.index()) {
                return Err(ControlError::Internal(format!(
                    "cannot connect {worker} to broker"
                )));
            }
            let behavior = self
                .behaviors
                .iter()
                .find(|(index, _)| *index == worker.index())
                .map(|(_, behavior)| *behavior)
                .unwrap_or_default();
            let consumer = Arc::new(MockConsumer::new(worker, behavior, state));
            self.created.lock().push(Arc::clone(&consumer));
            Ok(consumer)
        }
    }
}
