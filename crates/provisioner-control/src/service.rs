//! Service lifecycle orchestrator.
//!
//! This module provides the `ServerControl` trait used by the admin surface
//! and the `Service` that owns the server state, runs the startup pipeline
//! once and drives the shutdown drain.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use provisioner_core::{ServerAction, ServiceState, TemplateDefinition};
use provisioner_platform::{with_session, Platform};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::catalog;
use crate::config::RunConfiguration;
use crate::consumer::ConsumerFactory;
use crate::error::{ControlError, Result};
use crate::lifecycle::{self, StateView};
use crate::policy;
use crate::rules;
use crate::schema::{self, CapabilitySchema};
use crate::shutdown::Shutdown;
use crate::workers::WorkerPool;

/// How long to wait for worker tasks to exit once told to stop.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(10);

/// Snapshot of the server for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Product name.
    pub product: &'static str,
    /// Product description.
    pub description: &'static str,
    /// Product version.
    pub version: &'static str,
    /// Current server state.
    pub status: &'static str,
    /// Whether workers should pick up new requests.
    pub accepting_requests: bool,
    /// Configured number of consumers.
    pub consumer_workers: u32,
    /// Worker tasks that have not exited.
    pub live_workers: usize,
    /// Requests being processed right now.
    pub requests_in_progress: usize,
    /// Templates loaded from the catalog.
    pub template_count: usize,
    /// Capability entity type in use, if the platform has one.
    pub entity_type: Option<String>,
    /// Configuration file the server was started with.
    pub config_file: Option<String>,
    /// When the server reached the running state.
    pub started_at: Option<DateTime<Utc>>,
}

/// Administrative operations on the running server.
pub trait ServerControl: Send + Sync {
    /// Current server status.
    fn info(&self) -> ServerInfo;

    /// Apply an administrative action and return a message for the caller.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the action is not legal in
    /// the current state.
    fn update_status(&self, action: ServerAction) -> Result<String>;
}

enum Startup {
    Complete,
    Interrupted,
}

/// Clears the running flag when `run` returns or is dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drive `work` to completion unless an interrupt arrives first.
///
/// Returns `Ok(None)` if interrupted. Meant to run inside `with_session`
/// so the session is still logged out.
async fn until_interrupted<T, F>(shutdown: &Shutdown, stage: &str, work: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    let mut shutdown = shutdown.clone();
    tokio::select! {
        biased;
        () = shutdown.triggered() => {
            tracing::warn!(stage, "Interrupt received, aborting startup");
            Ok(None)
        }
        result = work => result.map(Some),
    }
}

/// The provisioner control-plane service.
pub struct Service {
    config: Arc<RunConfiguration>,
    config_path: Option<PathBuf>,
    platform: Arc<dyn Platform>,
    consumers: Arc<dyn ConsumerFactory>,
    state: watch::Sender<ServiceState>,
    running: AtomicBool,
    templates: RwLock<Arc<Vec<TemplateDefinition>>>,
    schema: RwLock<Option<CapabilitySchema>>,
    pool: WorkerPool,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl Service {
    /// Create a stopped service.
    #[must_use]
    pub fn new(
        config: RunConfiguration,
        platform: Arc<dyn Platform>,
        consumers: Arc<dyn ConsumerFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_path: None,
            platform,
            consumers,
            state: watch::channel(ServiceState::Stopped).0,
            running: AtomicBool::new(false),
            templates: RwLock::new(Arc::new(Vec::new())),
            schema: RwLock::new(None),
            pool: WorkerPool::new(),
            started_at: Mutex::new(None),
        }
    }

    /// Record the file the configuration was loaded from.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Current server state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// A read-only view of the server state that follows every change.
    #[must_use]
    pub fn state_view(&self) -> StateView {
        StateView::new(self.state.subscribe())
    }

    /// Templates loaded at startup, after rules were applied.
    #[must_use]
    pub fn templates(&self) -> Arc<Vec<TemplateDefinition>> {
        Arc::clone(&self.templates.read())
    }

    /// The capability schema, if the platform has one.
    #[must_use]
    pub fn schema(&self) -> Option<CapabilitySchema> {
        self.schema.read().clone()
    }

    /// The worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run the service until it is stopped.
    ///
    /// Startup stages run in order: template catalog, template rules,
    /// compute policies, installation check, capability schema, workers.
    /// Once every worker is started the server is running. It then stays up
    /// until a stop action has drained all in-flight requests, or until
    /// `shutdown` fires. Either way the workers are stopped and the state
    /// ends as `Stopped`, after which the service may be run again.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AlreadyRunning` if another `run` is in
    /// progress, otherwise the error of the first startup stage that failed.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Service is already running, ignoring second run");
            return Err(ControlError::AlreadyRunning);
        }
        let _running = RunGuard(&self.running);

        tracing::info!(
            listeners = self.config.service.listeners,
            org = %self.config.catalog.org,
            catalog = %self.config.catalog.catalog,
            "Starting service"
        );

        let outcome = self.start(&mut shutdown).await;
        match &outcome {
            Ok(Startup::Complete) => {
                self.set_running();
                self.drain(&mut shutdown).await;
            }
            Ok(Startup::Interrupted) => {
                tracing::warn!("Startup interrupted");
            }
            Err(e) => {
                tracing::error!(error = %e, "Startup failed");
            }
        }

        self.finish().await;
        outcome.map(|_| ())
    }

    async fn start(&self, shutdown: &mut Shutdown) -> Result<Startup> {
        let config = Arc::clone(&self.config);
        let catalog_config = &config.catalog;
        let stage_shutdown = shutdown.clone();
        let interrupt = &stage_shutdown;

        let loaded = with_session(self.platform.as_ref(), |session| async move {
            until_interrupted(interrupt, "template catalog", async {
                let templates = catalog::load_templates(session.as_ref(), catalog_config).await?;
                Ok::<_, ControlError>((session.api_version(), templates))
            })
            .await
        })
        .await?;
        let Some((api_version, mut templates)) = loaded else {
            return Ok(Startup::Interrupted);
        };

        let rules_required = rules::rules_required(api_version);
        if rules_required {
            rules::apply_rules(&config.template_rules, &mut templates);
        } else if !config.template_rules.is_empty() {
            tracing::info!(
                api_version = %api_version,
                "Template rules not needed on this API version, skipping"
            );
        }

        if rules_required && config.compute_policies.enabled {
            let templates = &templates;
            let enforced = with_session(self.platform.as_ref(), |session| async move {
                until_interrupted(
                    interrupt,
                    "compute policies",
                    policy::enforce(
                        session.as_ref(),
                        templates,
                        &catalog_config.org,
                        &catalog_config.catalog,
                    ),
                )
                .await
            })
            .await?;
            if enforced.is_none() {
                return Ok(Startup::Interrupted);
            }
        }

        if config.service.check_installation
            && self.check_installation(interrupt).await?.is_none()
        {
            return Ok(Startup::Interrupted);
        }

        let loaded = with_session(self.platform.as_ref(), |session| async move {
            until_interrupted(
                interrupt,
                "capability schema",
                schema::load_schema(session.as_ref()),
            )
            .await
        })
        .await?;
        let Some(schema) = loaded else {
            return Ok(Startup::Interrupted);
        };
        *self.schema.write() = schema;
        *self.templates.write() = Arc::new(templates);

        self.pool
            .start(
                config.service.listeners,
                self.consumers.as_ref(),
                &config.broker,
                &self.state_view(),
                config.service.spawn_delay(),
                shutdown,
            )
            .await;
        if Self::interrupted(shutdown, "workers") {
            return Ok(Startup::Interrupted);
        }

        Ok(Startup::Complete)
    }

    fn interrupted(shutdown: &Shutdown, stage: &str) -> bool {
        let triggered = shutdown.is_triggered();
        if triggered {
            tracing::warn!(stage, "Interrupt received, aborting startup");
        }
        triggered
    }

    async fn check_installation(&self, interrupt: &Shutdown) -> Result<Option<()>> {
        let name = self.config.service.extension_name.as_str();
        let registered = with_session(self.platform.as_ref(), |session| async move {
            until_interrupted(interrupt, "installation check", async {
                session
                    .is_extension_registered(name)
                    .await
                    .map_err(ControlError::from)
            })
            .await
        })
        .await?;

        match registered {
            None => Ok(None),
            Some(false) => Err(ControlError::NotInstalled(name.to_string())),
            Some(true) => {
                tracing::info!(extension = %name, "API extension is registered");
                Ok(Some(()))
            }
        }
    }

    fn set_running(&self) {
        self.state.send_replace(ServiceState::Running);
        *self.started_at.lock() = Some(Utc::now());
        tracing::info!(
            workers = self.pool.len(),
            templates = self.templates.read().len(),
            "Service is running"
        );
    }

    /// Wait for a stop action to drain, or for an interrupt.
    async fn drain(&self, shutdown: &mut Shutdown) {
        let mut ticker = tokio::time::interval(self.config.service.drain_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timeout = self.config.service.drain_timeout();
        let mut drain_started: Option<Instant> = None;

        loop {
            tokio::select! {
                () = shutdown.triggered() => {
                    tracing::warn!(
                        active_requests = self.pool.active_requests(),
                        "Interrupt received, stopping without draining"
                    );
                    return;
                }
                _ = ticker.tick() => {}
            }

            if self.state() != ServiceState::Stopping {
                continue;
            }
            let started = *drain_started.get_or_insert_with(Instant::now);

            let active = self.pool.active_requests();
            if active == 0 {
                tracing::info!("All requests drained");
                return;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    tracing::warn!(
                        active_requests = active,
                        timeout_seconds = limit.as_secs(),
                        "Drain timed out, stopping with requests in flight"
                    );
                    return;
                }
            }
            tracing::debug!(active_requests = active, "Waiting for requests to drain");
        }
    }

    async fn finish(&self) {
        self.pool.stop_all();
        self.pool.join(WORKER_JOIN_GRACE).await;
        self.state.send_replace(ServiceState::Stopped);
        tracing::info!("Service stopped");
    }
}

impl ServerControl for Service {
    fn info(&self) -> ServerInfo {
        let state = self.state();
        ServerInfo {
            product: "provisioner",
            description: env!("CARGO_PKG_DESCRIPTION"),
            version: env!("CARGO_PKG_VERSION"),
            status: state.as_str(),
            accepting_requests: lifecycle::accepts_requests(state),
            consumer_workers: self.config.service.listeners,
            live_workers: self.pool.live_workers(),
            requests_in_progress: self.pool.active_requests(),
            template_count: self.templates.read().len(),
            entity_type: self
                .schema
                .read()
                .as_ref()
                .map(|schema| schema.entity_type.id.to_string()),
            config_file: self
                .config_path
                .as_ref()
                .map(|path| path.display().to_string()),
            started_at: *self.started_at.lock(),
        }
    }

    fn update_status(&self, action: ServerAction) -> Result<String> {
        let in_flight = self.pool.active_requests();
        let mut outcome = Err(ControlError::InvalidServerState(ServiceState::Stopped));

        // Consumers only hear about the change when the state actually moves.
        self.state.send_if_modified(|state| {
            match lifecycle::transition(*state, action, in_flight) {
                Ok(transition) => {
                    let changed = transition.state != *state;
                    if changed {
                        tracing::info!(
                            from = %*state,
                            to = %transition.state,
                            action = %action,
                            "Server state changed"
                        );
                        *state = transition.state;
                    }
                    outcome = Ok(transition.message);
                    changed
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });

        outcome
    }
}
