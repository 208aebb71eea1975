//! End-to-end tests of the service against an in-memory platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_control::{
    shutdown, BrokerConfig, ConsumerFactory, ControlError, MessageConsumer, Result,
    RunConfiguration, ServerAction, ServerControl, Service, ServiceState, StateView,
    TemplateDefinition,
};
use provisioner_core::{ApiVersion, WorkerId};
use provisioner_platform::MockPlatform;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TestConsumer {
    worker: WorkerId,
    state: StateView,
    in_flight: AtomicUsize,
    stopped: watch::Sender<bool>,
}

impl TestConsumer {
    fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

#[async_trait]
impl MessageConsumer for TestConsumer {
    async fn run(&self) -> Result<()> {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.send_replace(true);
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct TestFactory {
    consumers: Mutex<Vec<Arc<TestConsumer>>>,
}

impl TestFactory {
    fn consumers(&self) -> Vec<Arc<TestConsumer>> {
        self.consumers.lock().clone()
    }
}

impl ConsumerFactory for TestFactory {
    fn create(
        &self,
        _broker: &BrokerConfig,
        worker: WorkerId,
        state: StateView,
    ) -> Result<Arc<dyn MessageConsumer>> {
        let (stopped, _) = watch::channel(false);
        let consumer = Arc::new(TestConsumer {
            worker,
            state,
            in_flight: AtomicUsize::new(0),
            stopped,
        });
        self.consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }
}

fn config(default_template: &str, drain_timeout: Option<u64>) -> RunConfiguration {
    let timeout = drain_timeout
        .map(|seconds| format!("  drain_timeout_seconds: {seconds}\n"))
        .unwrap_or_default();
    let yaml = format!(
        r"
platform:
  host: https://vcd.example.com
  username: administrator
  password: secret
  api_version: '34.0'
broker:
  host: amqp.example.com
  username: guest
  password: guest
  exchange: provisioner-exchange
  routing_key: provisioner
catalog:
  org: system-org
  catalog: templates
  default_template_name: {default_template}
  default_template_revision: 1
service:
  listeners: 2
  spawn_delay_ms: 10
  drain_poll_interval_ms: 1000
{timeout}"
    );
    RunConfiguration::from_yaml_str(&yaml).unwrap()
}

fn platform() -> MockPlatform {
    MockPlatform::new(ApiVersion::new(34, 0)).with_templates(vec![
        TemplateDefinition::new("ubuntu", "1", "ubuntu_rev1"),
        TemplateDefinition::new("photon-v2", "1", "photon-v2_rev1"),
    ])
}

struct Harness {
    service: Arc<Service>,
    factory: Arc<TestFactory>,
    platform: MockPlatform,
    trigger: provisioner_control::ShutdownTrigger,
    task: JoinHandle<Result<()>>,
}

fn start(config: RunConfiguration) -> Harness {
    let platform = platform();
    let factory = Arc::new(TestFactory::default());
    let service = Arc::new(Service::new(
        config,
        Arc::new(platform.clone()),
        Arc::clone(&factory) as Arc<dyn ConsumerFactory>,
    ));
    let (trigger, shutdown) = shutdown::channel();

    let runner = Arc::clone(&service);
    let task = tokio::spawn(async move { runner.run(shutdown).await });

    Harness {
        service,
        factory,
        platform,
        trigger,
        task,
    }
}

async fn wait_for(service: &Service, state: ServiceState) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while service.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn starts_workers_and_stops_cleanly() {
    let harness = start(config("photon-v2", None));
    wait_for(&harness.service, ServiceState::Running).await;

    let info = harness.service.info();
    assert_eq!(info.status, "Running");
    assert_eq!(info.consumer_workers, 2);
    assert_eq!(info.live_workers, 2);
    assert_eq!(info.template_count, 2);
    assert!(harness.service.schema().is_none());
    let workers: Vec<u32> = harness
        .factory
        .consumers()
        .iter()
        .map(|c| c.worker.index())
        .collect();
    assert_eq!(workers, vec![0, 1]);
    assert_eq!(harness.platform.login_count(), harness.platform.logout_count());
    assert!(harness.factory.consumers().iter().all(|c| c.state.accepts_requests()));

    harness.service.update_status(ServerAction::Disable).unwrap();
    assert!(harness.factory.consumers().iter().all(|c| !c.state.accepts_requests()));
    harness.service.update_status(ServerAction::Stop).unwrap();

    harness.task.await.unwrap().unwrap();
    assert_eq!(harness.service.state(), ServiceState::Stopped);
    assert_eq!(harness.service.pool().live_workers(), 0);
    assert!(harness.factory.consumers().iter().all(|c| c.is_stopped()));
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_in_flight_requests() {
    let harness = start(config("photon-v2", None));
    wait_for(&harness.service, ServiceState::Running).await;
    let consumers = harness.factory.consumers();
    consumers[0].set_in_flight(2);

    // Polls land once a second from the moment the server runs; act between them.
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.service.update_status(ServerAction::Disable).unwrap();
    let message = harness.service.update_status(ServerAction::Stop).unwrap();
    assert_eq!(
        message,
        "Shutting down the server. The server will finish processing 2 requests."
    );
    let stopped_at = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(harness.service.state(), ServiceState::Stopping);
    consumers[0].set_in_flight(1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(harness.service.state(), ServiceState::Stopping);
    assert!(!consumers[0].is_stopped());
    consumers[0].set_in_flight(0);

    harness.task.await.unwrap().unwrap();
    let elapsed = stopped_at.elapsed();
    assert!(elapsed >= Duration::from_millis(2400), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2600), "{elapsed:?}");
    assert_eq!(harness.service.state(), ServiceState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn drain_timeout_forces_stop() {
    let harness = start(config("photon-v2", Some(2)));
    wait_for(&harness.service, ServiceState::Running).await;
    let consumers = harness.factory.consumers();
    consumers[1].set_in_flight(1);

    harness.service.update_status(ServerAction::Disable).unwrap();
    harness.service.update_status(ServerAction::Stop).unwrap();

    tokio::time::timeout(Duration::from_secs(10), harness.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(harness.service.state(), ServiceState::Stopped);
    assert!(consumers.iter().all(|c| c.is_stopped()));
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_drain_stops_workers() {
    let harness = start(config("photon-v2", None));
    wait_for(&harness.service, ServiceState::Running).await;
    let consumers = harness.factory.consumers();
    consumers[0].set_in_flight(5);

    harness.service.update_status(ServerAction::Disable).unwrap();
    harness.service.update_status(ServerAction::Stop).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(harness.service.state(), ServiceState::Stopping);

    harness.trigger.trigger();
    harness.task.await.unwrap().unwrap();

    assert_eq!(harness.service.state(), ServiceState::Stopped);
    assert!(consumers.iter().all(|c| c.is_stopped()));
    assert_eq!(harness.service.pool().live_workers(), 0);
}

#[tokio::test]
async fn interrupt_while_running_stops_without_drain() {
    let harness = start(config("photon-v2", None));
    wait_for(&harness.service, ServiceState::Running).await;

    harness.trigger.trigger();
    harness.task.await.unwrap().unwrap();

    assert_eq!(harness.service.state(), ServiceState::Stopped);
    assert!(harness.factory.consumers().iter().all(|c| c.is_stopped()));
}

#[tokio::test]
async fn missing_default_template_fails_startup() {
    let harness = start(config("coreos", None));

    let err = harness.task.await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        ControlError::DefaultTemplateMissing { ref name, .. } if name == "coreos"
    ));
    assert!(err.is_fatal());
    assert_eq!(harness.service.state(), ServiceState::Stopped);
    assert!(harness.factory.consumers().is_empty());
    assert_eq!(harness.platform.login_count(), 1);
    assert_eq!(harness.platform.logout_count(), 1);
    drop(harness.trigger);
}
