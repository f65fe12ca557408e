//! Tracker business engine
//!
//! Every trigger (wake alarm, inbound cloud message, network change, boot)
//! becomes a [`BusinessEvent`] on one FIFO queue. A single [`Worker`] drains
//! it, so no two handlers ever run at the same time:
//!
//! ```text
//! alarm / cloud / network ──enqueue──> EventQueue ──> Worker::run ──> dispatch
//!                                                                   ├─ TelemetryReporter
//!                                                                   ├─ OtaStateMachine
//!                                                                   ├─ command replies
//!                                                                   └─ spawn SleepScheduler
//! ```
//!
//! The sleep helper runs beside the worker. It waits for the queue to drain,
//! then arms the wake alarm whose callback re-enters [`Tracker::start_cycle`].

pub mod commands;
pub mod connectivity;
pub mod location;
pub mod ota;
pub mod queue;
pub mod sleep;
pub mod telemetry;
pub mod worker;

pub use commands::Command;
pub use connectivity::ConnectivityManager;
pub use location::LocationResolver;
pub use ota::{OtaOutcome, OtaStateMachine};
pub use queue::{EventQueue, EventReceiver, IdleMonitor};
pub use sleep::SleepScheduler;
pub use telemetry::{ReportOutcome, TelemetryReporter};
pub use worker::{Worker, WorkerStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::defaults::{
    REPLY_OK_CODE, REPLY_OK_MSG, REPLY_SAVE_FAILED_CODE, REPLY_SAVE_FAILED_MSG,
};
use crate::config::{ReportFormat, TrackerConfig};
use crate::devices::{
    Battery, CellLocator, CloudClient, CloudError, CoordinateTransform, Gnss, NetworkError,
    NetworkManager, PowerError, PowerManager, TempHumiditySensor, UpgradeError, Upgrader,
    WakeAlarm, WakeCallback, WifiLocator,
};
use crate::settings::{merge_user_patch, SettingsError, SettingsStore, SettingsUpdate};
use crate::storage::{HistoryStore, StorageError};
use crate::types::{BusinessEvent, LocalEvent, OtaInfo, OtaStatus};

use telemetry::ReporterDeps;

// ============================================================================
// Errors
// ============================================================================

/// Failure of one event handler. Logged by the worker, never propagated further.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cloud: {0}")]
    Cloud(#[from] CloudError),
    #[error("network: {0}")]
    Network(#[from] NetworkError),
    #[error("power: {0}")]
    Power(#[from] PowerError),
    #[error("upgrade: {0}")]
    Upgrade(#[from] UpgradeError),
    #[error("OTA transition {from} -> {to} not allowed")]
    InvalidTransition { from: OtaStatus, to: OtaStatus },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ============================================================================
// Collaborators
// ============================================================================

/// Everything the engine drives, as named trait-object handles
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub history: Arc<dyn HistoryStore>,
    pub network: Arc<dyn NetworkManager>,
    pub cloud: Arc<dyn CloudClient>,
    pub upgrader: Arc<dyn Upgrader>,
    pub gnss: Arc<dyn Gnss>,
    pub cell: Arc<dyn CellLocator>,
    pub wifi: Arc<dyn WifiLocator>,
    pub transform: Arc<dyn CoordinateTransform>,
    pub battery: Arc<dyn Battery>,
    pub climate: Arc<dyn TempHumiditySensor>,
    pub power: Arc<dyn PowerManager>,
    pub alarm: Arc<dyn WakeAlarm>,
}

// ============================================================================
// Tracker
// ============================================================================

/// State shared between the public handle, the worker and alarm callbacks
pub(crate) struct Shared {
    format: ReportFormat,
    queue: EventQueue,
    settings: Arc<dyn SettingsStore>,
    cloud: Arc<dyn CloudClient>,
    power: Arc<dyn PowerManager>,
    reporter: TelemetryReporter,
    ota: OtaStateMachine,
    sleep: Arc<SleepScheduler>,
    starting: AtomicBool,
}

/// Handle to a running engine. Dropping every handle stops the worker.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<Shared>,
}

impl Tracker {
    /// Build the engine. The returned worker must be spawned for events to run.
    pub fn new(config: TrackerConfig, devices: Collaborators) -> (Tracker, Worker) {
        let (queue, receiver) = EventQueue::new();
        let max_retries = config.connectivity.max_retries;

        let connectivity = Arc::new(ConnectivityManager::new(
            devices.network.clone(),
            devices.cloud.clone(),
            devices.settings.clone(),
            config.connectivity.backoff(),
        ));
        let resolver = LocationResolver::new(
            devices.gnss,
            devices.cell,
            devices.wifi,
            devices.transform,
        );
        let reporter = TelemetryReporter::new(
            ReporterDeps {
                settings: devices.settings.clone(),
                history: devices.history,
                cloud: devices.cloud.clone(),
                network: devices.network,
                battery: devices.battery,
                climate: devices.climate,
            },
            resolver,
            connectivity.clone(),
            config.platform.report_format,
            max_retries,
        );
        let ota = OtaStateMachine::new(
            devices.settings.clone(),
            devices.cloud.clone(),
            devices.upgrader,
            devices.power.clone(),
            connectivity,
            config.device.clone(),
            max_retries,
        );
        let sleep = Arc::new(SleepScheduler::new(
            devices.settings.clone(),
            devices.power.clone(),
            devices.alarm,
            queue.idle_monitor(),
            config.sleep.clone(),
        ));

        let shared = Arc::new(Shared {
            format: config.platform.report_format,
            queue,
            settings: devices.settings,
            cloud: devices.cloud,
            power: devices.power,
            reporter,
            ota,
            sleep,
            starting: AtomicBool::new(false),
        });
        info!(
            format = %shared.format,
            settings = shared.settings.backend_name(),
            max_retries,
            "Tracker engine built"
        );

        let worker = Worker::new(Arc::downgrade(&shared), receiver);
        (Tracker { shared }, worker)
    }

    /// Producer handle for callbacks that only need to enqueue
    pub fn queue(&self) -> EventQueue {
        self.shared.queue.clone()
    }

    pub fn idle_monitor(&self) -> IdleMonitor {
        self.shared.queue.idle_monitor()
    }

    /// Begin a work cycle (boot and wake alarm entry point).
    ///
    /// Returns false if another start is already in progress.
    pub fn start_cycle(&self) -> bool {
        self.shared.start_cycle()
    }

    /// Inbound cloud message callback
    pub fn on_cloud_message(&self, topic: impl Into<String>, payload: Value) {
        self.shared.queue.enqueue(BusinessEvent::remote(topic, payload));
    }

    /// Network attach/detach callback
    pub fn on_network_change(&self, attached: bool) {
        self.shared.queue.enqueue(BusinessEvent::Network { attached });
    }

    /// Persisted upgrade record
    pub fn ota_info(&self) -> Result<OtaInfo, EngineError> {
        self.shared.ota.info()
    }
}

/// Clears the reentrancy flag of `start_cycle`
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Shared {
    fn start_cycle(&self) -> bool {
        if self.starting.swap(true, Ordering::SeqCst) {
            debug!("Cycle start already in progress");
            return false;
        }
        let _guard = StartGuard(&self.starting);

        if let Err(e) = self.power.set_autosleep(false) {
            warn!(error = %e, "Failed to leave autosleep");
        }
        if let Err(e) = self.power.disable_psm() {
            warn!(error = %e, "Failed to disable PSM");
        }

        let events: &[LocalEvent] = match self.format {
            ReportFormat::ThingModel => &[
                LocalEvent::RefreshOta,
                LocalEvent::Report,
                LocalEvent::CheckOta,
                LocalEvent::EnterSleep,
            ],
            ReportFormat::Telemetry => &[LocalEvent::Report, LocalEvent::EnterSleep],
        };
        for event in events {
            self.queue.enqueue(*event);
        }
        info!(format = %self.format, events = events.len(), "Work cycle started");
        true
    }

    /// Handle one event to completion
    pub(crate) async fn dispatch(self: &Arc<Self>, event: BusinessEvent) -> Result<(), EngineError> {
        match event {
            BusinessEvent::Local(local) => self.dispatch_local(local).await,
            BusinessEvent::Remote { topic, payload } => {
                if self.format == ReportFormat::Telemetry {
                    debug!(topic = %topic, "Telemetry platform takes no commands, message dropped");
                    return Ok(());
                }
                self.dispatch_remote(&topic, &payload).await
            }
            BusinessEvent::Network { attached } => {
                if attached {
                    info!("Network attached");
                } else {
                    info!("Network detached, closing cloud session");
                    self.cloud.disconnect().await;
                }
                Ok(())
            }
        }
    }

    async fn dispatch_local(self: &Arc<Self>, event: LocalEvent) -> Result<(), EngineError> {
        match event {
            LocalEvent::Report => {
                self.reporter.report_cycle().await?;
            }
            LocalEvent::EnterSleep => self.spawn_sleep_helper(),
            LocalEvent::CheckOta => {
                self.ota.check().await?;
            }
            LocalEvent::RefreshOta => {
                self.ota.refresh()?;
            }
        }
        Ok(())
    }

    async fn dispatch_remote(&self, topic: &str, payload: &Value) -> Result<(), EngineError> {
        match Command::route(topic) {
            Command::PropertySet => self.property_set(payload).await,
            Command::Rrpc { msg_id } => {
                self.cloud.rrpc_response(&msg_id, payload).await?;
                Ok(())
            }
            Command::Service { service } => {
                let id = commands::message_id(payload);
                self.cloud
                    .service_response(&service, REPLY_OK_CODE, &json!({}), &id, REPLY_OK_MSG)
                    .await?;
                Ok(())
            }
            Command::Ota => {
                let outcome = self.ota.on_notification(payload).await?;
                debug!(?outcome, "OTA notification handled");
                Ok(())
            }
            Command::Unknown => {
                warn!(topic = %topic, "Unhandled cloud topic");
                Ok(())
            }
        }
    }

    async fn property_set(&self, payload: &Value) -> Result<(), EngineError> {
        let id = commands::message_id(payload);

        match self.apply_user_patch(payload) {
            Ok(()) => {
                info!(id = %id, "Properties updated from cloud");
                self.cloud
                    .property_set_reply(&id, REPLY_OK_CODE, REPLY_OK_MSG)
                    .await?;
                self.queue.enqueue(LocalEvent::Report);
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Property set rejected");
                self.cloud
                    .property_set_reply(&id, REPLY_SAVE_FAILED_CODE, REPLY_SAVE_FAILED_MSG)
                    .await?;
            }
        }
        Ok(())
    }

    fn apply_user_patch(&self, payload: &Value) -> Result<(), EngineError> {
        let params = payload
            .get("params")
            .and_then(Value::as_object)
            .ok_or_else(|| EngineError::InvalidPayload("property/set without params".to_string()))?;

        let user = self.settings.user()?;
        let merged = merge_user_patch(&user, params)?;
        self.settings.save(SettingsUpdate::user(merged))?;
        Ok(())
    }

    /// The helper waits for this very dispatch to finish, so it cannot run inline
    fn spawn_sleep_helper(self: &Arc<Self>) {
        let sleep = self.sleep.clone();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            match sleep.prepare_and_arm(wake_callback(weak)).await {
                Ok(plan) => debug!(?plan, "Wake alarm armed"),
                Err(e) => error!(error = %e, "Failed to arm wake alarm, tracker stays awake"),
            }
        });
    }

    pub(crate) fn power(&self) -> Arc<dyn PowerManager> {
        self.power.clone()
    }
}

fn wake_callback(shared: Weak<Shared>) -> WakeCallback {
    Box::new(move || match shared.upgrade() {
        Some(shared) => {
            shared.start_cycle();
        }
        None => debug!("Wake alarm fired after engine shutdown"),
    })
}
