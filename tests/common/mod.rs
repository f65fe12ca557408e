//! Shared harness: an engine on simulated devices with in-memory stores

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tracker_engine::config::TrackerConfig;
use tracker_engine::settings::{
    InMemorySettings, LocationConfig, ServerConfig, SettingsStore, UserConfig,
};
use tracker_engine::simulation::{CloudCall, SimAlarm, SimulatedDevices};
use tracker_engine::storage::InMemoryHistory;
use tracker_engine::{Tracker, WorkerStats};

pub struct Harness {
    pub sim: SimulatedDevices,
    pub settings: Arc<dyn SettingsStore>,
    pub history: Arc<InMemoryHistory>,
    pub tracker: Tracker,
    cancel: CancellationToken,
    worker: JoinHandle<WorkerStats>,
}

/// Defaults with a short connect backoff so failing cycles stay fast
pub fn fast_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.connectivity.connect_backoff_ms = 1;
    config.sleep.idle_poll_ms = 10;
    config
}

impl Harness {
    pub fn start(config: TrackerConfig, user: UserConfig, location: LocationConfig) -> Self {
        let settings = Arc::new(InMemorySettings::new(user, location, ServerConfig::default()));
        Self::with_settings(config, settings)
    }

    /// Engine over a caller-supplied settings store
    pub fn with_settings(config: TrackerConfig, settings: Arc<dyn SettingsStore>) -> Self {
        let sim = SimulatedDevices::new(SimAlarm::manual());
        let history = Arc::new(InMemoryHistory::new());
        let (tracker, worker) =
            Tracker::new(config, sim.collaborators(settings.clone(), history.clone()));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(worker.run(cancel.clone()));
        Self {
            sim,
            settings,
            history,
            tracker,
            cancel,
            worker,
        }
    }

    pub fn with_defaults() -> Self {
        Self::start(fast_config(), UserConfig::default(), LocationConfig::default())
    }

    /// Wait until every queued event has been handled
    pub async fn settle(&self) {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.tracker.idle_monitor().wait_idle(Duration::from_millis(10)),
        )
        .await
        .expect("engine did not go idle");
    }

    pub async fn report(&self) {
        self.tracker
            .queue()
            .enqueue(tracker_engine::LocalEvent::Report);
        self.settle().await;
    }

    pub async fn message(&self, topic: &str, payload: Value) {
        self.tracker.on_cloud_message(topic, payload);
        self.settle().await;
    }

    /// Wait until the sleep helper has armed `count` alarms in total
    pub async fn wait_armed(&self, count: u32) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.sim.alarm.arm_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("wake alarm was not armed");
    }

    pub fn energies_published(&self) -> Vec<i64> {
        self.sim
            .cloud
            .published()
            .into_iter()
            .filter_map(|call| match call {
                CloudCall::Properties(p) => p.get("energy").and_then(Value::as_i64),
                _ => None,
            })
            .collect()
    }

    pub fn last_properties(&self) -> Option<tracker_engine::DeviceProperties> {
        self.sim
            .cloud
            .published()
            .into_iter()
            .rev()
            .find_map(|call| match call {
                CloudCall::Properties(p) => Some(p),
                _ => None,
            })
    }

    pub async fn stop(self) -> WorkerStats {
        self.cancel.cancel();
        self.worker.await.expect("worker task panicked")
    }
}
