//! Simulated cellular network and cloud session

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::debug;

use crate::devices::{CloudClient, CloudError, NetworkError, NetworkManager};
use crate::settings::SessionCredentials;
use crate::types::{Alarm, DeviceProperties};

// ============================================================================
// Network
// ============================================================================

pub struct SimNetwork {
    attached: AtomicBool,
    sim_ready: AtomicBool,
    attach_on_redial: AtomicBool,
    reconnects: AtomicU32,
    clock_syncs: AtomicU32,
}

impl SimNetwork {
    pub fn new(attached: bool) -> Self {
        Self {
            attached: AtomicBool::new(attached),
            sim_ready: AtomicBool::new(true),
            attach_on_redial: AtomicBool::new(true),
            reconnects: AtomicU32::new(0),
            clock_syncs: AtomicU32::new(0),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn set_sim_ready(&self, ready: bool) {
        self.sim_ready.store(ready, Ordering::SeqCst);
    }

    /// Whether a redial brings the data call up
    pub fn set_attach_on_redial(&self, attach: bool) {
        self.attach_on_redial.store(attach, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn clock_sync_count(&self) -> u32 {
        self.clock_syncs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkManager for SimNetwork {
    async fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn sim_ready(&self) -> bool {
        self.sim_ready.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), NetworkError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if !self.sim_ready.load(Ordering::SeqCst) {
            return Err(NetworkError::Modem("no SIM".to_string()));
        }
        Ok(())
    }

    async fn wait_for_attach(&self) -> bool {
        if self.sim_ready.load(Ordering::SeqCst) && self.attach_on_redial.load(Ordering::SeqCst) {
            self.attached.store(true, Ordering::SeqCst);
        }
        self.attached.load(Ordering::SeqCst)
    }

    async fn sync_clock(&self) -> Result<(), NetworkError> {
        self.clock_syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Cloud
// ============================================================================

/// Every outbound cloud call, in order
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    Connect,
    Disconnect,
    Properties(DeviceProperties),
    Event(Alarm),
    Telemetry(DeviceProperties),
    PropertySetReply { id: String, code: u32, msg: String },
    Rrpc { msg_id: String, payload: Value },
    Service { service: String, code: u32, id: String, msg: String },
    OtaProgress { step: i32, desc: String, module: Option<String> },
    OtaInform { version: String, module: String },
    OtaQuery { module: String },
}

impl CloudCall {
    /// Telemetry-carrying calls (properties, events, plain telemetry)
    pub fn is_publish(&self) -> bool {
        matches!(
            self,
            CloudCall::Properties(_) | CloudCall::Event(_) | CloudCall::Telemetry(_)
        )
    }
}

pub struct SimCloud {
    live: AtomicBool,
    reachable: AtomicBool,
    publish_ok: AtomicBool,
    connect_attempts: AtomicU32,
    publish_attempts: AtomicU32,
    failing_publishes: Mutex<HashSet<u32>>,
    failing_alarms: Mutex<HashSet<Alarm>>,
    publish_failure_rate: f64,
    rng: Mutex<StdRng>,
    issued_credentials: Mutex<Option<SessionCredentials>>,
    calls: Mutex<Vec<CloudCall>>,
}

impl SimCloud {
    pub fn new() -> Self {
        Self::with_failure_rate(0.0, 0)
    }

    /// Publishes fail at random with probability `rate`, reproducibly per `seed`
    pub fn with_failure_rate(rate: f64, seed: u64) -> Self {
        Self {
            live: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            publish_ok: AtomicBool::new(true),
            connect_attempts: AtomicU32::new(0),
            publish_attempts: AtomicU32::new(0),
            failing_publishes: Mutex::new(HashSet::new()),
            failing_alarms: Mutex::new(HashSet::new()),
            publish_failure_rate: rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            issued_credentials: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Whether `connect` succeeds
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.live.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_publish_ok(&self, ok: bool) {
        self.publish_ok.store(ok, Ordering::SeqCst);
    }

    /// Make the `nth` publish attempt from now on fail (1-based)
    pub fn fail_publish(&self, nth: u32) {
        let target = self.publish_attempts.load(Ordering::SeqCst) + nth;
        if let Ok(mut failing) = self.failing_publishes.lock() {
            failing.insert(target);
        }
    }

    /// Make event publishes for `alarm` fail
    pub fn fail_alarm(&self, alarm: Alarm) {
        if let Ok(mut failing) = self.failing_alarms.lock() {
            failing.insert(alarm);
        }
    }

    /// Credentials the platform hands out on the next connect
    pub fn issue_credentials(&self, credentials: SessionCredentials) {
        if let Ok(mut issued) = self.issued_credentials.lock() {
            *issued = Some(credentials);
        }
    }

    pub fn drop_session(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Successfully delivered publishes, in order
    pub fn published(&self) -> Vec<CloudCall> {
        self.calls().into_iter().filter(CloudCall::is_publish).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn record(&self, call: CloudCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_publish(&self) -> Result<(), CloudError> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(CloudError::NotConnected);
        }
        let attempt = self.publish_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let targeted = self
            .failing_publishes
            .lock()
            .map(|mut f| f.remove(&attempt))
            .unwrap_or(false);
        if targeted {
            debug!(attempt, "Dropping targeted publish");
            return Err(CloudError::Publish(format!("publish #{attempt} rejected")));
        }
        if !self.publish_ok.load(Ordering::SeqCst) {
            return Err(CloudError::Publish("broker rejected message".to_string()));
        }
        if self.publish_failure_rate > 0.0 {
            let dropped = self
                .rng
                .lock()
                .map(|mut rng| rng.gen_bool(self.publish_failure_rate))
                .unwrap_or(false);
            if dropped {
                return Err(CloudError::Timeout);
            }
        }
        Ok(())
    }

    fn check_reply(&self) -> Result<(), CloudError> {
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CloudError::NotConnected)
        }
    }
}

impl Default for SimCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudClient for SimCloud {
    async fn session_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), CloudError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.record(CloudCall::Connect);
        if self.reachable.load(Ordering::SeqCst) {
            self.live.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(CloudError::Connect("broker unreachable".to_string()))
        }
    }

    async fn disconnect(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.record(CloudCall::Disconnect);
    }

    async fn credentials(&self) -> Option<SessionCredentials> {
        self.issued_credentials.lock().ok().and_then(|c| c.clone())
    }

    async fn publish_properties(&self, properties: &DeviceProperties) -> Result<(), CloudError> {
        self.check_publish()?;
        self.record(CloudCall::Properties(properties.clone()));
        Ok(())
    }

    async fn publish_event(&self, alarm: Alarm) -> Result<(), CloudError> {
        self.check_publish()?;
        let targeted = self
            .failing_alarms
            .lock()
            .map(|f| f.contains(&alarm))
            .unwrap_or(false);
        if targeted {
            return Err(CloudError::Publish(format!("{alarm} rejected")));
        }
        self.record(CloudCall::Event(alarm));
        Ok(())
    }

    async fn publish_telemetry(&self, values: &DeviceProperties) -> Result<(), CloudError> {
        self.check_publish()?;
        self.record(CloudCall::Telemetry(values.clone()));
        Ok(())
    }

    async fn property_set_reply(&self, id: &str, code: u32, msg: &str) -> Result<(), CloudError> {
        self.check_reply()?;
        self.record(CloudCall::PropertySetReply {
            id: id.to_string(),
            code,
            msg: msg.to_string(),
        });
        Ok(())
    }

    async fn rrpc_response(&self, msg_id: &str, payload: &Value) -> Result<(), CloudError> {
        self.check_reply()?;
        self.record(CloudCall::Rrpc {
            msg_id: msg_id.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn service_response(
        &self,
        service: &str,
        code: u32,
        _data: &Value,
        id: &str,
        msg: &str,
    ) -> Result<(), CloudError> {
        self.check_reply()?;
        self.record(CloudCall::Service {
            service: service.to_string(),
            code,
            id: id.to_string(),
            msg: msg.to_string(),
        });
        Ok(())
    }

    async fn ota_progress(
        &self,
        step: i32,
        desc: &str,
        module: Option<&str>,
    ) -> Result<(), CloudError> {
        debug!(step, desc, ?module, "Simulated OTA progress");
        self.record(CloudCall::OtaProgress {
            step,
            desc: desc.to_string(),
            module: module.map(str::to_string),
        });
        Ok(())
    }

    async fn ota_inform(&self, version: &str, module: &str) -> Result<(), CloudError> {
        self.check_reply()?;
        self.record(CloudCall::OtaInform {
            version: version.to_string(),
            module: module.to_string(),
        });
        Ok(())
    }

    async fn ota_query(&self, module: &str) -> Result<(), CloudError> {
        self.check_reply()?;
        self.record(CloudCall::OtaQuery {
            module: module.to_string(),
        });
        Ok(())
    }
}
