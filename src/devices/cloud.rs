//! Cloud session interface
//!
//! One authenticated session to the IoT platform. Inbound messages are
//! delivered separately, as `BusinessEvent::Remote` through the engine queue.

use async_trait::async_trait;
use serde_json::Value;

use crate::settings::SessionCredentials;
use crate::types::{Alarm, DeviceProperties};

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("session not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("request timed out")]
    Timeout,
}

#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Session is authenticated and usable
    async fn session_live(&self) -> bool;

    /// Open the session. `Ok(())` means the session is live.
    async fn connect(&self) -> Result<(), CloudError>;

    /// Close the session. Safe to call when already closed.
    async fn disconnect(&self);

    /// Credentials in use by the current session. The platform may rotate
    /// them during `connect` (dynamic registration).
    async fn credentials(&self) -> Option<SessionCredentials>;

    async fn publish_properties(&self, properties: &DeviceProperties) -> Result<(), CloudError>;

    async fn publish_event(&self, alarm: Alarm) -> Result<(), CloudError>;

    async fn publish_telemetry(&self, values: &DeviceProperties) -> Result<(), CloudError>;

    async fn property_set_reply(&self, id: &str, code: u32, msg: &str) -> Result<(), CloudError>;

    async fn rrpc_response(&self, msg_id: &str, payload: &Value) -> Result<(), CloudError>;

    async fn service_response(
        &self,
        service: &str,
        code: u32,
        data: &Value,
        id: &str,
        msg: &str,
    ) -> Result<(), CloudError>;

    /// Report upgrade progress for `module` (`step` < 0 is a refusal or failure)
    async fn ota_progress(
        &self,
        step: i32,
        desc: &str,
        module: Option<&str>,
    ) -> Result<(), CloudError>;

    /// Announce the running version of a module
    async fn ota_inform(&self, version: &str, module: &str) -> Result<(), CloudError>;

    /// Ask for a pending upgrade of a module; the answer arrives as an OTA message
    async fn ota_query(&self, module: &str) -> Result<(), CloudError>;
}
