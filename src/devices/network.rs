//! Cellular network manager interface

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("modem error: {0}")]
    Modem(String),
    #[error("network time unavailable: {0}")]
    ClockSync(String),
}

/// Modem data-call and SIM management.
///
/// Attach/detach notifications from the modem are delivered separately, as
/// `BusinessEvent::Network` through the engine queue.
#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// Data call is up
    async fn is_attached(&self) -> bool;

    /// SIM present and registered
    async fn sim_ready(&self) -> bool;

    /// Tear down and redial the data call
    async fn reconnect(&self) -> Result<(), NetworkError>;

    /// Block until attached or the driver's own attach timeout elapses.
    /// Returns the attach state at the end of the wait.
    async fn wait_for_attach(&self) -> bool;

    /// Set the device clock from network time
    async fn sync_clock(&self) -> Result<(), NetworkError>;
}
