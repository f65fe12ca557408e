//! Tracker Engine: business logic of a battery-powered cellular tracker
//!
//! Sequences location acquisition, cloud reporting with store-and-forward
//! buffering, OTA upgrade progression and sleep-cycle scheduling on a single
//! event queue.
//!
//! ## Architecture
//!
//! - **Engine**: event queue, sequential worker and the handlers it dispatches to
//! - **Devices**: trait interfaces to modem, cloud, receivers, sensors, power
//! - **Settings**: persisted `user` / `location` / `server` sections
//! - **Storage**: offline history of undelivered reports
//! - **Simulation**: in-process devices for tests and the `tracker-sim` binary

pub mod config;
pub mod devices;
pub mod engine;
pub mod settings;
pub mod simulation;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::TrackerConfig;

// Re-export the engine surface
pub use engine::{Collaborators, EngineError, EventQueue, Tracker, Worker, WorkerStats};

// Re-export commonly used types
pub use types::{
    Alarm, BusinessEvent, CoordinateSystem, DeviceProperties, LocalEvent, LocationFix, OtaInfo,
    OtaStatus, PendingReport, SleepPlan, UpgradeModule,
};
