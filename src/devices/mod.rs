//! Device Collaborators
//!
//! Abstract interfaces to everything the engine drives but does not own:
//! modem network stack, cloud session, positioning receivers, sensors,
//! upgrader, and low-power primitives.
//!
//! ## Contracts
//!
//! - Async traits may block for bounded time (attach wait, GNSS timeout,
//!   image download). The engine calls them inline, one at a time.
//! - Sync traits are expected to return immediately.
//! - Every fallible call returns a typed error; the engine logs it and
//!   decides the fallback, nothing is retried inside an implementation.

pub mod cloud;
pub mod location;
pub mod network;
pub mod power;
pub mod sensors;

pub use cloud::{CloudClient, CloudError};
pub use location::{
    CellLocator, CoordinateTransform, Gcj02Transform, Gnss, LocationError, WifiLocator,
};
pub use network::{NetworkError, NetworkManager};
pub use power::{PowerError, PowerManager, SleepInhibitGuard, UpgradeError, Upgrader, WakeAlarm, WakeCallback};
pub use sensors::{Battery, ClimateReading, TempHumiditySensor};
