//! Shared data structures for the tracker business engine
//!
//! - BusinessEvent: queued unit of work (local trigger, inbound message, network change)
//! - LocationFix: resolved position with validity flag
//! - DeviceProperties / AlarmSet: per-cycle telemetry payload
//! - PendingReport: payload buffered for retransmission
//! - OtaStatus / OtaOffer: upgrade progression
//! - SleepPlan: next wake policy

mod event;
mod location;
mod ota;
mod sleep;
mod telemetry;

pub use event::*;
pub use location::*;
pub use ota::*;
pub use sleep::*;
pub use telemetry::*;
