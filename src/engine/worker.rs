//! Single sequential consumer of the event queue
//!
//! Each dispatch runs to completion under a sleep-inhibit guard. A handler
//! error or panic is logged at the dispatch boundary and the loop moves on;
//! the event is not redelivered.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::EventReceiver;
use super::Shared;
use crate::devices::SleepInhibitGuard;

/// Counters returned when the worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
}

pub struct Worker {
    shared: Weak<Shared>,
    receiver: EventReceiver,
}

impl Worker {
    pub(crate) fn new(shared: Weak<Shared>, receiver: EventReceiver) -> Self {
        Self { shared, receiver }
    }

    /// Drain the queue until cancelled or every tracker handle is dropped
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!("Worker started");

        loop {
            let mut in_flight = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Worker shutdown signal received");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(in_flight) => in_flight,
                    None => {
                        info!("Event queue closed");
                        break;
                    }
                }
            };

            let Some(event) = in_flight.take() else {
                continue;
            };
            let Some(shared) = self.shared.upgrade() else {
                debug!("Engine dropped, worker stopping");
                break;
            };

            let kind = event.kind();
            let _inhibit = SleepInhibitGuard::new(shared.power());
            stats.processed += 1;

            match AssertUnwindSafe(shared.dispatch(event)).catch_unwind().await {
                Ok(Ok(())) => debug!(event = %kind, "Event handled"),
                Ok(Err(e)) => {
                    stats.failed += 1;
                    error!(event = %kind, error = %e, "Event handler failed");
                }
                Err(panic) => {
                    stats.panicked += 1;
                    error!(event = %kind, panic = %panic_message(panic.as_ref()), "Event handler panicked");
                }
            }
        }

        info!(
            processed = stats.processed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Worker stopped"
        );
        stats
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
