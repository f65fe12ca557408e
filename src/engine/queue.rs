//! Business event queue
//!
//! Unbounded FIFO between event producers (alarm callbacks, cloud and
//! network callbacks, command handlers) and the single worker. Alongside the
//! channel it tracks how many events are waiting and whether a dispatch is in
//! progress, so the sleep helper can wait for "queue empty and worker idle".
//!
//! The worker marks itself busy *before* the depth counter drops, so the idle
//! condition is never observed between dequeue and dispatch.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::warn;

use crate::types::BusinessEvent;

#[derive(Debug, Default)]
struct QueueState {
    depth: AtomicUsize,
    busy: AtomicBool,
    idle: Notify,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.depth.load(Ordering::SeqCst) == 0 && !self.busy.load(Ordering::SeqCst)
    }
}

/// Producer handle. Cheap to clone; `enqueue` never blocks or fails.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<BusinessEvent>,
    state: Arc<QueueState>,
}

/// Consumer half, owned by the worker
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<BusinessEvent>,
    state: Arc<QueueState>,
}

/// Read-only view of the queue counters for the sleep helper
#[derive(Debug, Clone)]
pub struct IdleMonitor {
    state: Arc<QueueState>,
}

impl EventQueue {
    pub fn new() -> (EventQueue, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        (
            EventQueue {
                tx,
                state: state.clone(),
            },
            EventReceiver { rx, state },
        )
    }

    /// Append an event. Dropped with a warning if the worker is gone.
    pub fn enqueue(&self, event: impl Into<BusinessEvent>) {
        let event = event.into();
        self.state.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            self.state.depth.fetch_sub(1, Ordering::SeqCst);
            warn!(event = %event.kind(), "Worker stopped, dropping event");
        }
    }

    /// Events waiting, excluding the one being dispatched
    pub fn depth(&self) -> usize {
        self.state.depth.load(Ordering::SeqCst)
    }

    pub fn idle_monitor(&self) -> IdleMonitor {
        IdleMonitor {
            state: self.state.clone(),
        }
    }
}

impl EventReceiver {
    /// Next event, or `None` once every producer handle is dropped.
    ///
    /// The returned guard keeps the worker marked busy until dropped.
    pub async fn recv(&mut self) -> Option<InFlight> {
        let event = self.rx.recv().await?;
        self.state.busy.store(true, Ordering::SeqCst);
        self.state.depth.fetch_sub(1, Ordering::SeqCst);
        Some(InFlight {
            event: Some(event),
            state: self.state.clone(),
        })
    }
}

/// An event being dispatched. Clears the busy flag on drop.
#[derive(Debug)]
pub struct InFlight {
    event: Option<BusinessEvent>,
    state: Arc<QueueState>,
}

impl InFlight {
    /// Take the event out; the busy mark stays until the guard drops
    pub fn take(&mut self) -> Option<BusinessEvent> {
        self.event.take()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::SeqCst);
        if self.state.is_idle() {
            self.state.idle.notify_waiters();
        }
    }
}

impl IdleMonitor {
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Wait until the queue is empty and no dispatch is running.
    ///
    /// Woken by the worker going idle, with `poll` as an upper bound between
    /// checks in case a wakeup races with an enqueue.
    pub async fn wait_idle(&self, poll: Duration) {
        loop {
            let notified = self.state.idle.notified();
            if self.state.is_idle() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
