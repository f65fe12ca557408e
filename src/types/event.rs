//! Business events: the only way work enters the engine

use serde::{Deserialize, Serialize};

/// Internal triggers produced by the engine itself (boot, wake alarm, command follow-ups)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LocalEvent {
    /// Run one location + telemetry report cycle
    Report,
    /// Spawn the sleep helper that arms the next wake alarm
    EnterSleep,
    /// Announce versions and ask the cloud for pending upgrades
    CheckOta,
    /// Clear a terminal OTA status left over from the previous run
    RefreshOta,
}

impl std::fmt::Display for LocalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalEvent::Report => write!(f, "report"),
            LocalEvent::EnterSleep => write!(f, "enter_sleep"),
            LocalEvent::CheckOta => write!(f, "check_ota"),
            LocalEvent::RefreshOta => write!(f, "refresh_ota"),
        }
    }
}

/// A queued unit of work. Immutable once enqueued, processed strictly FIFO.
#[derive(Debug, Clone, PartialEq)]
pub enum BusinessEvent {
    Local(LocalEvent),
    /// Inbound cloud message (topic + decoded JSON payload)
    Remote {
        topic: String,
        payload: serde_json::Value,
    },
    /// Network attach/detach notification from the modem driver
    Network { attached: bool },
}

impl BusinessEvent {
    pub fn remote(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        BusinessEvent::Remote {
            topic: topic.into(),
            payload,
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> String {
        match self {
            BusinessEvent::Local(local) => local.to_string(),
            BusinessEvent::Remote { topic, .. } => format!("remote:{topic}"),
            BusinessEvent::Network { attached } => format!("network:{attached}"),
        }
    }
}

impl From<LocalEvent> for BusinessEvent {
    fn from(event: LocalEvent) -> Self {
        BusinessEvent::Local(event)
    }
}
