//! Telemetry payloads: properties, alarms and buffered reports

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat mapping of property name to value, rebuilt every cycle.
///
/// Field names are a contract with the cloud platform adapter and must stay
/// stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DeviceProperties(Map<String, Value>);

impl DeviceProperties {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Merge another mapping in, overwriting existing keys
    pub fn extend(&mut self, other: Map<String, Value>) {
        self.0.extend(other);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Numeric property as f64 (missing or non-numeric yields `None`)
    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }
}

impl From<Map<String, Value>> for DeviceProperties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Alarm identifiers raised for a cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Alarm {
    #[serde(rename = "over_speed_alert")]
    OverSpeed,
    #[serde(rename = "sim_abnormal_alert")]
    SimAbnormal,
    #[serde(rename = "low_power_alert")]
    LowPower,
    #[serde(rename = "fault_alert")]
    Fault,
}

impl Alarm {
    /// Event identifier published to the cloud
    pub fn event_id(self) -> &'static str {
        match self {
            Alarm::OverSpeed => "over_speed_alert",
            Alarm::SimAbnormal => "sim_abnormal_alert",
            Alarm::LowPower => "low_power_alert",
            Alarm::Fault => "fault_alert",
        }
    }
}

impl std::fmt::Display for Alarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_id())
    }
}

/// Alarms raised this cycle, in evaluation order. Stateless: recomputed every cycle.
pub type AlarmSet = Vec<Alarm>;

/// A payload awaiting (re)transmission, owned by the offline history store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingReport {
    /// Thing-model report. Either part may be empty when only the other failed.
    Properties {
        properties: DeviceProperties,
        events: Vec<Alarm>,
    },
    /// Plain telemetry record
    Telemetry { values: DeviceProperties },
}

impl PendingReport {
    /// True when nothing is left to deliver
    pub fn is_empty(&self) -> bool {
        match self {
            PendingReport::Properties { properties, events } => {
                properties.is_empty() && events.is_empty()
            }
            PendingReport::Telemetry { values } => values.is_empty(),
        }
    }
}
