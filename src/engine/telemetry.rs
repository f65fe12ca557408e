//! Report cycle: build the payload, deliver it, buffer what did not go out
//!
//! Ordering contract with the offline history:
//! 1. Buffered reports are flushed first, oldest first, each on its own.
//!    A partially delivered entry is narrowed in place so it keeps its slot.
//! 2. The current payload is sent next: properties, then one event per alarm.
//! 3. Whatever part of the current payload failed is appended at the end.
//!
//! Without a session the whole payload is appended untouched.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityManager;
use super::location::LocationResolver;
use super::EngineError;
use crate::config::ReportFormat;
use crate::devices::{Battery, ClimateReading, CloudClient, NetworkManager, TempHumiditySensor};
use crate::settings::{LocationConfig, SettingsStore, UserConfig};
use crate::storage::HistoryStore;
use crate::types::{Alarm, AlarmSet, DeviceProperties, LocationFix, PendingReport};

/// Battery state sampled for one payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub energy: u8,
    pub voltage: u32,
}

/// What one report cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportOutcome {
    pub connected: bool,
    /// Buffered reports fully delivered this cycle
    pub flushed: usize,
    /// Buffered reports that are still (partially) pending
    pub still_pending: usize,
    /// Whether (part of) the current payload went to the buffer
    pub buffered_current: bool,
}

pub struct TelemetryReporter {
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    cloud: Arc<dyn CloudClient>,
    network: Arc<dyn NetworkManager>,
    battery: Arc<dyn Battery>,
    climate: Arc<dyn TempHumiditySensor>,
    resolver: LocationResolver,
    connectivity: Arc<ConnectivityManager>,
    format: ReportFormat,
    max_retries: u32,
}

/// Handles the reporter needs, grouped to keep the constructor readable
pub struct ReporterDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub history: Arc<dyn HistoryStore>,
    pub cloud: Arc<dyn CloudClient>,
    pub network: Arc<dyn NetworkManager>,
    pub battery: Arc<dyn Battery>,
    pub climate: Arc<dyn TempHumiditySensor>,
}

impl TelemetryReporter {
    pub fn new(
        deps: ReporterDeps,
        resolver: LocationResolver,
        connectivity: Arc<ConnectivityManager>,
        format: ReportFormat,
        max_retries: u32,
    ) -> Self {
        Self {
            settings: deps.settings,
            history: deps.history,
            cloud: deps.cloud,
            network: deps.network,
            battery: deps.battery,
            climate: deps.climate,
            resolver,
            connectivity,
            format,
            max_retries,
        }
    }

    /// Run one report cycle
    pub async fn report_cycle(&self) -> Result<ReportOutcome, EngineError> {
        let report = self.build_report().await?;
        let mut outcome = ReportOutcome::default();

        if !self.connectivity.ensure_connected(self.max_retries).await {
            warn!(format = %self.format, "No cloud session, buffering report");
            self.history.append(std::slice::from_ref(&report))?;
            outcome.buffered_current = true;
            return Ok(outcome);
        }
        outcome.connected = true;

        let (flushed, still_pending) = self.flush_history().await;
        outcome.flushed = flushed;
        outcome.still_pending = still_pending;

        let remaining = self.deliver(&report).await;
        if !remaining.is_empty() {
            self.history.append(&[remaining])?;
            outcome.buffered_current = true;
        }

        info!(
            flushed = outcome.flushed,
            still_pending = outcome.still_pending,
            buffered_current = outcome.buffered_current,
            "Report cycle complete"
        );
        Ok(outcome)
    }

    /// Sample everything and shape the payload for the configured platform
    async fn build_report(&self) -> Result<PendingReport, EngineError> {
        let user = self.settings.user()?;
        let location = self.settings.location()?;

        let fix = self
            .resolver
            .resolve(
                user.location_methods(),
                Duration::from_secs(user.loc_gps_read_timeout),
                location.map_coordinate_system,
            )
            .await;

        let report = match self.format {
            ReportFormat::Telemetry => PendingReport::Telemetry {
                values: telemetry_values(&fix),
            },
            ReportFormat::ThingModel => {
                let power = PowerReading {
                    energy: self.battery.energy(),
                    voltage: self.battery.voltage(),
                };
                let climate = self.climate.read();
                let attached = self.network.is_attached().await;
                let sim_ready = self.network.sim_ready().await;

                let properties = build_properties(
                    &user,
                    &location,
                    &fix,
                    power,
                    climate,
                    attached,
                    chrono::Utc::now().timestamp_millis(),
                );
                let events = evaluate_alarms(&user, &properties, &fix, sim_ready);
                if !events.is_empty() {
                    debug!(?events, "Alarms raised");
                }
                PendingReport::Properties { properties, events }
            }
        };
        Ok(report)
    }

    /// Retransmit every buffered report. Returns `(delivered, still_pending)`.
    async fn flush_history(&self) -> (usize, usize) {
        let entries = match self.history.pending() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cannot read offline history, skipping flush");
                return (0, 0);
            }
        };
        if entries.is_empty() {
            return (0, 0);
        }

        info!(pending = entries.len(), "Flushing offline history");
        let mut delivered = 0;
        let mut still_pending = 0;

        for entry in entries {
            let remaining = self.deliver(&entry.report).await;
            let result = if remaining.is_empty() {
                delivered += 1;
                self.history.confirm(entry.seq)
            } else {
                still_pending += 1;
                if remaining == entry.report {
                    Ok(())
                } else {
                    self.history.replace(entry.seq, &remaining)
                }
            };
            if let Err(e) = result {
                warn!(seq = entry.seq, error = %e, "Failed to update offline history entry");
            }
        }

        (delivered, still_pending)
    }

    /// Send a report; returns the parts that were not delivered
    async fn deliver(&self, report: &PendingReport) -> PendingReport {
        match report {
            PendingReport::Properties { properties, events } => {
                let mut failed_properties = DeviceProperties::new();
                if !properties.is_empty() {
                    if let Err(e) = self.cloud.publish_properties(properties).await {
                        warn!(error = %e, "Property report failed");
                        failed_properties = properties.clone();
                    }
                }

                let mut failed_events = Vec::new();
                for alarm in events {
                    if let Err(e) = self.cloud.publish_event(*alarm).await {
                        warn!(alarm = %alarm, error = %e, "Event report failed");
                        failed_events.push(*alarm);
                    }
                }

                PendingReport::Properties {
                    properties: failed_properties,
                    events: failed_events,
                }
            }
            PendingReport::Telemetry { values } => match self.cloud.publish_telemetry(values).await {
                Ok(()) => PendingReport::Telemetry {
                    values: DeviceProperties::new(),
                },
                Err(e) => {
                    warn!(error = %e, "Telemetry report failed");
                    report.clone()
                }
            },
        }
    }
}

// ============================================================================
// Payload construction
// ============================================================================

fn flag(on: bool) -> u8 {
    u8::from(on)
}

/// Build the thing-model property set. Field names are a platform contract.
pub fn build_properties(
    user: &UserConfig,
    location: &LocationConfig,
    fix: &LocationFix,
    power: PowerReading,
    climate: ClimateReading,
    net_attached: bool,
    now_ms: i64,
) -> DeviceProperties {
    let methods = user.location_methods();
    let mut p = DeviceProperties::new();

    p.insert("power_switch", 1);
    p.insert("energy", power.energy);
    p.insert("voltage", power.voltage);
    p.insert("local_time", now_ms.to_string());
    p.insert(
        "loc_method",
        json!({
            "gps": flag(methods.gps),
            "cell": flag(methods.cellular),
            "wifi": flag(methods.wifi),
        }),
    );
    p.insert("phone_num", user.phone_num.clone());
    p.insert("work_mode", user.work_mode);
    p.insert("work_cycle_period", user.work_cycle_period);
    p.insert("low_power_alert_threshold", user.low_power_alert_threshold);
    p.insert("low_power_shutdown_threshold", user.low_power_shutdown_threshold);
    p.insert("sw_ota", flag(user.sw_ota));
    p.insert("sw_ota_auto_upgrade", flag(user.sw_ota_auto_upgrade));
    p.insert("sw_voice_listen", flag(user.sw_voice_listen));
    p.insert("sw_voice_record", flag(user.sw_voice_record));
    p.insert("sw_fault_alert", flag(user.sw_fault_alert));
    p.insert("sw_low_power_alert", flag(user.sw_low_power_alert));
    p.insert("sw_over_speed_alert", flag(user.sw_over_speed_alert));
    p.insert("sw_sim_abnormal_alert", flag(user.sw_sim_abnormal_alert));
    p.insert("sw_disassemble_alert", flag(user.sw_disassemble_alert));
    p.insert("sw_drive_behavior_alert", flag(user.sw_drive_behavior_alert));
    p.insert("drive_behavior_code", user.drive_behavior_code);
    p.insert("over_speed_threshold", user.over_speed_threshold);
    p.insert("user_ota_action", user.user_ota_action);
    p.insert(
        "ota_status",
        serde_json::to_value(&user.ota_status).unwrap_or(Value::Null),
    );
    p.insert("work_mode_timeline", user.work_mode_timeline);
    p.insert("loc_gps_read_timeout", user.loc_gps_read_timeout);
    p.insert("gps_mode", location.gps_cfg.gps_mode);

    p.insert(
        "GeoLocation",
        json!({
            "Longitude": fix.longitude,
            "Latitude": fix.latitude,
            "Altitude": fix.altitude,
            "CoordinateSystem": fix.coordinate_system.code(),
        }),
    );
    p.insert("current_speed", fix.speed);

    if let Some(t) = climate.temperature {
        p.insert("temperature", t);
    }
    if let Some(h) = climate.humidity {
        p.insert("humidity", h);
    }

    p.insert(
        "device_module_status",
        json!({
            "location": flag(fix.valid),
            "temp_sensor": flag(!climate.is_empty()),
            "net": flag(net_attached),
        }),
    );

    p
}

/// Plain telemetry payload
pub fn telemetry_values(fix: &LocationFix) -> DeviceProperties {
    let mut values = DeviceProperties::new();
    values.insert("Longitude", fix.longitude);
    values.insert("Latitude", fix.latitude);
    values.insert("Altitude", fix.altitude);
    values.insert("Speed", fix.speed);
    values
}

/// Alarms for this cycle, each gated by its switch
pub fn evaluate_alarms(
    user: &UserConfig,
    properties: &DeviceProperties,
    fix: &LocationFix,
    sim_ready: bool,
) -> AlarmSet {
    let mut alarms = AlarmSet::new();

    if user.sw_over_speed_alert && fix.valid && fix.speed >= user.over_speed_threshold {
        alarms.push(Alarm::OverSpeed);
    }

    if user.sw_sim_abnormal_alert && !sim_ready {
        alarms.push(Alarm::SimAbnormal);
    }

    let energy = properties.number("energy").unwrap_or(100.0);
    if user.sw_low_power_alert && energy < f64::from(user.low_power_alert_threshold) {
        alarms.push(Alarm::LowPower);
    }

    let module_fault = properties
        .get("device_module_status")
        .and_then(Value::as_object)
        .map(|modules| modules.values().any(|v| v.as_i64() == Some(0)))
        .unwrap_or(false);
    if user.sw_fault_alert && module_fault {
        alarms.push(Alarm::Fault);
    }

    alarms
}
