//! End-to-end engine scenarios on simulated devices
//!
//! Covers store-and-forward ordering, location fallback, OTA progression,
//! inbound commands and the full wake/sleep cycle.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{fast_config, Harness};
use serde_json::{json, Value};
use tracker_engine::config::{DeviceConfig, ReportFormat};
use tracker_engine::settings::{
    InMemorySettings, LocationConfig, ServerConfig, SettingsError, SettingsStore, SettingsUpdate,
    UserConfig,
};
use tracker_engine::simulation::CloudCall;
use tracker_engine::storage::HistoryStore;
use tracker_engine::types::CoarseFix;
use tracker_engine::{Alarm, CoordinateSystem, OtaStatus, PendingReport, UpgradeModule};

const PROPERTY_SET: &str = "/sys/pk/tracker-01/thing/service/property/set";
const OTA_UPGRADE: &str = "/ota/device/upgrade/pk/tracker-01";

fn geo(props: &tracker_engine::DeviceProperties) -> (f64, f64, i64) {
    let g = props.get("GeoLocation").expect("GeoLocation present");
    (
        g["Longitude"].as_f64().unwrap(),
        g["Latitude"].as_f64().unwrap(),
        g["CoordinateSystem"].as_i64().unwrap(),
    )
}

// ============================================================================
// Store-and-forward
// ============================================================================

#[tokio::test]
async fn test_failed_cycles_buffer_then_flush_in_order() {
    let h = Harness::with_defaults();
    h.sim.cloud.set_reachable(false);

    for energy in [51, 52, 53] {
        h.sim.battery.set_energy(energy);
        h.report().await;
    }
    assert_eq!(h.history.len().unwrap(), 3);
    assert!(h.sim.cloud.published().is_empty());

    h.sim.cloud.set_reachable(true);
    h.sim.battery.set_energy(54);
    h.report().await;

    assert_eq!(h.energies_published(), vec![51, 52, 53, 54]);
    assert!(h.history.is_empty().unwrap());
    h.stop().await;
}

#[tokio::test]
async fn test_failed_flush_entry_keeps_its_slot() {
    let h = Harness::with_defaults();
    h.sim.cloud.set_reachable(false);
    for energy in [71, 72, 73] {
        h.sim.battery.set_energy(energy);
        h.report().await;
    }
    assert_eq!(h.history.len().unwrap(), 3);

    // Second buffered entry is rejected during the flush
    h.sim.cloud.set_reachable(true);
    h.sim.cloud.fail_publish(2);
    h.sim.battery.set_energy(74);
    h.report().await;

    assert_eq!(h.energies_published(), vec![71, 73, 74]);
    let pending = h.history.reports();
    assert_eq!(pending.len(), 1);
    match &pending[0] {
        PendingReport::Properties { properties, .. } => {
            assert_eq!(properties.get("energy"), Some(&json!(72)));
        }
        other => panic!("unexpected pending report {other:?}"),
    }

    // Retransmitted before the next current payload
    h.sim.battery.set_energy(75);
    h.report().await;
    assert_eq!(h.energies_published(), vec![71, 73, 74, 72, 75]);
    assert!(h.history.is_empty().unwrap());
    h.stop().await;
}

#[tokio::test]
async fn test_n_failed_cycles_leave_n_records() {
    let h = Harness::with_defaults();
    h.sim.cloud.set_reachable(false);

    for energy in 60..67 {
        h.sim.battery.set_energy(energy);
        h.report().await;
    }

    let buffered: Vec<i64> = h
        .history
        .reports()
        .into_iter()
        .filter_map(|r| match r {
            PendingReport::Properties { properties, .. } => {
                properties.get("energy").and_then(Value::as_i64)
            }
            PendingReport::Telemetry { .. } => None,
        })
        .collect();
    assert_eq!(buffered, (60..67).collect::<Vec<i64>>());
    h.stop().await;
}

#[tokio::test]
async fn test_connect_attempts_bounded_per_cycle() {
    let h = Harness::with_defaults();
    h.sim.cloud.set_reachable(false);

    h.report().await;

    assert_eq!(h.sim.cloud.connect_attempts(), 3);
    h.stop().await;
}

#[tokio::test]
async fn test_sim_failure_buffers_without_connecting() {
    let h = Harness::with_defaults();
    h.sim.network.set_attached(false);
    h.sim.network.set_sim_ready(false);

    h.report().await;

    assert_eq!(h.sim.cloud.connect_attempts(), 0);
    let reports = h.history.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        PendingReport::Properties { events, .. } => {
            assert!(events.contains(&Alarm::SimAbnormal));
        }
        other => panic!("unexpected report {other:?}"),
    }
    h.stop().await;
}

#[tokio::test]
async fn test_failed_alarm_rebuffered_alone() {
    let user = UserConfig {
        low_power_alert_threshold: 50,
        ..Default::default()
    };
    let h = Harness::start(fast_config(), user, LocationConfig::default());
    h.sim.battery.set_energy(10);
    h.sim.cloud.fail_alarm(Alarm::LowPower);

    h.report().await;

    assert_eq!(h.energies_published(), vec![10]);
    let reports = h.history.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0] {
        PendingReport::Properties { properties, events } => {
            assert!(properties.is_empty());
            assert_eq!(events, &vec![Alarm::LowPower]);
        }
        other => panic!("unexpected report {other:?}"),
    }
    h.stop().await;
}

// ============================================================================
// Location
// ============================================================================

#[tokio::test]
async fn test_cell_fallback_transformed_to_gcj02() {
    let location = LocationConfig {
        map_coordinate_system: CoordinateSystem::Gcj02,
        ..Default::default()
    };
    let h = Harness::start(fast_config(), UserConfig::default(), location);
    h.sim.gnss.set_reading(None);
    h.sim.cell.set_fix(Some(CoarseFix::new(116.397, 39.909)));

    h.report().await;

    let props = h.last_properties().expect("report published");
    let (lng, lat, system) = geo(&props);
    assert_eq!(system, 2);
    assert!((lng - 116.397).abs() > 1e-4, "transform not applied");
    assert!((lat - 39.909).abs() > 1e-4, "transform not applied");
    assert_eq!(h.sim.wifi.read_count(), 0, "wifi tried after cell success");
    h.stop().await;
}

#[tokio::test]
async fn test_no_fix_reports_sentinel_and_fault() {
    let h = Harness::with_defaults();
    h.sim.gnss.set_reading(None);

    h.report().await;

    let props = h.last_properties().expect("report published");
    let (lng, lat, system) = geo(&props);
    assert_eq!((lng, lat, system), (181.0, 91.0, 1));
    assert_eq!(props.get("device_module_status").unwrap()["location"], json!(0));
    assert!(h.sim.cloud.published().contains(&CloudCall::Event(Alarm::Fault)));
    h.stop().await;
}

// ============================================================================
// OTA
// ============================================================================

fn app_offer() -> Value {
    json!({
        "code": "1000",
        "data": {
            "module": DeviceConfig::default().project_name,
            "version": "2.2.0",
            "url": "https://ota.example/app.bin",
            "size": 4096,
        },
        "id": "99",
    })
}

#[tokio::test]
async fn test_ota_disabled_refuses_and_stays_none() {
    let user = UserConfig {
        sw_ota: false,
        ..Default::default()
    };
    let h = Harness::start(fast_config(), user, LocationConfig::default());

    h.message(OTA_UPGRADE, app_offer()).await;

    assert!(h.sim.cloud.calls().iter().any(|c| matches!(
        c,
        CloudCall::OtaProgress { step: -1, desc, .. } if desc == "Device is not alowed ota."
    )));
    assert_eq!(h.tracker.ota_info().unwrap().status, OtaStatus::None);
    assert!(h.sim.upgrader.attempts().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_ota_applied_then_refreshed_next_cycle() {
    let h = Harness::with_defaults();

    h.message(OTA_UPGRADE, app_offer()).await;
    let info = h.tracker.ota_info().unwrap();
    assert_eq!(info.status, OtaStatus::Applied);
    assert_eq!(info.module, UpgradeModule::Application);
    assert_eq!(info.target_version, "2.2.0");
    assert_eq!(h.sim.power.restart_count(), 1);

    assert!(h.tracker.start_cycle());
    h.settle().await;

    let user = h.settings.user().unwrap();
    assert_eq!(user.ota_status.upgrade_status, OtaStatus::None);
    assert_eq!(user.ota_status.app_target_version, "--");
    assert_eq!(user.user_ota_action, -1);
    h.stop().await;
}

#[tokio::test]
async fn test_ota_failure_holds_until_refresh() {
    let h = Harness::with_defaults();
    h.sim.upgrader.set_succeed(false);

    h.message(OTA_UPGRADE, app_offer()).await;
    assert_eq!(h.tracker.ota_info().unwrap().status, OtaStatus::Failed);

    // A second offer is ignored while FAILED is displayed
    h.message(OTA_UPGRADE, app_offer()).await;
    assert_eq!(h.sim.upgrader.attempts().len(), 1);
    assert_eq!(h.sim.power.restart_count(), 0);
    h.stop().await;
}

#[tokio::test]
async fn test_ota_check_announces_both_modules() {
    let h = Harness::with_defaults();

    h.tracker.queue().enqueue(tracker_engine::LocalEvent::CheckOta);
    h.settle().await;

    let queries: Vec<String> = h
        .sim
        .cloud
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            CloudCall::OtaQuery { module } => Some(module),
            _ => None,
        })
        .collect();
    let device = DeviceConfig::default();
    assert_eq!(queries, vec![device.project_name, device.firmware_name]);
    h.stop().await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_property_set_saves_replies_and_reports() {
    let h = Harness::with_defaults();
    h.report().await;

    h.message(
        PROPERTY_SET,
        json!({"id": 12, "params": {"work_cycle_period": 120, "sw_ota": 0}}),
    )
    .await;

    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "12".to_string(),
        code: 200,
        msg: "success".to_string(),
    }));
    let user = h.settings.user().unwrap();
    assert_eq!(user.work_cycle_period, 120);
    assert!(!user.sw_ota);

    // The follow-up report carries the new values
    let props = h.last_properties().unwrap();
    assert_eq!(props.get("work_cycle_period"), Some(&json!(120)));
    assert_eq!(h.energies_published().len(), 2);
    h.stop().await;
}

#[tokio::test]
async fn test_property_set_invalid_replies_9201_and_keeps_settings() {
    let h = Harness::with_defaults();
    h.report().await;
    let before = h.settings.user().unwrap();

    h.message(PROPERTY_SET, json!({"id": "13", "params": {"bogus": 1}}))
        .await;

    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "13".to_string(),
        code: 9201,
        msg: "save properties failed".to_string(),
    }));
    assert_eq!(h.settings.user().unwrap(), before);
    assert_eq!(h.energies_published().len(), 1);
    h.stop().await;
}

/// Reads succeed, every save fails
struct ReadOnlyFlash {
    inner: InMemorySettings,
    save_attempts: AtomicU32,
}

impl SettingsStore for ReadOnlyFlash {
    fn user(&self) -> Result<UserConfig, SettingsError> {
        self.inner.user()
    }

    fn location(&self) -> Result<LocationConfig, SettingsError> {
        self.inner.location()
    }

    fn server(&self) -> Result<ServerConfig, SettingsError> {
        self.inner.server()
    }

    fn save(&self, _update: SettingsUpdate) -> Result<(), SettingsError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        Err(SettingsError::Storage("flash write failed".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "read-only"
    }
}

#[tokio::test]
async fn test_property_set_save_failure_replies_9201() {
    let store = Arc::new(ReadOnlyFlash {
        inner: InMemorySettings::default(),
        save_attempts: AtomicU32::new(0),
    });
    let h = Harness::with_settings(fast_config(), store.clone());
    h.report().await;

    h.message(
        PROPERTY_SET,
        json!({"id": "14", "params": {"work_cycle_period": 120}}),
    )
    .await;

    assert_eq!(store.save_attempts.load(Ordering::SeqCst), 1);
    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "14".to_string(),
        code: 9201,
        msg: "save properties failed".to_string(),
    }));
    assert_eq!(h.settings.user().unwrap().work_cycle_period, 30);
    // No follow-up report after a failed save
    assert_eq!(h.energies_published().len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_property_set_cannot_write_ota_status() {
    let h = Harness::with_defaults();
    h.report().await;

    h.message(
        PROPERTY_SET,
        json!({"id": "15", "params": {
            "work_cycle_period": 120,
            "ota_status": {
                "upgrade_module": 2,
                "upgrade_status": 3,
                "app_target_version": "9.9.9",
                "sys_target_version": "--"
            }
        }}),
    )
    .await;

    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "15".to_string(),
        code: 9201,
        msg: "save properties failed".to_string(),
    }));
    let user = h.settings.user().unwrap();
    assert_eq!(user.ota_status.upgrade_status, OtaStatus::None);
    assert_eq!(user.work_cycle_period, 30);
    assert_eq!(h.tracker.ota_info().unwrap().status, OtaStatus::None);
    h.stop().await;
}

#[tokio::test]
async fn test_property_set_accepts_reported_loc_method() {
    let h = Harness::with_defaults();
    h.report().await;

    let reported = h.last_properties().unwrap().get("loc_method").cloned().unwrap();
    assert_eq!(reported, json!({"gps": 1, "cell": 1, "wifi": 1}));

    h.message(
        PROPERTY_SET,
        json!({"id": "16", "params": {"loc_method": {"gps": 0, "cell": 1, "wifi": 0}}}),
    )
    .await;

    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "16".to_string(),
        code: 200,
        msg: "success".to_string(),
    }));
    let props = h.last_properties().unwrap();
    assert_eq!(
        props.get("loc_method"),
        Some(&json!({"gps": 0, "cell": 1, "wifi": 0}))
    );

    // Echoing the reported value back is a no-op
    let echoed = props.get("loc_method").cloned().unwrap();
    h.message(PROPERTY_SET, json!({"id": "17", "params": {"loc_method": echoed}}))
        .await;
    assert!(h.sim.cloud.calls().contains(&CloudCall::PropertySetReply {
        id: "17".to_string(),
        code: 200,
        msg: "success".to_string(),
    }));
    assert!(!h.settings.user().unwrap().location_methods().gps);
    h.stop().await;
}

#[tokio::test]
async fn test_rrpc_and_service_replies() {
    let h = Harness::with_defaults();
    h.report().await;

    h.message("/sys/pk/tracker-01/rrpc/request/777", json!({"cmd": "locate"}))
        .await;
    h.message("/sys/pk/tracker-01/thing/service/reboot", json!({"id": 5}))
        .await;

    let calls = h.sim.cloud.calls();
    assert!(calls.contains(&CloudCall::Rrpc {
        msg_id: "777".to_string(),
        payload: json!({"cmd": "locate"}),
    }));
    assert!(calls.contains(&CloudCall::Service {
        service: "reboot".to_string(),
        code: 200,
        id: "5".to_string(),
        msg: "success".to_string(),
    }));
    h.stop().await;
}

#[tokio::test]
async fn test_telemetry_platform_ignores_commands() {
    let mut config = fast_config();
    config.platform.report_format = ReportFormat::Telemetry;
    let h = Harness::start(config, UserConfig::default(), LocationConfig::default());

    h.report().await;
    h.message(PROPERTY_SET, json!({"id": 1, "params": {"work_cycle_period": 5}}))
        .await;

    let calls = h.sim.cloud.calls();
    assert!(calls.iter().any(|c| matches!(c, CloudCall::Telemetry(_))));
    assert!(!calls.iter().any(|c| matches!(c, CloudCall::PropertySetReply { .. })));
    assert_eq!(h.settings.user().unwrap().work_cycle_period, 30);
    h.stop().await;
}

#[tokio::test]
async fn test_network_detach_closes_session() {
    let h = Harness::with_defaults();
    h.report().await;
    h.sim.cloud.clear_calls();

    h.tracker.on_network_change(false);
    h.settle().await;

    assert_eq!(h.sim.cloud.calls(), vec![CloudCall::Disconnect]);
    h.stop().await;
}

// ============================================================================
// Wake / sleep cycle
// ============================================================================

#[tokio::test]
async fn test_cycle_sleeps_and_wakes_again() {
    let h = Harness::with_defaults();

    assert!(h.tracker.start_cycle());
    h.wait_armed(1).await;

    assert!(h.sim.power.autosleep());
    assert_eq!(
        h.sim.alarm.armed_after(),
        Some(std::time::Duration::from_secs(30))
    );
    assert_eq!(h.energies_published().len(), 1);

    // Alarm fires: next cycle runs and sleeps again
    assert!(h.sim.alarm.fire());
    h.wait_armed(2).await;
    assert_eq!(h.energies_published().len(), 2);

    let stats = h.stop().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.panicked, 0);
}
