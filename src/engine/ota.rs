//! OTA upgrade progression
//!
//! Status lives in the `user` settings section and is written after every
//! transition, so a reboot mid-upgrade leaves an accurate record:
//!
//! ```text
//!                  ┌─re-offer─┐
//!                  v          │
//! None ──offer──> Notified ───┴──authorized──> Downloading ──ok──> Applied  (restart)
//!                                                          └─err─> Failed
//! Applied | Failed ──refresh (next cycle)──> None
//! ```
//!
//! A single in-flight flag suppresses overlapping upgrade handling and
//! version checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityManager;
use super::EngineError;
use crate::config::defaults::{
    OTA_OK_CODE_NUM, OTA_OK_CODE_STR, OTA_PROGRESS_REFUSED, OTA_PROGRESS_START, OTA_REFUSED_DESC,
};
use crate::config::DeviceConfig;
use crate::devices::{CloudClient, PowerManager, Upgrader};
use crate::settings::{SettingsStore, SettingsUpdate, NO_TARGET_VERSION};
use crate::types::{OtaInfo, OtaOffer, OtaStatus, UpgradeModule};

/// Result of handling one upgrade notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaOutcome {
    /// Another upgrade is being handled
    Busy,
    /// OTA switched off on the device
    Refused,
    /// Current status does not accept a new offer
    Ignored,
    /// Malformed offer or unknown module
    Invalid,
    /// Recorded as NOTIFIED, waiting for the user
    Deferred,
    Applied,
    Failed,
}

/// Clears the in-flight flag when handling ends, however it ends
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct OtaStateMachine {
    settings: Arc<dyn SettingsStore>,
    cloud: Arc<dyn CloudClient>,
    upgrader: Arc<dyn Upgrader>,
    power: Arc<dyn PowerManager>,
    connectivity: Arc<ConnectivityManager>,
    device: DeviceConfig,
    max_retries: u32,
    in_flight: AtomicBool,
}

impl OtaStateMachine {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        cloud: Arc<dyn CloudClient>,
        upgrader: Arc<dyn Upgrader>,
        power: Arc<dyn PowerManager>,
        connectivity: Arc<ConnectivityManager>,
        device: DeviceConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            settings,
            cloud,
            upgrader,
            power,
            connectivity,
            device,
            max_retries,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Persisted upgrade record
    pub fn info(&self) -> Result<OtaInfo, EngineError> {
        let record = self.settings.user()?.ota_status;
        let target_version = match record.upgrade_module {
            UpgradeModule::Firmware => record.sys_target_version,
            UpgradeModule::Application => record.app_target_version,
            UpgradeModule::None => NO_TARGET_VERSION.to_string(),
        };
        Ok(OtaInfo {
            module: record.upgrade_module,
            target_version,
            status: record.upgrade_status,
        })
    }

    /// Handle an upgrade notification or a reply to [`check`](Self::check)
    pub async fn on_notification(&self, payload: &Value) -> Result<OtaOutcome, EngineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("OTA already in flight, notification dropped");
            return Ok(OtaOutcome::Busy);
        }
        let _flight = FlightGuard(&self.in_flight);

        let user = self.settings.user()?;
        let offered_module = payload
            .get("data")
            .and_then(|d| d.get("module"))
            .and_then(Value::as_str);

        if !user.sw_ota {
            info!(module = ?offered_module, "OTA disabled, refusing offer");
            if let Err(e) = self
                .cloud
                .ota_progress(OTA_PROGRESS_REFUSED, OTA_REFUSED_DESC, offered_module)
                .await
            {
                warn!(error = %e, "Failed to report OTA refusal");
            }
            return Ok(OtaOutcome::Refused);
        }

        let current = user.ota_status.upgrade_status;
        if !matches!(current, OtaStatus::None | OtaStatus::Notified) {
            info!(status = %current, "OTA offer ignored until status is refreshed");
            return Ok(OtaOutcome::Ignored);
        }

        let authorized = user.sw_ota_auto_upgrade || user.user_ota_action == 1;
        if authorized && !offer_code_accepted(payload) {
            warn!(code = ?payload.get("code"), "OTA offer rejected: unexpected code");
            return Ok(OtaOutcome::Invalid);
        }

        let offer: OtaOffer = match payload.get("data").cloned().map(serde_json::from_value) {
            Some(Ok(offer)) => offer,
            Some(Err(e)) => {
                warn!(error = %e, "OTA offer rejected: malformed data");
                return Ok(OtaOutcome::Invalid);
            }
            None => {
                warn!("OTA offer rejected: no data");
                return Ok(OtaOutcome::Invalid);
            }
        };
        let Some(module) = self.module_of(&offer.module) else {
            warn!(module = %offer.module, "OTA offer rejected: unknown module");
            return Ok(OtaOutcome::Invalid);
        };

        if !authorized {
            self.persist(module, &offer.version, OtaStatus::Notified)?;
            info!(module = %offer.module, version = %offer.version, "OTA offer recorded, waiting for authorization");
            return Ok(OtaOutcome::Deferred);
        }

        self.run_upgrade(module, &offer).await
    }

    async fn run_upgrade(
        &self,
        module: UpgradeModule,
        offer: &OtaOffer,
    ) -> Result<OtaOutcome, EngineError> {
        if let Err(e) = self
            .cloud
            .ota_progress(OTA_PROGRESS_START, "", Some(&offer.module))
            .await
        {
            warn!(error = %e, "Failed to report OTA start");
        }

        self.persist(module, &offer.version, OtaStatus::Notified)?;
        self.persist(module, &offer.version, OtaStatus::Downloading)?;
        info!(module = %offer.module, version = %offer.version, size = offer.size, "Applying upgrade");

        match self.upgrader.apply(offer).await {
            Ok(()) => {
                self.persist(module, &offer.version, OtaStatus::Applied)?;
                info!(module = %offer.module, version = %offer.version, "Upgrade applied, restarting");
                self.power.restart();
                Ok(OtaOutcome::Applied)
            }
            Err(e) => {
                warn!(module = %offer.module, error = %e, "Upgrade failed");
                self.persist(module, &offer.version, OtaStatus::Failed)?;
                Ok(OtaOutcome::Failed)
            }
        }
    }

    /// Clear a terminal status. Returns whether anything changed.
    pub fn refresh(&self) -> Result<bool, EngineError> {
        let mut user = self.settings.user()?;
        let record = &mut user.ota_status;
        if !record.upgrade_status.is_terminal() {
            debug!(status = %record.upgrade_status, "OTA refresh: nothing to clear");
            return Ok(false);
        }

        let previous = record.upgrade_status;
        match record.upgrade_module {
            UpgradeModule::Firmware => record.sys_target_version = NO_TARGET_VERSION.to_string(),
            UpgradeModule::Application => record.app_target_version = NO_TARGET_VERSION.to_string(),
            UpgradeModule::None => {}
        }
        record.upgrade_status = OtaStatus::None;
        record.upgrade_module = UpgradeModule::None;
        user.user_ota_action = -1;

        self.settings.save(SettingsUpdate::user(user))?;
        info!(previous = %previous, "OTA status refreshed");
        Ok(true)
    }

    /// Announce running versions and ask for pending upgrades.
    ///
    /// Returns false when skipped (upgrade in flight or no session).
    pub async fn check(&self) -> Result<bool, EngineError> {
        if self.in_flight() {
            debug!("OTA in flight, skipping version check");
            return Ok(false);
        }
        if !self.connectivity.ensure_connected(self.max_retries).await {
            warn!("No cloud session, skipping OTA check");
            return Ok(false);
        }

        let d = &self.device;
        for (version, module) in [
            (&d.project_version, &d.project_name),
            (&d.firmware_version, &d.firmware_name),
        ] {
            if let Err(e) = self.cloud.ota_inform(version, module).await {
                warn!(module = %module, error = %e, "OTA version inform failed");
            }
        }
        for module in [&d.project_name, &d.firmware_name] {
            if let Err(e) = self.cloud.ota_query(module).await {
                warn!(module = %module, error = %e, "OTA query failed");
            }
        }
        Ok(true)
    }

    fn module_of(&self, name: &str) -> Option<UpgradeModule> {
        if name.is_empty() {
            None
        } else if name == self.device.project_name {
            Some(UpgradeModule::Application)
        } else if name == self.device.firmware_name {
            Some(UpgradeModule::Firmware)
        } else {
            None
        }
    }

    /// Write one transition, refusing edges outside the state diagram
    fn persist(
        &self,
        module: UpgradeModule,
        version: &str,
        status: OtaStatus,
    ) -> Result<(), EngineError> {
        let mut user = self.settings.user()?;
        let record = &mut user.ota_status;
        let from = record.upgrade_status;
        if !from.can_transition(status) {
            return Err(EngineError::InvalidTransition { from, to: status });
        }

        record.upgrade_module = module;
        record.upgrade_status = status;
        match module {
            UpgradeModule::Firmware => record.sys_target_version = version.to_string(),
            UpgradeModule::Application => record.app_target_version = version.to_string(),
            UpgradeModule::None => {}
        }

        self.settings.save(SettingsUpdate::user(user))?;
        debug!(from = %from, to = %status, "OTA status persisted");
        Ok(())
    }
}

fn offer_code_accepted(payload: &Value) -> bool {
    match payload.get("code") {
        Some(Value::String(code)) => code == OTA_OK_CODE_STR,
        Some(Value::Number(code)) => code.as_i64() == Some(OTA_OK_CODE_NUM),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{InMemorySettings, UserConfig};
    use crate::simulation::{CloudCall, SimCloud, SimNetwork, SimPower, SimUpgrader};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        settings: Arc<InMemorySettings>,
        cloud: Arc<SimCloud>,
        upgrader: Arc<SimUpgrader>,
        power: Arc<SimPower>,
        ota: OtaStateMachine,
    }

    fn fixture(user: UserConfig) -> Fixture {
        let settings = Arc::new(InMemorySettings::new(user, Default::default(), Default::default()));
        let cloud = Arc::new(SimCloud::new());
        let upgrader = Arc::new(SimUpgrader::new(true));
        let power = Arc::new(SimPower::new());
        let connectivity = Arc::new(ConnectivityManager::new(
            Arc::new(SimNetwork::new(true)),
            cloud.clone(),
            settings.clone(),
            Duration::from_millis(1),
        ));
        let ota = OtaStateMachine::new(
            settings.clone(),
            cloud.clone(),
            upgrader.clone(),
            power.clone(),
            connectivity,
            DeviceConfig::default(),
            2,
        );
        Fixture {
            settings,
            cloud,
            upgrader,
            power,
            ota,
        }
    }

    fn app_offer(code: Value) -> Value {
        json!({
            "code": code,
            "data": {
                "module": DeviceConfig::default().project_name,
                "version": "2.2.0",
                "url": "https://ota.example/app.bin",
                "size": 4096,
                "md5": "0123456789abcdef",
            },
            "id": "7",
        })
    }

    fn status(f: &Fixture) -> OtaStatus {
        f.settings.user().unwrap().ota_status.upgrade_status
    }

    #[tokio::test]
    async fn test_disabled_reports_refusal_and_keeps_status() {
        let f = fixture(UserConfig {
            sw_ota: false,
            ..Default::default()
        });

        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();

        assert_eq!(outcome, OtaOutcome::Refused);
        assert_eq!(status(&f), OtaStatus::None);
        assert_eq!(
            f.cloud.calls(),
            vec![CloudCall::OtaProgress {
                step: -1,
                desc: "Device is not alowed ota.".to_string(),
                module: Some(DeviceConfig::default().project_name),
            }]
        );
        assert!(f.upgrader.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_auto_upgrade_applies_and_restarts() {
        let f = fixture(UserConfig::default());

        let outcome = f.ota.on_notification(&app_offer(json!(200))).await.unwrap();

        assert_eq!(outcome, OtaOutcome::Applied);
        let record = f.settings.user().unwrap().ota_status;
        assert_eq!(record.upgrade_status, OtaStatus::Applied);
        assert_eq!(record.upgrade_module, UpgradeModule::Application);
        assert_eq!(record.app_target_version, "2.2.0");
        assert_eq!(record.sys_target_version, NO_TARGET_VERSION);
        assert_eq!(f.power.restart_count(), 1);
        assert!(matches!(
            f.cloud.calls().first(),
            Some(CloudCall::OtaProgress { step: 1, .. })
        ));
        assert!(!f.ota.in_flight());
    }

    #[tokio::test]
    async fn test_failed_apply_lands_in_failed_without_restart() {
        let f = fixture(UserConfig::default());
        f.upgrader.set_succeed(false);

        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();

        assert_eq!(outcome, OtaOutcome::Failed);
        assert_eq!(status(&f), OtaStatus::Failed);
        assert_eq!(f.power.restart_count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_until_user_authorizes() {
        let f = fixture(UserConfig {
            sw_ota_auto_upgrade: false,
            ..Default::default()
        });

        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();
        assert_eq!(outcome, OtaOutcome::Deferred);
        assert_eq!(status(&f), OtaStatus::Notified);
        assert!(f.upgrader.attempts().is_empty());

        // A re-offer while waiting stays in Notified
        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();
        assert_eq!(outcome, OtaOutcome::Deferred);
        assert_eq!(status(&f), OtaStatus::Notified);

        let mut user = f.settings.user().unwrap();
        user.user_ota_action = 1;
        f.settings.save(SettingsUpdate::user(user)).unwrap();

        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();
        assert_eq!(outcome, OtaOutcome::Applied);
        assert_eq!(f.upgrader.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_code_or_module_is_invalid() {
        let f = fixture(UserConfig::default());

        let outcome = f.ota.on_notification(&app_offer(json!("9999"))).await.unwrap();
        assert_eq!(outcome, OtaOutcome::Invalid);

        let mut offer = app_offer(json!("1000"));
        offer["data"]["module"] = json!("");
        assert_eq!(f.ota.on_notification(&offer).await.unwrap(), OtaOutcome::Invalid);

        offer["data"]["module"] = json!("someone-else");
        assert_eq!(f.ota.on_notification(&offer).await.unwrap(), OtaOutcome::Invalid);

        assert_eq!(status(&f), OtaStatus::None);
        assert!(f.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_firmware_module_maps_to_system_version() {
        let f = fixture(UserConfig::default());
        let offer = json!({
            "code": "1000",
            "data": {"module": DeviceConfig::default().firmware_name, "version": "R03"},
        });

        f.ota.on_notification(&offer).await.unwrap();

        let record = f.settings.user().unwrap().ota_status;
        assert_eq!(record.upgrade_module, UpgradeModule::Firmware);
        assert_eq!(record.sys_target_version, "R03");
        assert_eq!(record.app_target_version, NO_TARGET_VERSION);
    }

    #[tokio::test]
    async fn test_terminal_status_ignores_offers() {
        let f = fixture(UserConfig::default());
        f.upgrader.set_succeed(false);
        f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();

        let outcome = f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();
        assert_eq!(outcome, OtaOutcome::Ignored);
        assert_eq!(f.upgrader.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_suppresses_reentry() {
        let f = fixture(UserConfig::default());
        f.ota.in_flight.store(true, Ordering::SeqCst);

        assert_eq!(
            f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap(),
            OtaOutcome::Busy
        );
        assert!(!f.ota.check().await.unwrap());
        assert!(f.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_clears_terminal_state() {
        let f = fixture(UserConfig::default());
        f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();
        let mut user = f.settings.user().unwrap();
        user.user_ota_action = 1;
        f.settings.save(SettingsUpdate::user(user)).unwrap();

        assert!(f.ota.refresh().unwrap());

        let user = f.settings.user().unwrap();
        assert_eq!(user.ota_status.upgrade_status, OtaStatus::None);
        assert_eq!(user.ota_status.upgrade_module, UpgradeModule::None);
        assert_eq!(user.ota_status.app_target_version, NO_TARGET_VERSION);
        assert_eq!(user.user_ota_action, -1);
        assert_eq!(
            f.ota.info().unwrap(),
            OtaInfo {
                module: UpgradeModule::None,
                target_version: NO_TARGET_VERSION.to_string(),
                status: OtaStatus::None,
            }
        );
    }

    #[tokio::test]
    async fn test_refresh_is_noop_outside_terminal_states() {
        let f = fixture(UserConfig {
            sw_ota_auto_upgrade: false,
            ..Default::default()
        });
        f.ota.on_notification(&app_offer(json!("1000"))).await.unwrap();

        assert!(!f.ota.refresh().unwrap());
        assert_eq!(status(&f), OtaStatus::Notified);
        assert_eq!(f.ota.info().unwrap().target_version, "2.2.0");
    }

    #[tokio::test]
    async fn test_check_informs_then_queries() {
        let f = fixture(UserConfig::default());
        let device = DeviceConfig::default();

        assert!(f.ota.check().await.unwrap());

        let ota_calls: Vec<_> = f
            .cloud
            .calls()
            .into_iter()
            .filter(|c| matches!(c, CloudCall::OtaInform { .. } | CloudCall::OtaQuery { .. }))
            .collect();
        assert_eq!(
            ota_calls,
            vec![
                CloudCall::OtaInform {
                    version: device.project_version.clone(),
                    module: device.project_name.clone(),
                },
                CloudCall::OtaInform {
                    version: device.firmware_version.clone(),
                    module: device.firmware_name.clone(),
                },
                CloudCall::OtaQuery {
                    module: device.project_name.clone(),
                },
                CloudCall::OtaQuery {
                    module: device.firmware_name.clone(),
                },
            ]
        );
    }

    #[test]
    fn test_offer_code_accepted() {
        assert!(offer_code_accepted(&json!({"code": "1000"})));
        assert!(offer_code_accepted(&json!({"code": 200})));
        assert!(!offer_code_accepted(&json!({"code": "200"})));
        assert!(!offer_code_accepted(&json!({"code": 1000})));
        assert!(!offer_code_accepted(&json!({})));
    }
}
