//! Typed views of the `user`, `location` and `server` settings sections
//!
//! Each struct implements `Default` with the factory values of the tracker,
//! so a fresh settings store behaves exactly like a newly flashed device.

use serde::{Deserialize, Serialize};

use crate::types::{CoordinateSystem, OtaStatus, UpgradeModule};

/// Placeholder shown for a target version when no upgrade is pending
pub const NO_TARGET_VERSION: &str = "--";

/// Bit flags of the `loc_method` property
pub mod loc_method {
    pub const GPS: u8 = 0x1;
    pub const CELL: u8 = 0x2;
    pub const WIFI: u8 = 0x4;
    pub const ALL: u8 = GPS | CELL | WIFI;
}

/// Locator methods enabled in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocationMethods {
    pub gps: bool,
    pub cellular: bool,
    pub wifi: bool,
}

impl LocationMethods {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            gps: bits & loc_method::GPS != 0,
            cellular: bits & loc_method::CELL != 0,
            wifi: bits & loc_method::WIFI != 0,
        }
    }

    pub fn bits(self) -> u8 {
        let mut bits = 0;
        if self.gps {
            bits |= loc_method::GPS;
        }
        if self.cellular {
            bits |= loc_method::CELL;
        }
        if self.wifi {
            bits |= loc_method::WIFI;
        }
        bits
    }
}

/// On/off switches travel as `0`/`1` on the wire; accept either form.
mod flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Int(i64),
        }
        match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => Ok(b),
            Flag::Int(0) => Ok(false),
            Flag::Int(1) => Ok(true),
            Flag::Int(other) => Err(de::Error::custom(format!("switch must be 0 or 1, got {other}"))),
        }
    }
}

/// `loc_method` is stored as a bit set but reported as
/// `{"gps":1,"cell":1,"wifi":1}`; accept a write in either shape.
mod methods {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{loc_method, LocationMethods};

    pub fn serialize<S: Serializer>(bits: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*bits)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Reported {
            #[serde(default, with = "super::flag")]
            gps: bool,
            #[serde(default, with = "super::flag")]
            cell: bool,
            #[serde(default, with = "super::flag")]
            wifi: bool,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bits(u8),
            Reported(Reported),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bits(bits) if bits & !loc_method::ALL == 0 => Ok(bits),
            Repr::Bits(bits) => Err(de::Error::custom(format!(
                "loc_method bit set {bits:#x} has unknown bits"
            ))),
            Repr::Reported(r) => Ok(LocationMethods {
                gps: r.gps,
                cellular: r.cell,
                wifi: r.wifi,
            }
            .bits()),
        }
    }
}

/// Persisted OTA progress shown to the operator (`ota_status` property)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtaStatusRecord {
    #[serde(default)]
    pub upgrade_module: UpgradeModule,
    #[serde(default)]
    pub upgrade_status: OtaStatus,
    #[serde(default = "default_target_version")]
    pub app_target_version: String,
    #[serde(default = "default_target_version")]
    pub sys_target_version: String,
}

fn default_target_version() -> String {
    NO_TARGET_VERSION.to_string()
}

impl Default for OtaStatusRecord {
    fn default() -> Self {
        Self {
            upgrade_module: UpgradeModule::None,
            upgrade_status: OtaStatus::None,
            app_target_version: default_target_version(),
            sys_target_version: default_target_version(),
        }
    }
}

/// `user` section: everything the operator can change from the cloud
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserConfig {
    pub phone_num: String,
    /// Bit set of [`loc_method`] flags
    #[serde(with = "methods")]
    pub loc_method: u8,
    pub work_mode: u8,
    /// Seconds between report cycles
    pub work_cycle_period: u64,
    /// Cycles at or above this period (seconds) sleep in PSM instead of autosleep
    pub work_mode_timeline: u64,
    /// GNSS read timeout, seconds
    pub loc_gps_read_timeout: u64,
    pub low_power_alert_threshold: u8,
    pub low_power_shutdown_threshold: u8,
    /// km/h
    pub over_speed_threshold: f64,
    #[serde(with = "flag")]
    pub sw_ota: bool,
    #[serde(with = "flag")]
    pub sw_ota_auto_upgrade: bool,
    #[serde(with = "flag")]
    pub sw_voice_listen: bool,
    #[serde(with = "flag")]
    pub sw_voice_record: bool,
    #[serde(with = "flag")]
    pub sw_fault_alert: bool,
    #[serde(with = "flag")]
    pub sw_low_power_alert: bool,
    #[serde(with = "flag")]
    pub sw_over_speed_alert: bool,
    #[serde(with = "flag")]
    pub sw_sim_abnormal_alert: bool,
    #[serde(with = "flag")]
    pub sw_disassemble_alert: bool,
    #[serde(with = "flag")]
    pub sw_drive_behavior_alert: bool,
    pub drive_behavior_code: u8,
    /// -1 = no decision, 0 = declined, 1 = upgrade authorized
    pub user_ota_action: i8,
    pub ota_status: OtaStatusRecord,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            phone_num: String::new(),
            loc_method: loc_method::ALL,
            work_mode: 1,
            work_cycle_period: 30,
            work_mode_timeline: 3600,
            loc_gps_read_timeout: 300,
            low_power_alert_threshold: 20,
            low_power_shutdown_threshold: 5,
            over_speed_threshold: 50.0,
            sw_ota: true,
            sw_ota_auto_upgrade: true,
            sw_voice_listen: false,
            sw_voice_record: false,
            sw_fault_alert: true,
            sw_low_power_alert: true,
            sw_over_speed_alert: true,
            sw_sim_abnormal_alert: true,
            sw_disassemble_alert: true,
            sw_drive_behavior_alert: true,
            drive_behavior_code: 0,
            user_ota_action: -1,
            ota_status: OtaStatusRecord::default(),
        }
    }
}

impl UserConfig {
    pub fn location_methods(&self) -> LocationMethods {
        LocationMethods::from_bits(self.loc_method)
    }
}

/// GNSS receiver options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GpsConfig {
    /// 0 = none, 1 = internal receiver, 2 = external receiver on UART
    pub gps_mode: u8,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self { gps_mode: 1 }
    }
}

/// `location` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LocationConfig {
    pub map_coordinate_system: CoordinateSystem,
    pub gps_cfg: GpsConfig,
}

/// Credentials of the cloud session. The platform may rotate them on connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SessionCredentials {
    pub product_key: String,
    pub product_secret: String,
    pub device_name: String,
    pub device_secret: String,
}

/// `server` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub qos: u8,
    #[serde(flatten)]
    pub credentials: SessionCredentials,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            qos: 1,
            credentials: SessionCredentials::default(),
        }
    }
}
