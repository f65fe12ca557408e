//! System-wide default constants.
//!
//! Centralises the tuning values of the tracker engine. Grouped by subsystem
//! for easy discovery.

// ============================================================================
// Device Identity
// ============================================================================

/// Application image name announced for OTA (`upgrade_module = 2`).
pub const PROJECT_NAME: &str = "QuecPython-Tracker";

/// Application version announced for OTA.
pub const PROJECT_VERSION: &str = "2.1.0";

/// Modem firmware name announced for OTA (`upgrade_module = 1`).
pub const FIRMWARE_NAME: &str = "EC200U-CNLB";

/// Modem firmware version announced for OTA.
pub const FIRMWARE_VERSION: &str = "EC200UCNLBR02A01M08";

// ============================================================================
// Connectivity
// ============================================================================

/// Extra attach / session-connect attempts after the first one.
///
/// 2 retries = at most 3 session connect attempts per cycle.
pub const CONNECT_MAX_RETRIES: u32 = 2;

/// Fixed delay between failed session connect attempts (ms).
pub const CONNECT_BACKOFF_MS: u64 = 100;

// ============================================================================
// Sleep Scheduling
// ============================================================================

/// Fallback poll interval of the sleep helper while waiting for idle (ms).
pub const SLEEP_IDLE_POLL_MS: u64 = 500;

/// PSM active timer (seconds).
pub const PSM_ACTIVE_TIME_SECS: u64 = 5;

// ============================================================================
// OTA Protocol
// ============================================================================

/// Offer codes that mean "upgrade available" on the OTA topics.
pub const OTA_OK_CODE_STR: &str = "1000";
pub const OTA_OK_CODE_NUM: i64 = 200;

/// Progress step reported before the image is applied.
pub const OTA_PROGRESS_START: i32 = 1;

/// Progress step reported when OTA is disabled on the device.
pub const OTA_PROGRESS_REFUSED: i32 = -1;

/// Description sent with [`OTA_PROGRESS_REFUSED`]. The spelling is part of
/// the platform contract.
pub const OTA_REFUSED_DESC: &str = "Device is not alowed ota.";

// ============================================================================
// Command Replies
// ============================================================================

pub const REPLY_OK_CODE: u32 = 200;
pub const REPLY_OK_MSG: &str = "success";

/// Reply code for a `property/set` that could not be persisted.
pub const REPLY_SAVE_FAILED_CODE: u32 = 9201;
pub const REPLY_SAVE_FAILED_MSG: &str = "save properties failed";

// ============================================================================
// Storage
// ============================================================================

/// Default directory of the tracker sled database.
pub const DEFAULT_DATA_DIR: &str = "./data/tracker";

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TRACKER_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "tracker.toml";
