//! OTA upgrade status and offers

use serde::{Deserialize, Serialize};

/// Upgrade progression as persisted in the `user` settings section.
///
/// ```text
/// None -> Notified -> Downloading -> Applied
///                                 \-> Failed
/// Applied | Failed --refresh--> None
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum OtaStatus {
    #[default]
    None = 0,
    /// Offer received and recorded, waiting for user authorization
    Notified = 1,
    Downloading = 2,
    Applied = 3,
    Failed = 4,
}

impl OtaStatus {
    /// Whether `self -> next` is one of the defined edges.
    ///
    /// `Notified -> Notified` is allowed so a newer offer can replace the
    /// recorded one while waiting for authorization.
    pub fn can_transition(self, next: OtaStatus) -> bool {
        use OtaStatus::{Applied, Downloading, Failed, None, Notified};
        matches!(
            (self, next),
            (None | Notified, Notified)
                | (Notified, Downloading)
                | (Downloading, Applied | Failed)
                | (Applied | Failed, None)
        )
    }

    /// Terminal states that stay visible until an explicit refresh
    pub fn is_terminal(self) -> bool {
        matches!(self, OtaStatus::Applied | OtaStatus::Failed)
    }
}

impl From<OtaStatus> for u8 {
    fn from(status: OtaStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for OtaStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OtaStatus::None),
            1 => Ok(OtaStatus::Notified),
            2 => Ok(OtaStatus::Downloading),
            3 => Ok(OtaStatus::Applied),
            4 => Ok(OtaStatus::Failed),
            other => Err(format!("invalid ota status {other}")),
        }
    }
}

impl std::fmt::Display for OtaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OtaStatus::None => write!(f, "NONE"),
            OtaStatus::Notified => write!(f, "NOTIFIED"),
            OtaStatus::Downloading => write!(f, "DOWNLOADING"),
            OtaStatus::Applied => write!(f, "APPLIED"),
            OtaStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Which image an upgrade targets, encoded as `upgrade_module`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum UpgradeModule {
    #[default]
    None = 0,
    /// Modem firmware (system image)
    Firmware = 1,
    /// Tracker application
    Application = 2,
}

impl From<UpgradeModule> for u8 {
    fn from(module: UpgradeModule) -> Self {
        module as u8
    }
}

impl TryFrom<u8> for UpgradeModule {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UpgradeModule::None),
            1 => Ok(UpgradeModule::Firmware),
            2 => Ok(UpgradeModule::Application),
            other => Err(format!("invalid upgrade module {other}")),
        }
    }
}

/// An upgrade offered by the cloud (`data` object of an OTA notification)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OtaOffer {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5: String,
    /// Remaining platform-specific fields, handed to the upgrader untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Module identity, target version and status of the current upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaInfo {
    pub module: UpgradeModule,
    pub target_version: String,
    pub status: OtaStatus,
}
