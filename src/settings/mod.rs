//! Settings store: persisted `user`, `location` and `server` sections
//!
//! The engine never caches a section across cycles: every handler reads what
//! it needs, mutates a copy, and writes it back through [`SettingsStore::save`].
//! A save is all-or-nothing across the sections it carries.
//!
//! Backends:
//! - [`SledSettings`]: durable, one JSON document per section
//! - [`InMemorySettings`]: tests and minimal deployments

mod sections;
mod sled_store;

pub use sections::*;
pub use sled_store::SledSettings;

use serde_json::Value;

/// Sections owned by the settings store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    User,
    Location,
    Server,
}

impl Section {
    pub fn key(self) -> &'static str {
        match self {
            Section::User => "user",
            Section::Location => "location",
            Section::Server => "server",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A write covering one or more sections, applied atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub user: Option<UserConfig>,
    pub location: Option<LocationConfig>,
    pub server: Option<ServerConfig>,
}

impl SettingsUpdate {
    pub fn user(user: UserConfig) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn server(server: ServerConfig) -> Self {
        Self {
            server: Some(server),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.location.is_none() && self.server.is_none()
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid value for section {section}: {reason}")]
    Invalid { section: Section, reason: String },
}

impl From<sled::Error> for SettingsError {
    fn from(err: sled::Error) -> Self {
        SettingsError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::Serialization(err.to_string())
    }
}

/// Persistent settings collaborator
pub trait SettingsStore: Send + Sync {
    fn user(&self) -> Result<UserConfig, SettingsError>;

    fn location(&self) -> Result<LocationConfig, SettingsError>;

    fn server(&self) -> Result<ServerConfig, SettingsError>;

    /// Persist every section present in `update`, or none of them
    fn save(&self, update: SettingsUpdate) -> Result<(), SettingsError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// User properties the cloud may read but never write
pub const READ_ONLY_USER_KEYS: &[&str] = &["ota_status"];

/// Apply a cloud `property/set` patch to a copy of the user section.
///
/// Unknown keys, read-only keys and ill-typed values are rejected so a bad
/// write never reaches the store. `ota_status` belongs to the OTA state
/// machine; `user_ota_action` stays writable as the operator's upgrade
/// decision but must be -1, 0 or 1.
pub fn merge_user_patch(
    user: &UserConfig,
    patch: &serde_json::Map<String, Value>,
) -> Result<UserConfig, SettingsError> {
    let mut doc = serde_json::to_value(user)?;
    let Value::Object(fields) = &mut doc else {
        return Err(SettingsError::Invalid {
            section: Section::User,
            reason: "user section is not an object".to_string(),
        });
    };

    for (key, value) in patch {
        if !fields.contains_key(key) {
            return Err(SettingsError::Invalid {
                section: Section::User,
                reason: format!("unknown property {key}"),
            });
        }
        if READ_ONLY_USER_KEYS.contains(&key.as_str()) {
            return Err(SettingsError::Invalid {
                section: Section::User,
                reason: format!("property {key} is read-only"),
            });
        }
        fields.insert(key.clone(), value.clone());
    }

    let merged: UserConfig = serde_json::from_value(doc).map_err(|e| SettingsError::Invalid {
        section: Section::User,
        reason: e.to_string(),
    })?;
    if !(-1..=1).contains(&merged.user_ota_action) {
        return Err(SettingsError::Invalid {
            section: Section::User,
            reason: format!(
                "user_ota_action must be -1, 0 or 1, got {}",
                merged.user_ota_action
            ),
        });
    }
    Ok(merged)
}

/// In-memory settings for testing and minimal deployments
///
/// Thread-safe via `RwLock`. Not durable, data is lost on restart.
#[derive(Default)]
pub struct InMemorySettings {
    state: std::sync::RwLock<SettingsState>,
}

#[derive(Debug, Clone, Default)]
struct SettingsState {
    user: UserConfig,
    location: LocationConfig,
    server: ServerConfig,
}

impl InMemorySettings {
    pub fn new(user: UserConfig, location: LocationConfig, server: ServerConfig) -> Self {
        Self {
            state: std::sync::RwLock::new(SettingsState {
                user,
                location,
                server,
            }),
        }
    }

    fn read_state(&self) -> Result<SettingsState, SettingsError> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|e| SettingsError::Storage(e.to_string()))
    }
}

impl SettingsStore for InMemorySettings {
    fn user(&self) -> Result<UserConfig, SettingsError> {
        Ok(self.read_state()?.user)
    }

    fn location(&self) -> Result<LocationConfig, SettingsError> {
        Ok(self.read_state()?.location)
    }

    fn server(&self) -> Result<ServerConfig, SettingsError> {
        Ok(self.read_state()?.server)
    }

    fn save(&self, update: SettingsUpdate) -> Result<(), SettingsError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| SettingsError::Storage(e.to_string()))?;

        if let Some(user) = update.user {
            state.user = user;
        }
        if let Some(location) = update.location {
            state.location = location;
        }
        if let Some(server) = update.server {
            state.server = server;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
