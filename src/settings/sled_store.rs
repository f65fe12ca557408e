//! Sled-backed settings store
//!
//! Each section is one JSON document keyed by its section name. Missing
//! sections read as factory defaults. Multi-section saves run in a single
//! sled transaction so a partial write can never be observed.

use std::path::Path;

use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::debug;

use super::{
    LocationConfig, Section, ServerConfig, SettingsError, SettingsStore, SettingsUpdate,
    UserConfig,
};

/// Settings persisted in a sled tree
#[derive(Clone)]
pub struct SledSettings {
    tree: sled::Tree,
    _db: sled::Db,
}

impl SledSettings {
    /// Open or create the settings database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("settings")?;
        Ok(Self {
            tree,
            _db: db,
        })
    }

    /// Use the `settings` tree of an already open database
    pub fn from_db(db: &sled::Db) -> Result<Self, SettingsError> {
        let tree = db.open_tree("settings")?;
        Ok(Self {
            tree,
            _db: db.clone(),
        })
    }

    /// Temporary in-memory database (tests)
    pub fn temporary() -> Result<Self, SettingsError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("settings")?;
        Ok(Self {
            tree,
            _db: db,
        })
    }

    fn read_section<T: DeserializeOwned + Default>(
        &self,
        section: Section,
    ) -> Result<T, SettingsError> {
        match self.tree.get(section.key())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(T::default()),
        }
    }
}

impl SettingsStore for SledSettings {
    fn user(&self) -> Result<UserConfig, SettingsError> {
        self.read_section(Section::User)
    }

    fn location(&self) -> Result<LocationConfig, SettingsError> {
        self.read_section(Section::Location)
    }

    fn server(&self) -> Result<ServerConfig, SettingsError> {
        self.read_section(Section::Server)
    }

    fn save(&self, update: SettingsUpdate) -> Result<(), SettingsError> {
        if update.is_empty() {
            return Ok(());
        }

        // Serialize everything before touching the tree
        let mut writes: Vec<(Section, Vec<u8>)> = Vec::with_capacity(3);
        if let Some(user) = &update.user {
            writes.push((Section::User, serde_json::to_vec(user)?));
        }
        if let Some(location) = &update.location {
            writes.push((Section::Location, serde_json::to_vec(location)?));
        }
        if let Some(server) = &update.server {
            writes.push((Section::Server, serde_json::to_vec(server)?));
        }

        self.tree
            .transaction(|tx| {
                for (section, bytes) in &writes {
                    tx.insert(section.key(), bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<SettingsError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(err) => SettingsError::from(err),
            })?;

        self.tree.flush()?;

        debug!(sections = writes.len(), "Settings saved");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
