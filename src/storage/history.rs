//! Sled-backed offline history
//!
//! Key: sequence number as u64 big-endian bytes (sorts in production order).
//! Sequence numbers come from sled's monotonic id generator, so they keep
//! increasing across restarts.
//! Value: JSON-serialized `PendingReport`.
//!
//! Every mutation is flushed before returning: a report that was accepted
//! into the buffer must survive the power cut that usually follows.

use std::path::Path;

use tracing::{debug, warn};

use super::{HistoryEntry, HistoryStore, StorageError};
use crate::types::PendingReport;

/// Default tree name inside the tracker database
const HISTORY_TREE: &str = "history";

/// Durable offline buffer
#[derive(Clone)]
pub struct SledHistory {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledHistory {
    /// Open or create the history storage at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Use the history tree of an already open database
    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(HISTORY_TREE)?;
        let history = Self {
            db: db.clone(),
            tree,
        };

        let pending = history.tree.len();
        if pending > 0 {
            debug!(pending, "Offline history opened with pending reports");
        }
        Ok(history)
    }

    /// Temporary in-memory database (tests)
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    fn decode_key(key: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

impl HistoryStore for SledHistory {
    fn pending(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut entries = Vec::with_capacity(self.tree.len());

        for item in &self.tree {
            let (key, value) = item?;
            let Some(seq) = Self::decode_key(&key) else {
                warn!(key_len = key.len(), "Skipping history entry with malformed key");
                continue;
            };
            match serde_json::from_slice::<PendingReport>(&value) {
                Ok(report) => entries.push(HistoryEntry { seq, report }),
                // Kept on disk: dropping it would lose a report silently
                Err(e) => warn!(seq, error = %e, "Unreadable history entry, leaving in place"),
            }
        }

        Ok(entries)
    }

    fn append(&self, reports: &[PendingReport]) -> Result<(), StorageError> {
        if reports.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for report in reports {
            let seq = self.db.generate_id()?;
            batch.insert(&seq.to_be_bytes(), serde_json::to_vec(report)?);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        debug!(count = reports.len(), "Buffered undelivered reports");
        Ok(())
    }

    fn confirm(&self, seq: u64) -> Result<(), StorageError> {
        self.tree.remove(seq.to_be_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    fn replace(&self, seq: u64, report: &PendingReport) -> Result<(), StorageError> {
        let key = seq.to_be_bytes();
        if !self.tree.contains_key(key)? {
            return Err(StorageError::NotFound(seq));
        }
        self.tree.insert(key, serde_json::to_vec(report)?)?;
        self.tree.flush()?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.tree.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alarm, DeviceProperties};

    fn report(n: i64) -> PendingReport {
        let mut properties = DeviceProperties::new();
        properties.insert("energy", n);
        PendingReport::Properties {
            properties,
            events: vec![Alarm::LowPower],
        }
    }

    #[test]
    fn test_append_and_read_in_order() {
        let store = SledHistory::temporary().unwrap();
        store.append(&[report(1), report(2)]).unwrap();
        store.append(&[report(3)]).unwrap();

        let entries = store.pending().unwrap();
        let reports: Vec<_> = entries.into_iter().map(|e| e.report).collect();
        assert_eq!(reports, vec![report(1), report(2), report(3)]);
    }

    #[test]
    fn test_confirm_removes_only_that_entry() {
        let store = SledHistory::temporary().unwrap();
        store.append(&[report(1), report(2)]).unwrap();
        let first = store.pending().unwrap()[0].seq;

        store.confirm(first).unwrap();

        let entries = store.pending().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report, report(2));
    }

    #[test]
    fn test_replace_keeps_position() {
        let store = SledHistory::temporary().unwrap();
        store.append(&[report(1), report(2)]).unwrap();
        let first = store.pending().unwrap()[0].seq;

        let narrowed = PendingReport::Properties {
            properties: DeviceProperties::new(),
            events: vec![Alarm::LowPower],
        };
        store.replace(first, &narrowed).unwrap();

        let entries = store.pending().unwrap();
        assert_eq!(entries[0].report, narrowed);
        assert_eq!(entries[1].report, report(2));
        assert!(store.replace(u64::MAX, &narrowed).is_err());
    }

    #[test]
    fn test_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("history.db");

        {
            let store = SledHistory::open(&path).unwrap();
            store.append(&[report(1), report(2)]).unwrap();
        }

        // Reopen and append after the existing entries
        let store = SledHistory::open(&path).unwrap();
        store.append(&[report(3)]).unwrap();
        let reports: Vec<_> = store
            .pending()
            .unwrap()
            .into_iter()
            .map(|e| e.report)
            .collect();
        assert_eq!(reports, vec![report(1), report(2), report(3)]);
    }
}
