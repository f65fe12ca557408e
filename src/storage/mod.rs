//! Offline history: store-and-forward buffer for undelivered reports
//!
//! Reports that could not be delivered are appended here and retransmitted on
//! the next successful connection. Entries are keyed by a monotonically
//! increasing sequence number, so iteration order is production order.
//!
//! An entry leaves the store only through [`HistoryStore::confirm`], after the
//! cloud accepted it. A partially delivered entry is narrowed in place with
//! [`HistoryStore::replace`] and keeps its position.
//!
//! Backends:
//! - [`SledHistory`]: durable, survives power loss between cycles
//! - [`InMemoryHistory`]: tests and minimal deployments

pub mod history;

pub use history::SledHistory;

use crate::types::PendingReport;

/// A buffered report with its position in the store
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: u64,
    pub report: PendingReport,
}

/// History storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("no pending report with sequence {0}")]
    NotFound(u64),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Append-only offline buffer collaborator
pub trait HistoryStore: Send + Sync {
    /// All pending reports, oldest first
    fn pending(&self) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Append reports after everything already buffered
    fn append(&self, reports: &[PendingReport]) -> Result<(), StorageError>;

    /// Drop an entry whose delivery was confirmed
    fn confirm(&self, seq: u64) -> Result<(), StorageError>;

    /// Narrow an entry to the parts that are still undelivered
    fn replace(&self, seq: u64, report: &PendingReport) -> Result<(), StorageError>;

    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory history for testing and minimal deployments
///
/// Thread-safe via `RwLock`. Not durable, data is lost on restart.
#[derive(Default)]
pub struct InMemoryHistory {
    state: std::sync::RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    entries: Vec<HistoryEntry>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports in store order (test helper)
    pub fn reports(&self) -> Vec<PendingReport> {
        self.pending()
            .map(|entries| entries.into_iter().map(|e| e.report).collect())
            .unwrap_or_default()
    }
}

impl HistoryStore for InMemoryHistory {
    fn pending(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(state.entries.clone())
    }

    fn append(&self, reports: &[PendingReport]) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        for report in reports {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push(HistoryEntry {
                seq,
                report: report.clone(),
            });
        }
        Ok(())
    }

    fn confirm(&self, seq: u64) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        state.entries.retain(|e| e.seq != seq);
        Ok(())
    }

    fn replace(&self, seq: u64, report: &PendingReport) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.seq == seq)
            .ok_or(StorageError::NotFound(seq))?;
        entry.report = report.clone();
        Ok(())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(state.entries.len())
    }
}
