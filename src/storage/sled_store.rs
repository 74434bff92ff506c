//! Sled-backed wafer store
//!
//! Trees:
//! - `wafers`: event-time nanos (u64 big-endian) + wafer id → JSON record
//! - `wafer_index`: wafer id → `wafers` key
//! - `settings`: named JSON blobs (notification config)

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use super::{record_key, HistoryFilter, StorageError, WaferRepository};
use crate::notify::NotificationConfig;
use crate::types::WaferAnalysis;

const WAFERS_TREE: &str = "wafers";
const INDEX_TREE: &str = "wafer_index";
const SETTINGS_TREE: &str = "settings";
const NOTIFICATION_KEY: &str = "notifications";

#[derive(Clone)]
pub struct SledWaferStore {
    db: sled::Db,
    wafers: sled::Tree,
    index: sled::Tree,
    settings: sled::Tree,
}

impl SledWaferStore {
    /// Open or create the store in `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let store = Self {
            wafers: db.open_tree(WAFERS_TREE)?,
            index: db.open_tree(INDEX_TREE)?,
            settings: db.open_tree(SETTINGS_TREE)?,
            db,
        };
        tracing::info!(path = %path.display(), records = store.wafers.len(), "Wafer store opened");
        Ok(store)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl WaferRepository for SledWaferStore {
    fn insert(&self, record: &WaferAnalysis) -> Result<(), StorageError> {
        let key = record_key(record);
        let value = serde_json::to_vec(record)?;
        let id = record.wafer_id.as_bytes();

        (&self.wafers, &self.index)
            .transaction(|(wafers, index)| {
                if let Some(old) = index.get(id)? {
                    wafers.remove(old)?;
                }
                wafers.insert(key.as_slice(), value.as_slice())?;
                index.insert(id, key.as_slice())?;
                Ok::<_, ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| StorageError::Database(format!("{e:?}")))?;

        tracing::debug!(wafer_id = %record.wafer_id, "Stored wafer record");
        Ok(())
    }

    fn get(&self, wafer_id: &str) -> Result<Option<WaferAnalysis>, StorageError> {
        let Some(key) = self.index.get(wafer_id.as_bytes())? else {
            return Ok(None);
        };
        match self.wafers.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn history(&self, filter: &HistoryFilter) -> Result<Vec<WaferAnalysis>, StorageError> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();

        // Newest first due to big-endian time keys
        for item in self.wafers.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            let record: WaferAnalysis = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Skipping undecodable wafer record: {}", e);
                    continue;
                }
            };
            if let Some(since) = filter.since {
                // Keys are time-ordered, nothing older can match
                if record.timestamp() < since {
                    break;
                }
            }
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.wafers.len())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.wafers.clear()?;
        self.index.clear()?;
        self.db.flush()?;
        Ok(())
    }

    fn load_notification_config(&self) -> Result<Option<NotificationConfig>, StorageError> {
        match self.settings.get(NOTIFICATION_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn save_notification_config(&self, config: &NotificationConfig) -> Result<(), StorageError> {
        self.settings.insert(NOTIFICATION_KEY, serde_json::to_vec(config)?)?;
        self.settings.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
