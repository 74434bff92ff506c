//! In-memory wafer store for testing and minimal deployments
//!
//! Thread-safe via `RwLock`. Not durable: data is lost on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{record_key, HistoryFilter, StorageError, WaferRepository};
use crate::notify::NotificationConfig;
use crate::types::WaferAnalysis;

#[derive(Default)]
struct Tables {
    wafers: BTreeMap<Vec<u8>, WaferAnalysis>,
    index: HashMap<String, Vec<u8>>,
    notifications: Option<NotificationConfig>,
}

#[derive(Default)]
pub struct InMemoryWaferStore {
    tables: RwLock<Tables>,
}

impl InMemoryWaferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Poisoned(e.to_string())
}

impl WaferRepository for InMemoryWaferStore {
    fn insert(&self, record: &WaferAnalysis) -> Result<(), StorageError> {
        let key = record_key(record);
        let mut t = self.tables.write().map_err(poisoned)?;
        if let Some(old) = t.index.insert(record.wafer_id.clone(), key.clone()) {
            t.wafers.remove(&old);
        }
        t.wafers.insert(key, record.clone());
        Ok(())
    }

    fn get(&self, wafer_id: &str) -> Result<Option<WaferAnalysis>, StorageError> {
        let t = self.tables.read().map_err(poisoned)?;
        Ok(t.index.get(wafer_id).and_then(|k| t.wafers.get(k)).cloned())
    }

    fn history(&self, filter: &HistoryFilter) -> Result<Vec<WaferAnalysis>, StorageError> {
        let t = self.tables.read().map_err(poisoned)?;
        Ok(t.wafers
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize, StorageError> {
        Ok(self.tables.read().map_err(poisoned)?.wafers.len())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut t = self.tables.write().map_err(poisoned)?;
        t.wafers.clear();
        t.index.clear();
        Ok(())
    }

    fn load_notification_config(&self) -> Result<Option<NotificationConfig>, StorageError> {
        Ok(self.tables.read().map_err(poisoned)?.notifications.clone())
    }

    fn save_notification_config(&self, config: &NotificationConfig) -> Result<(), StorageError> {
        self.tables.write().map_err(poisoned)?.notifications = Some(config.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
