//! Wafer history storage
//!
//! Every completed pipeline run appends one [`WaferAnalysis`] record. Lot,
//! SPC, RCA and copilot queries read the same store; they tolerate reads
//! that miss a write still in flight.
//!
//! Backends implement [`WaferRepository`]:
//! - `SledWaferStore`: durable store under the data directory
//! - `InMemoryWaferStore`: tests and minimal deployments

pub mod lockfile;
mod memory;
mod sled_store;

pub use lockfile::ProcessLock;
pub use memory::InMemoryWaferStore;
pub use sled_store::SledWaferStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::NotificationConfig;
use crate::types::WaferAnalysis;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// History query. All filters are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Maximum records returned, newest first. `None` is unbounded.
    pub limit: Option<usize>,
    pub tool_id: Option<String>,
    pub chamber_id: Option<String>,
    pub lot_id: Option<String>,
    /// Inclusive lower bound on the record timestamp
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the record timestamp
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Self::default()
        }
    }

    /// True if `record` passes every field filter. Time bounds included.
    pub fn matches(&self, record: &WaferAnalysis) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            filter.as_ref().map_or(true, |f| value.as_deref() == Some(f.as_str()))
        }
        let ts = record.timestamp();
        eq(&self.tool_id, &record.tool_id)
            && eq(&self.chamber_id, &record.chamber_id)
            && eq(&self.lot_id, &record.lot_id)
            && self.since.map_or(true, |s| ts >= s)
            && self.until.map_or(true, |u| ts <= u)
    }
}

/// Trait for pluggable wafer record storage
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks. Writes are serialized per record; no cross-record
/// transaction is offered.
pub trait WaferRepository: Send + Sync {
    /// Append a record. A record with the same wafer id is replaced.
    fn insert(&self, record: &WaferAnalysis) -> Result<(), StorageError>;

    fn get(&self, wafer_id: &str) -> Result<Option<WaferAnalysis>, StorageError>;

    /// Records matching `filter`, newest first.
    fn history(&self, filter: &HistoryFilter) -> Result<Vec<WaferAnalysis>, StorageError>;

    fn count(&self) -> Result<usize, StorageError>;

    /// Delete every wafer record. Settings are kept.
    fn clear(&self) -> Result<(), StorageError>;

    fn load_notification_config(&self) -> Result<Option<NotificationConfig>, StorageError>;

    fn save_notification_config(&self, config: &NotificationConfig) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Sort key shared by the backends: event time, then wafer id.
pub(crate) fn record_key(record: &WaferAnalysis) -> Vec<u8> {
    let nanos = record
        .timestamp()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| record.timestamp().timestamp().saturating_mul(1_000_000_000))
        .max(0) as u64;
    let mut key = nanos.to_be_bytes().to_vec();
    key.extend_from_slice(record.wafer_id.as_bytes());
    key
}

#[cfg(test)]
pub(crate) mod testing {
    //! Record builders shared by storage and analytics tests.

    use chrono::{DateTime, Utc};

    use crate::types::{DefectPattern, Severity, StageDetails, Verdict, WaferAnalysis};

    pub fn record(
        id: &str,
        at: DateTime<Utc>,
        tool: Option<&str>,
        pattern: DefectPattern,
        verdict: Verdict,
    ) -> WaferAnalysis {
        WaferAnalysis {
            wafer_id: id.to_string(),
            file_name: format!("{id}.npy"),
            lot_id: None,
            tool_id: tool.map(str::to_string),
            chamber_id: None,
            processed_at: Some(at),
            analyzed_at: at,
            agents: vec![],
            selected_agent: None,
            pattern,
            confidence: 0.9,
            verdict,
            severity: if verdict.is_fail() { Severity::Medium } else { Severity::None },
            probabilities: None,
            explanation: String::new(),
            stages: StageDetails::default(),
            failure: None,
        }
    }

    pub fn fail(id: &str, at: DateTime<Utc>, tool: &str, pattern: DefectPattern) -> WaferAnalysis {
        record(id, at, Some(tool), pattern, Verdict::Fail)
    }

    pub fn pass(id: &str, at: DateTime<Utc>, tool: &str) -> WaferAnalysis {
        record(id, at, Some(tool), DefectPattern::NoDefect, Verdict::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::DefectPattern;
    use chrono::Duration;

    /// Behaviour every backend must share.
    pub(crate) fn exercise_repository(repo: &dyn WaferRepository) {
        let now = Utc::now();
        repo.insert(&fail("w1", now - Duration::hours(3), "TOOL-1", DefectPattern::Scratch)).unwrap();
        repo.insert(&pass("w2", now - Duration::hours(2), "TOOL-2")).unwrap();
        repo.insert(&fail("w3", now - Duration::hours(1), "TOOL-1", DefectPattern::Center)).unwrap();
        assert_eq!(repo.count().unwrap(), 3);

        let all = repo.history(&HistoryFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.wafer_id.as_str()).collect();
        assert_eq!(ids, vec!["w3", "w2", "w1"]);

        let limited = repo.history(&HistoryFilter::recent(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].wafer_id, "w3");

        let tool1 = repo
            .history(&HistoryFilter {
                tool_id: Some("TOOL-1".into()),
                ..HistoryFilter::default()
            })
            .unwrap();
        assert_eq!(tool1.len(), 2);

        let windowed = repo
            .history(&HistoryFilter {
                since: Some(now - Duration::minutes(150)),
                until: Some(now - Duration::minutes(90)),
                ..HistoryFilter::default()
            })
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].wafer_id, "w2");

        assert_eq!(repo.get("w1").unwrap().unwrap().pattern, DefectPattern::Scratch);
        assert!(repo.get("missing").unwrap().is_none());

        // Same id replaces, does not duplicate
        repo.insert(&fail("w1", now - Duration::hours(3), "TOOL-1", DefectPattern::Donut)).unwrap();
        assert_eq!(repo.count().unwrap(), 3);
        assert_eq!(repo.get("w1").unwrap().unwrap().pattern, DefectPattern::Donut);

        assert!(repo.load_notification_config().unwrap().is_none());
        let cfg = NotificationConfig {
            enabled: true,
            ..NotificationConfig::default()
        };
        repo.save_notification_config(&cfg).unwrap();
        assert_eq!(repo.load_notification_config().unwrap(), Some(cfg));

        repo.clear().unwrap();
        assert_eq!(repo.count().unwrap(), 0);
        assert!(repo.load_notification_config().unwrap().is_some());
    }

    #[test]
    fn test_in_memory_repository() {
        exercise_repository(&InMemoryWaferStore::new());
    }

    #[test]
    fn test_sled_repository() {
        let dir = tempfile::tempdir().unwrap();
        exercise_repository(&SledWaferStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledWaferStore::open(dir.path()).unwrap();
            store.insert(&pass("w1", Utc::now(), "TOOL-1")).unwrap();
            store.flush().unwrap();
        }
        let store = SledWaferStore::open(dir.path()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_record_key_orders_by_time() {
        let now = Utc::now();
        let older = record_key(&pass("zzz", now - Duration::seconds(1), "T"));
        let newer = record_key(&pass("aaa", now, "T"));
        assert!(older < newer);
    }
}
