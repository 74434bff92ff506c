//! Daily digest job
//!
//! Ticks every minute. During the configured UTC hour it sends one digest per
//! day covering the previous 24 hours. Settings are read live from the
//! notifier on every tick, so config updates apply without a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::DIGEST_TICK_SECS;
use crate::notify::{DigestSummary, NotificationService};
use crate::rca::{pattern_distribution, tool_defect_rates};
use crate::storage::{HistoryFilter, WaferRepository};
use crate::types::WaferAnalysis;

/// Aggregate `records` into a digest dated `date`.
pub fn build_digest(records: &[WaferAnalysis], date: NaiveDate) -> DigestSummary {
    let total = records.len();
    let defective = records.iter().filter(|r| r.is_defective()).count();
    DigestSummary {
        date,
        total_wafers: total,
        defective_wafers: defective,
        yield_rate: if total == 0 {
            0.0
        } else {
            (total - defective) as f64 / total as f64 * 100.0
        },
        top_pattern: pattern_distribution(records).into_iter().next(),
        tools: tool_defect_rates(records),
    }
}

pub struct DigestJob {
    notifier: Arc<NotificationService>,
    store: Arc<dyn WaferRepository>,
    tick: Duration,
    last_sent: Option<NaiveDate>,
}

impl DigestJob {
    pub fn new(notifier: Arc<NotificationService>, store: Arc<dyn WaferRepository>) -> Self {
        Self {
            notifier,
            store,
            tick: Duration::from_secs(DIGEST_TICK_SECS),
            last_sent: None,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(tick_secs = self.tick.as_secs(), "Digest job started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Digest job stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_at(Utc::now()).await;
                }
            }
        }
    }

    /// Evaluate one tick at `now`. Returns the digest when one was sent.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Option<DigestSummary> {
        let config = self.notifier.config();
        if !config.enabled || !config.digest.enabled {
            return None;
        }
        let today = now.date_naive();
        if now.hour() != config.digest.hour_utc || self.last_sent == Some(today) {
            return None;
        }

        let records = match self.store.history(&HistoryFilter::since(now - chrono::Duration::hours(24))) {
            Ok(records) => records,
            Err(e) => {
                warn!("Digest skipped, history unavailable: {}", e);
                return None;
            }
        };
        let summary = build_digest(&records, today);

        match self.notifier.send_digest(&summary).await {
            Ok(()) => {
                self.last_sent = Some(today);
                info!(
                    date = %today,
                    wafers = summary.total_wafers,
                    yield_rate = summary.yield_rate,
                    "Daily digest sent"
                );
                Some(summary)
            }
            Err(e) => {
                // Retried on the next tick within the hour
                warn!(date = %today, "Daily digest delivery failed: {}", e);
                None
            }
        }
    }
}
