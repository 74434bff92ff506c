//! Notification service: live config, alert dispatch, digests, test delivery

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{transport_for, AlertTransport, Notification, NotificationConfig, NotificationKind, NotifyError};
use crate::storage::WaferRepository;
use crate::types::{AlertDraft, DefectPattern, ToolDefectRate};

/// Config plus the transport built from it, swapped atomically together.
struct Active {
    config: NotificationConfig,
    transport: Arc<dyn AlertTransport>,
}

pub struct NotificationService {
    active: ArcSwap<Active>,
    store: Arc<dyn WaferRepository>,
}

impl NotificationService {
    /// Start from `config`, building its transport.
    pub fn new(config: NotificationConfig, store: Arc<dyn WaferRepository>) -> Result<Self, NotifyError> {
        config.validate()?;
        let transport = transport_for(&config.transport)?;
        Ok(Self::with_transport(config, store, transport))
    }

    /// Start from `config` with an explicit transport.
    pub fn with_transport(
        config: NotificationConfig,
        store: Arc<dyn WaferRepository>,
        transport: Arc<dyn AlertTransport>,
    ) -> Self {
        Self {
            active: ArcSwap::from_pointee(Active { config, transport }),
            store,
        }
    }

    /// Persisted settings win over the file config they were derived from.
    pub fn load(file_config: NotificationConfig, store: Arc<dyn WaferRepository>) -> Result<Self, NotifyError> {
        let config = match store.load_notification_config() {
            Ok(Some(saved)) => {
                info!("Using persisted notification config");
                saved
            }
            Ok(None) => file_config,
            Err(e) => {
                warn!("Could not read persisted notification config, using file config: {}", e);
                file_config
            }
        };
        Self::new(config, store)
    }

    /// Current config snapshot.
    pub fn config(&self) -> NotificationConfig {
        self.active.load().config.clone()
    }

    /// Validate, persist, then swap in a new config.
    pub fn update(&self, config: NotificationConfig) -> Result<NotificationConfig, NotifyError> {
        config.validate()?;
        let transport = transport_for(&config.transport)?;
        self.store
            .save_notification_config(&config)
            .map_err(|e| NotifyError::Storage(e.to_string()))?;
        info!(
            enabled = config.enabled,
            transport = transport.name(),
            threshold = %config.alert_severity,
            recipients = config.recipients.len(),
            "Notification config updated"
        );
        self.active.store(Arc::new(Active {
            config: config.clone(),
            transport,
        }));
        Ok(config)
    }

    /// Send an alert in the background. `None` when notifications are disabled.
    pub fn dispatch_alert(&self, wafer_id: &str, draft: &AlertDraft) -> Option<JoinHandle<()>> {
        let active = self.active.load_full();
        if !active.config.enabled {
            return None;
        }
        let notification = Notification {
            kind: NotificationKind::Alert,
            subject: draft.subject.clone(),
            body: draft.body.clone(),
            recipients: draft.recipients.clone(),
            severity: Some(draft.severity),
            wafer_id: Some(wafer_id.to_string()),
            sent_at: Utc::now(),
        };
        Some(tokio::spawn(async move {
            if let Err(e) = active.transport.send(&notification).await {
                warn!(
                    wafer_id = notification.wafer_id.as_deref().unwrap_or("-"),
                    transport = active.transport.name(),
                    "Alert delivery failed: {}",
                    e
                );
            }
        }))
    }

    /// Send a canned message through the supplied config's transport, or the
    /// current one. Never persists anything.
    pub async fn send_test(&self, config: Option<NotificationConfig>) -> Result<Notification, NotifyError> {
        let (recipients, transport) = match config {
            Some(cfg) => {
                cfg.validate()?;
                (cfg.recipients.clone(), transport_for(&cfg.transport)?)
            }
            None => {
                let active = self.active.load();
                (active.config.recipients.clone(), active.transport.clone())
            }
        };
        let notification = Notification {
            kind: NotificationKind::Test,
            subject: "[TEST] Wafer inspection notification".to_string(),
            body: "Test delivery from the wafer inspection service. No action required.".to_string(),
            recipients,
            severity: None,
            wafer_id: None,
            sent_at: Utc::now(),
        };
        transport.send(&notification).await?;
        info!(transport = transport.name(), "Test notification delivered");
        Ok(notification)
    }

    /// Send a daily digest through the current transport.
    pub async fn send_digest(&self, summary: &DigestSummary) -> Result<(), NotifyError> {
        let active = self.active.load_full();
        let notification = Notification {
            kind: NotificationKind::Digest,
            subject: format!("Daily Fab Report - {}", summary.date),
            body: summary.render(),
            recipients: active.config.recipients.clone(),
            severity: None,
            wafer_id: None,
            sent_at: Utc::now(),
        };
        active.transport.send(&notification).await
    }
}

// ============================================================================
// Digest
// ============================================================================

/// Aggregate for the daily digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestSummary {
    pub date: NaiveDate,
    pub total_wafers: usize,
    pub defective_wafers: usize,
    pub yield_rate: f64,
    pub top_pattern: Option<(DefectPattern, usize)>,
    /// Highest defect rate first
    pub tools: Vec<ToolDefectRate>,
}

impl DigestSummary {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Yield rate: {:.1}%", self.yield_rate),
            format!("Processed: {} wafers | Defective: {}", self.total_wafers, self.defective_wafers),
        ];
        if let Some((pattern, count)) = self.top_pattern {
            lines.push(format!("Top defect pattern: {pattern} ({count})"));
        }
        if let Some(worst) = self.tools.first() {
            lines.push(format!("Worst tool: {} ({:.1}% defect rate)", worst.tool_id, worst.defect_rate));
        }
        if !self.tools.is_empty() {
            lines.push("Tool summary:".to_string());
            for t in self.tools.iter().take(5) {
                lines.push(format!("  {}: {} wafers, {:.1}% defect rate", t.tool_id, t.total, t.defect_rate));
            }
        }
        lines.join("\n")
    }
}
