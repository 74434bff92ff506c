//! Alert and digest notifications
//!
//! The trigger stage decides *that* an alert is due; this module decides
//! *how* it leaves the process:
//!
//! - [`NotificationConfig`]: process-wide settings, persisted in the store's
//!   settings tree and served live through an `ArcSwap`
//! - [`AlertTransport`]: delivery port with log and webhook implementations
//! - [`NotificationService`]: dispatches alerts off the pipeline's critical
//!   path, sends digests and test messages

mod service;
mod transport;

pub use service::{DigestSummary, NotificationService};
pub use transport::{transport_for, AlertTransport, LogTransport, WebhookTransport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::types::Severity;

// ============================================================================
// Configuration
// ============================================================================

/// Delivery transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Write notifications to the tracing log
    Log,
    /// POST notifications as JSON
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout() -> u64 {
    defaults::WEBHOOK_TIMEOUT_SECS
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Log
    }
}

/// Daily digest schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DigestSchedule {
    pub enabled: bool,
    /// UTC hour (0-23) at which the digest is sent
    pub hour_utc: u32,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            hour_utc: defaults::DIGEST_HOUR_UTC,
        }
    }
}

/// `[notifications]` section, also the body of the notification config API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Lowest severity that raises an alert on its own
    pub alert_severity: Severity,
    pub recipients: Vec<String>,
    pub transport: TransportConfig,
    pub digest: DigestSchedule,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alert_severity: Severity::Medium,
            recipients: Vec::new(),
            transport: TransportConfig::default(),
            digest: DigestSchedule::default(),
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), NotifyError> {
        let mut errors = Vec::new();
        if let TransportConfig::Webhook { url, timeout_secs } = &self.transport {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("transport.url '{url}' must be an http(s) URL"));
            }
            if *timeout_secs == 0 {
                errors.push("transport.timeout_secs must be > 0".to_string());
            }
        }
        if self.digest.hour_utc > 23 {
            errors.push(format!("digest.hour_utc = {} must be within 0-23", self.digest.hour_utc));
        }
        if self.recipients.iter().any(|r| r.trim().is_empty()) {
            errors.push("recipients must not contain empty entries".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ============================================================================
// Messages & Errors
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Digest,
    Test,
}

/// One outbound message, transport independent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub severity: Option<Severity>,
    pub wafer_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid notification config: {0}")]
    InvalidConfig(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
    #[error("failed to persist notification config: {0}")]
    Storage(String),
}
