//! Delivery transports

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Notification, NotifyError, TransportConfig};

/// Port for sending a notification somewhere outside the process.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        match n.severity {
            Some(severity) => warn!(
                kind = ?n.kind,
                severity = %severity,
                wafer_id = n.wafer_id.as_deref().unwrap_or("-"),
                recipients = ?n.recipients,
                subject = %n.subject,
                "NOTIFICATION\n{}",
                n.body
            ),
            None => info!(kind = ?n.kind, recipients = ?n.recipients, subject = %n.subject, "NOTIFICATION\n{}", n.body),
        }
        Ok(())
    }
}

/// POSTs notifications as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    http: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let resp = self.http.post(&self.url).json(notification).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(resp.status().as_u16()))
        }
    }
}

/// Build the transport described by `config`.
pub fn transport_for(config: &TransportConfig) -> Result<Arc<dyn AlertTransport>, NotifyError> {
    Ok(match config {
        TransportConfig::Log => Arc::new(LogTransport),
        TransportConfig::Webhook { url, timeout_secs } => {
            Arc::new(WebhookTransport::new(url, Duration::from_secs(*timeout_secs))?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::Mutex;

    fn message() -> Notification {
        Notification {
            kind: NotificationKind::Test,
            subject: "hello".into(),
            body: "body".into(),
            recipients: vec![],
            severity: None,
            wafer_id: None,
            sent_at: chrono::Utc::now(),
        }
    }

    /// Local webhook receiver returning `status`, recording request bodies.
    async fn receiver(status: StatusCode) -> (String, Arc<Mutex<Vec<Notification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(seen): State<Arc<Mutex<Vec<Notification>>>>, Json(n): Json<Notification>| async move {
                        seen.lock().unwrap().push(n);
                        status
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), seen)
    }

    #[test]
    fn test_log_transport_always_succeeds() {
        tokio_test::assert_ok!(tokio_test::block_on(LogTransport.send(&message())));
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let (url, seen) = receiver(StatusCode::OK).await;
        let transport = transport_for(&TransportConfig::Webhook { url, timeout_secs: 5 }).unwrap();
        assert_eq!(transport.name(), "webhook");
        transport.send(&message()).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject, "hello");
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let (url, _) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let transport = WebhookTransport::new(&url, Duration::from_secs(5)).unwrap();
        let err = transport.send(&message()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(500)));
    }
}
