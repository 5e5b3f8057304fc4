//! Snatch and download notifications.
//!
//! Notifiers are fire-and-forget: [`NotificationDispatcher`] spawns each delivery and only
//! logs failures, so a broken notifier can never change the status of a wanted item.

use crate::config::{NotificationConfig, NotifyEvent, WebhookConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trigger contract for notifier integrations
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in log fields
    fn name(&self) -> &str;

    /// A download was handed to a backend
    async fn notify_snatch(&self, title: &str) -> Result<()>;

    /// A download was imported into the library
    async fn notify_download(&self, title: &str) -> Result<()>;
}

/// Body posted to a webhook
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// "snatch" or "download"
    pub event: String,
    /// Release or book title
    pub title: String,
    /// Unix timestamp of the event
    pub timestamp: i64,
}

/// POSTs a JSON payload to a configured URL
pub struct WebhookNotifier {
    config: WebhookConfig,
    http: reqwest::Client,
}

impl WebhookNotifier {
    /// Notifier for one webhook
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, event: NotifyEvent, title: &str) -> Result<()> {
        if !self.config.events.contains(&event) {
            return Ok(());
        }
        let payload = WebhookPayload {
            event: match event {
                NotifyEvent::Snatch => "snatch",
                NotifyEvent::Download => "download",
            }
            .to_string(),
            title: title.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        let mut request = self
            .http
            .post(&self.config.url)
            .json(&payload)
            .timeout(self.config.timeout);
        if let Some(auth) = &self.config.auth_header {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Other(format!(
                "Webhook returned status {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }
        tracing::debug!(url = %self.config.url, event = ?event, "webhook sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.config.url
    }

    async fn notify_snatch(&self, title: &str) -> Result<()> {
        self.post(NotifyEvent::Snatch, title).await
    }

    async fn notify_download(&self, title: &str) -> Result<()> {
        self.post(NotifyEvent::Download, title).await
    }
}

/// Fans a notification out to every notifier in the background
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    /// Dispatcher with no notifiers
    pub fn new() -> Self {
        Self::default()
    }

    /// One webhook notifier per configured webhook
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            notifiers: config
                .webhooks
                .iter()
                .cloned()
                .map(|w| Arc::new(WebhookNotifier::new(w)) as Arc<dyn Notifier>)
                .collect(),
        }
    }

    /// Add a notifier
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Number of notifiers
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Whether there are no notifiers
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Announce a snatch without waiting for delivery
    pub fn snatch(&self, title: &str) {
        self.spawn(NotifyEvent::Snatch, title);
    }

    /// Announce a processed download without waiting for delivery
    pub fn download(&self, title: &str) {
        self.spawn(NotifyEvent::Download, title);
    }

    fn spawn(&self, event: NotifyEvent, title: &str) {
        if self.notifiers.is_empty() {
            return;
        }
        let notifiers = self.notifiers.clone();
        let title = title.to_string();
        tokio::spawn(async move {
            for notifier in notifiers {
                let result = match event {
                    NotifyEvent::Snatch => notifier.notify_snatch(&title).await,
                    NotifyEvent::Download => notifier.notify_download(&title).await,
                };
                if let Err(e) = result {
                    tracing::warn!(
                        notifier = notifier.name(),
                        event = ?event,
                        error = %e,
                        "notification failed"
                    );
                }
            }
        });
    }
}
