//! Notification system: fire-and-forget pushes to admins and employees.
//! Lightweight: no queues. Every notification is kept in a small in-memory
//! history and handed to each registered sink on a background task.

use arabica_core::{ArabicaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const HISTORY_LIMIT: usize = 100;

/// Who should receive a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "phone", rename_all = "lowercase")]
pub enum Recipient {
    /// Every admin.
    Admins,
    /// A single employee, by phone.
    Employee(String),
}

/// A notification to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    pub recipient: Recipient,
    /// Which engine/event produced this.
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Somewhere notifications can be delivered.
#[async_trait]
pub trait NotifySink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log and nothing else.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotifySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, n: &Notification) -> Result<()> {
        let emoji = match n.priority {
            NotifyPriority::Urgent => "🚨",
            NotifyPriority::High => "⚠️",
            NotifyPriority::Normal => "📢",
            NotifyPriority::Low => "ℹ️",
        };
        tracing::info!("{emoji} [{}] {}: {}", n.source, n.title, n.body);
        Ok(())
    }
}

/// Generic HTTP webhook: POST the notification as JSON.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotifySink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, n: &Notification) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(n)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ArabicaError::Delivery(format!("webhook send failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ArabicaError::Delivery(format!("webhook returned {}", resp.status())))
        }
    }
}

/// Notification router: records history and fans out to every sink.
pub struct NotifyRouter {
    sinks: Vec<Arc<dyn NotifySink>>,
    history: Mutex<VecDeque<Notification>>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Register a delivery sink.
    pub fn with_sink(mut self, sink: Arc<dyn NotifySink>) -> Self {
        tracing::debug!("Notification sink registered: {}", sink.name());
        self.sinks.push(sink);
        self
    }

    /// Record a notification and deliver it in the background. Never fails;
    /// delivery errors are logged.
    pub fn notify(&self, notification: Notification) {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }

        if self.sinks.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, notification '{}' not delivered", notification.title);
            return;
        };
        let sinks = self.sinks.clone();
        handle.spawn(async move {
            for sink in sinks {
                if let Err(e) = sink.send(&notification).await {
                    tracing::warn!("⚠️ Notification via {} failed: {e}", sink.name());
                }
            }
        });
    }

    /// Recent notifications, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Create a notification.
    pub fn create(
        title: &str,
        body: &str,
        source: &str,
        recipient: Recipient,
        priority: NotifyPriority,
    ) -> Notification {
        Notification {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            recipient,
            source: source.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}
