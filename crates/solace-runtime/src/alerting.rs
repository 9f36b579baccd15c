//! Operator alerts with per-key rate limiting.
//!
//! The same operational problem tends to fire on every request while it
//! lasts. [`AlertThrottle`] lets the first alert for a key through and
//! suppresses repeats for the rest of the window.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Default suppression window per key.
pub const DEFAULT_ALERT_WINDOW: Duration = Duration::from_secs(60);

/// Characters of the message used as key when none is given.
const DERIVED_KEY_LEN: usize = 40;

/// Prefix added to every operator message.
pub const ALERT_PREFIX: &str = "⚠️ Alert: ";

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert delivery failed for {failed} of {total} recipients")]
    Delivery { failed: usize, total: usize },

    #[error("alert sink not configured: {0}")]
    NotConfigured(String),
}

/// Destination for operator alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, message: &str) -> Result<(), AlertError>;

    fn name(&self) -> &str;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        tracing::warn!(alert = %message, "Operator alert");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Handed to the sink (delivery errors are only logged)
    Sent,
    /// Same key already alerted within the window
    Throttled,
}

pub struct AlertThrottle {
    window: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
    sink: Arc<dyn AlertSink>,
}

impl AlertThrottle {
    pub fn new(sink: Arc<dyn AlertSink>, window: Duration) -> Self {
        Self {
            window,
            last_sent: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check-and-record for `key`. Returns true when an alert may go out.
    pub fn should_send(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();

        if let Some(at) = last_sent.get(key) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        last_sent.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        last_sent.insert(key.to_string(), now);
        true
    }

    /// Deliver `message` unless `key` fired within the window.
    ///
    /// Without a key, the first 40 characters of the message are used.
    pub async fn notify(&self, key: Option<&str>, message: &str) -> AlertOutcome {
        let key = match key {
            Some(key) => key.to_string(),
            None => derive_key(message),
        };

        if !self.should_send(&key) {
            tracing::debug!(key = %key, "Alert throttled");
            return AlertOutcome::Throttled;
        }

        if let Err(err) = self.sink.deliver(message).await {
            tracing::warn!(key = %key, sink = self.sink.name(), error = %err, "Alert delivery failed");
        }
        AlertOutcome::Sent
    }
}

impl std::fmt::Debug for AlertThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertThrottle")
            .field("window", &self.window)
            .field("sink", &self.sink.name())
            .finish()
    }
}

fn derive_key(message: &str) -> String {
    let key: String = message.chars().take(DERIVED_KEY_LEN).collect();
    if key.trim().is_empty() {
        "generic".to_string()
    } else {
        key
    }
}

#[cfg(feature = "telegram")]
pub use telegram::TelegramAlertSink;

#[cfg(feature = "telegram")]
mod telegram {
    use super::{AlertError, AlertSink, ALERT_PREFIX};
    use crate::providers::ApiCredential;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::time::Duration;

    const API_BASE: &str = "https://api.telegram.org";

    /// Sends alerts to every admin chat through the Bot API.
    pub struct TelegramAlertSink {
        token: ApiCredential,
        admin_ids: Vec<i64>,
        base_url: String,
        client: reqwest::Client,
    }

    impl TelegramAlertSink {
        pub fn new(token: ApiCredential, admin_ids: Vec<i64>) -> Self {
            Self {
                token,
                admin_ids,
                base_url: API_BASE.to_string(),
                client: reqwest::Client::new(),
            }
        }

        async fn send_one(&self, chat_id: i64, text: &str) -> Result<(), String> {
            let response = self
                .client
                .post(format!("{}/bot{}/sendMessage", self.base_url, self.token.expose()))
                .timeout(Duration::from_secs(10))
                .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
                .send()
                .await
                // without_url keeps the bot token out of the error text
                .map_err(|e| e.without_url().to_string())?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("status {}", response.status()))
            }
        }
    }

    impl std::fmt::Debug for TelegramAlertSink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TelegramAlertSink")
                .field("token", &self.token)
                .field("admin_ids", &self.admin_ids)
                .finish()
        }
    }

    #[async_trait]
    impl AlertSink for TelegramAlertSink {
        async fn deliver(&self, message: &str) -> Result<(), AlertError> {
            if self.admin_ids.is_empty() {
                tracing::debug!("No admin ids configured, alert dropped");
                return Ok(());
            }

            let text = format!("{}{}", ALERT_PREFIX, message);
            let results = join_all(self.admin_ids.iter().map(|&id| self.send_one(id, &text))).await;

            let mut failed = 0;
            for (chat_id, result) in self.admin_ids.iter().zip(results) {
                if let Err(err) = result {
                    failed += 1;
                    tracing::warn!(chat_id, error = %err, "Failed to deliver alert to admin");
                }
            }

            if failed > 0 {
                return Err(AlertError::Delivery {
                    failed,
                    total: self.admin_ids.len(),
                });
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "telegram"
        }
    }
}
