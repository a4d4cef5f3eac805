//! Reply delivery channels

use crate::runtime::Notifier;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Keeps every sent reply in memory, per chat
///
/// Stand-in for a real messenger during development; the outbox can be read
/// back over the API.
#[derive(Default)]
pub struct OutboxNotifier {
    sent: Mutex<HashMap<i64, Vec<String>>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies sent to a chat, oldest first
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), String> {
        tracing::info!(chat_id, text, "Outbox send");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chat_id)
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    chat_id: i64,
    text: &'a str,
}

/// POSTs each reply as JSON to a messenger bridge
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), String> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { chat_id, text })
            .send()
            .await
            .map_err(|e| format!("Webhook request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Webhook returned {status}: {body}"));
        }

        tracing::debug!(chat_id, "Delivered reply via webhook");
        Ok(())
    }
}
