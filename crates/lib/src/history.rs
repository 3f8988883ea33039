//! Bounded in-memory log of exchanged messages, fed by the bus.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::bus::{BusEvent, BusListener};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    /// Subscriber id for inbound messages; `None` when the bot sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub message: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LoggedMessage {
    fn involves(&self, subscriber_id: &str) -> bool {
        self.sender.as_deref() == Some(subscriber_id)
            || self.recipient.as_deref() == Some(subscriber_id)
    }
}

pub struct MessageLog {
    inner: RwLock<VecDeque<LoggedMessage>>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub async fn push(&self, entry: LoggedMessage) {
        let mut g = self.inner.write().await;
        if g.len() == self.capacity {
            g.pop_front();
        }
        g.push_back(entry);
    }

    /// Most recent `limit` messages of one subscriber, oldest first.
    pub async fn history(&self, subscriber_id: &str, limit: usize) -> Vec<LoggedMessage> {
        let g = self.inner.read().await;
        let mut recent: Vec<LoggedMessage> = g
            .iter()
            .rev()
            .filter(|m| m.involves(subscriber_id))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl BusListener for MessageLog {
    async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::ChatbotSent { message, .. } => {
                self.push(LoggedMessage {
                    mid: Some(message.mid.clone()).filter(|m| !m.is_empty()),
                    sender: None,
                    recipient: Some(message.recipient.clone()),
                    message: message.message.clone(),
                    created_at: Utc::now(),
                })
                .await;
            }
            BusEvent::ChatbotReceived { event } => {
                let Some(sender) = event.sender() else {
                    return Ok(());
                };
                self.push(LoggedMessage {
                    mid: event.id().map(str::to_string),
                    sender: Some(sender.id.clone()),
                    recipient: None,
                    message: serde_json::to_value(event.message())?,
                    created_at: Utc::now(),
                })
                .await;
            }
            _ => {}
        }
        Ok(())
    }
}
