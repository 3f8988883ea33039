//! Subscribers: the end users talking to the bot, one per (channel, foreign id).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::channels::ChannelData;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberChannel {
    pub name: String,
    #[serde(flatten)]
    pub data: ChannelData,
}

/// Per-subscriber variables that survive across conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberContext {
    #[serde(default)]
    pub vars: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub foreign_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub channel: SubscriberChannel,
    #[serde(default)]
    pub context: SubscriberContext,
    pub last_visit: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Profile fields supplied by a channel when a subscriber is first seen.
#[derive(Debug, Clone, Default)]
pub struct NewSubscriber {
    pub foreign_id: String,
    pub first_name: String,
    pub last_name: String,
    pub language: Option<String>,
    pub locale: Option<String>,
    pub channel: SubscriberChannel,
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find(&self, id: &str) -> Option<Subscriber>;
    async fn find_by_foreign_id(&self, channel: &str, foreign_id: &str) -> Option<Subscriber>;
    async fn create(&self, new: NewSubscriber) -> Subscriber;
    /// Refreshes `last_visit` and channel metadata; returns the updated record.
    async fn touch(&self, id: &str, data: ChannelData) -> Option<Subscriber>;
}

#[derive(Clone)]
pub struct InMemorySubscriberStore {
    inner: Arc<RwLock<HashMap<String, Subscriber>>>,
}

impl InMemorySubscriberStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for InMemorySubscriberStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriberStore for InMemorySubscriberStore {
    async fn find(&self, id: &str) -> Option<Subscriber> {
        self.inner.read().await.get(id).cloned()
    }

    async fn find_by_foreign_id(&self, channel: &str, foreign_id: &str) -> Option<Subscriber> {
        self.inner
            .read()
            .await
            .values()
            .find(|s| s.channel.name == channel && s.foreign_id == foreign_id)
            .cloned()
    }

    async fn create(&self, new: NewSubscriber) -> Subscriber {
        let now = Utc::now();
        let subscriber = Subscriber {
            id: uuid::Uuid::new_v4().to_string(),
            foreign_id: new.foreign_id,
            first_name: new.first_name,
            last_name: new.last_name,
            language: new.language,
            locale: new.locale,
            timezone: 0,
            country: None,
            labels: Vec::new(),
            channel: new.channel,
            context: SubscriberContext::default(),
            last_visit: now,
            created_at: now,
        };
        self.inner
            .write()
            .await
            .insert(subscriber.id.clone(), subscriber.clone());
        subscriber
    }

    async fn touch(&self, id: &str, data: ChannelData) -> Option<Subscriber> {
        let mut guard = self.inner.write().await;
        let subscriber = guard.get_mut(id)?;
        subscriber.last_visit = Utc::now();
        subscriber.channel.data = data;
        Some(subscriber.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_find_by_foreign_id() {
        let store = InMemorySubscriberStore::new();
        let created = store
            .create(NewSubscriber {
                foreign_id: "web-1".to_string(),
                first_name: "Anon.".to_string(),
                last_name: "Web User".to_string(),
                channel: SubscriberChannel {
                    name: "web-channel".to_string(),
                    data: ChannelData::default(),
                },
                ..Default::default()
            })
            .await;

        let found = store.find_by_foreign_id("web-channel", "web-1").await.unwrap();
        assert_eq!(found.id, created.id);
        assert!(store.find_by_foreign_id("console-channel", "web-1").await.is_none());
        assert_eq!(store.len().await, 1);
    }
}
