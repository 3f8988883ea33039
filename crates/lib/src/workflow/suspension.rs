//! Suspension records and the store of conversations waiting for a reply.
//!
//! When a message action suspends, the runner persists a [`PendingRun`] here. The next
//! inbound event of the same conversation takes it back out and resumes the flow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::context::StoredContext;
use crate::message::OutgoingFormat;

pub const AWAITING_USER_RESPONSE: &str = "awaiting_user_response";

/// What was sent and to whom, so a reply can be correlated on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionData {
    pub action: String,
    pub channel: String,
    pub recipient: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub format: OutgoingFormat,
    pub envelope: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub reason: String,
    pub data: SuspensionData,
}

impl SuspensionRecord {
    pub fn awaiting_user_response(data: SuspensionData) -> Self {
        Self {
            reason: AWAITING_USER_RESPONSE.to_string(),
            data,
        }
    }
}

/// A suspended flow: where it stopped and what it had accumulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRun {
    pub flow: String,
    /// Index of the step that suspended.
    pub step: usize,
    pub record: SuspensionRecord,
    #[serde(default)]
    pub context: StoredContext,
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// Pending runs by conversation id; optionally persisted to a JSON file.
pub struct SuspensionStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, PendingRun>>,
}

impl SuspensionStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load store from path; if file missing or invalid, starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("ignoring unreadable suspensions file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
        }
    }

    async fn save(&self, entries: &HashMap<String, PendingRun>) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await
    }

    pub async fn put(&self, conversation_id: &str, run: PendingRun) -> std::io::Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(conversation_id.to_string(), run);
        self.save(&entries).await
    }

    /// Removes and returns the pending run of a conversation.
    pub async fn take(&self, conversation_id: &str) -> std::io::Result<Option<PendingRun>> {
        let mut entries = self.entries.write().await;
        let run = entries.remove(conversation_id);
        if run.is_some() {
            self.save(&entries).await?;
        }
        Ok(run)
    }

    pub async fn get(&self, conversation_id: &str) -> Option<PendingRun> {
        self.entries.read().await.get(conversation_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> PendingRun {
        PendingRun {
            flow: "welcome".to_string(),
            step: 1,
            record: SuspensionRecord::awaiting_user_response(SuspensionData {
                action: "send_text_message".to_string(),
                channel: "web-channel".to_string(),
                recipient: "sub-1".to_string(),
                conversation_id: "web-channel:web-1".to_string(),
                message_id: Some("mid-1".to_string()),
                format: OutgoingFormat::Text,
                envelope: json!({"text": "hi"}),
            }),
            context: StoredContext::default(),
            outputs: Default::default(),
        }
    }

    #[test]
    fn record_serializes_camel_case() {
        let value = serde_json::to_value(&run().record).unwrap();
        assert_eq!(value["reason"], AWAITING_USER_RESPONSE);
        assert_eq!(value["data"]["conversationId"], "web-channel:web-1");
        assert_eq!(value["data"]["messageId"], "mid-1");
        assert_eq!(value["data"]["format"], "text");
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let path = std::env::temp_dir()
            .join(format!("parley-susp-{}", uuid::Uuid::new_v4()))
            .join("suspensions.json");
        let store = SuspensionStore::load(&path).await;
        store.put("web-channel:web-1", run()).await.unwrap();

        let reloaded = SuspensionStore::load(&path).await;
        assert_eq!(reloaded.get("web-channel:web-1").await, Some(run()));

        assert_eq!(reloaded.take("web-channel:web-1").await.unwrap(), Some(run()));
        let after_take = SuspensionStore::load(&path).await;
        assert_eq!(after_take.len().await, 0);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
