//! Channel handler trait, send options, and the registry of running channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Event;
use crate::context::ConversationContext;
use crate::message::Envelope;
use crate::settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("origin not allowed: {origin:?}")]
    CorsRejected { origin: String },
    #[error("transport send failed: {0}")]
    TransportSend(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("subscriber session could not be persisted")]
    SessionNotPersisted,
    #[error("upload rejected: {0}")]
    Upload(String),
    #[error("inbound queue closed")]
    InboundClosed,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Typing indicator before a message: `true` derives the delay from the text length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Typing {
    Auto(bool),
    Millis(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<Typing>,
    /// Hand the conversation over to this agent after sending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<String>,
}

impl SendOptions {
    /// Typing delay for a message of `text_len` characters, if any.
    pub fn typing_delay_ms(&self, text_len: usize) -> Option<u64> {
        match self.typing? {
            Typing::Auto(false) | Typing::Millis(0) => None,
            Typing::Auto(true) => Some((text_len as u64 * 20).clamp(500, 3000)),
            Typing::Millis(ms) => Some(ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub mid: Option<String>,
}

/// A running channel: knows how to render and deliver envelopes to its subscribers.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Channel name (e.g. "web-channel").
    fn name(&self) -> &str;

    async fn send_message(
        &self,
        event: &Event,
        envelope: &Envelope,
        options: &SendOptions,
        context: &ConversationContext,
    ) -> Result<SendReceipt, ChannelError>;

    /// Stop the channel connector.
    fn stop(&self) {}
}

/// Running channels, keyed by [`ChannelHandler::name`]. At most one handler per name.
#[derive(Default)]
pub struct ChannelRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` under its own name; a handler already running under that name is stopped.
    pub async fn register(&self, handler: Arc<dyn ChannelHandler>) {
        let name = handler.name().to_string();
        let replaced = self.handlers.write().await.insert(name.clone(), handler);
        match replaced {
            Some(old) => {
                log::info!("channel {} restarted", name);
                old.stop();
            }
            None => log::info!("channel {} registered", name),
        }
    }

    /// Sorted channel names.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops and forgets every channel.
    pub async fn stop_all(&self) {
        let handlers: Vec<_> = self.handlers.write().await.drain().collect();
        for (name, handler) in handlers {
            log::debug!("stopping channel {}", name);
            handler.stop();
        }
    }
}
