//! Canonical inbound event, built by each channel from its raw payload.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ChannelHandler;
use crate::message::{
    AttachmentPayload, AttachmentRef, EventType, FileType, IncomingMessageType, Payload,
    StdIncomingMessage,
};
use crate::subscriber::Subscriber;

/// Transport metadata of the connection an event arrived on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    #[serde(default)]
    pub is_socket: bool,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub agent: String,
}

/// File bytes received inline that still have to be stored.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpload")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct Event {
    handler: Arc<dyn ChannelHandler>,
    id: Option<String>,
    event_type: EventType,
    message_type: IncomingMessageType,
    payload: Option<Payload>,
    message: Option<StdIncomingMessage>,
    sender: Option<Subscriber>,
    channel_data: ChannelData,
    delivered_messages: Vec<String>,
    watermark: f64,
    pending_upload: Option<PendingUpload>,
}

impl Event {
    pub fn new(
        handler: Arc<dyn ChannelHandler>,
        event_type: EventType,
        message_type: IncomingMessageType,
        channel_data: ChannelData,
    ) -> Self {
        Self {
            handler,
            id: None,
            event_type,
            message_type,
            payload: None,
            message: None,
            sender: None,
            channel_data,
            delivered_messages: Vec::new(),
            watermark: 0.0,
            pending_upload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_message(mut self, message: StdIncomingMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_sender(mut self, sender: Subscriber) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_delivered(mut self, mids: Vec<String>) -> Self {
        self.delivered_messages = mids;
        self
    }

    pub fn with_watermark(mut self, watermark: f64) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn with_pending_upload(mut self, upload: PendingUpload) -> Self {
        self.pending_upload = Some(upload);
        self
    }

    pub fn set_sender(&mut self, sender: Subscriber) {
        self.sender = Some(sender);
    }

    /// Attaches the stored location of a pending upload, making the event an ordinary
    /// attachment event.
    pub fn resolve_upload(mut self, stored: AttachmentRef) -> Self {
        let kind = self
            .pending_upload
            .take()
            .map(|u| FileType::from_mime(&u.mime))
            .unwrap_or_default();
        let attachment = AttachmentPayload {
            kind,
            payload: stored,
        };
        self.message_type = IncomingMessageType::Attachments;
        self.payload = Some(Payload::Attachments {
            attachments: attachment.clone(),
        });
        self.message = Some(StdIncomingMessage::attachment(attachment));
        self
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    /// Name of the channel the event arrived on.
    pub fn channel(&self) -> &str {
        self.handler.name()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn message_type(&self) -> IncomingMessageType {
        self.message_type
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn message(&self) -> Option<&StdIncomingMessage> {
        self.message.as_ref()
    }

    /// Plain text of the message, empty for non-message events.
    pub fn text(&self) -> &str {
        self.message.as_ref().map(|m| m.as_text()).unwrap_or("")
    }

    pub fn sender(&self) -> Option<&Subscriber> {
        self.sender.as_ref()
    }

    pub fn channel_data(&self) -> &ChannelData {
        &self.channel_data
    }

    pub fn delivered_messages(&self) -> &[String] {
        &self.delivered_messages
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    pub fn pending_upload(&self) -> Option<&PendingUpload> {
        self.pending_upload.as_ref()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "channel": self.channel(),
            "id": self.id,
            "eventType": self.event_type,
            "messageType": self.message_type,
            "payload": self.payload,
            "message": self.message,
            "sender": self.sender.as_ref().map(|s| &s.id),
            "channelData": self.channel_data,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("channel", &self.channel())
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("message_type", &self.message_type)
            .field("payload", &self.payload)
            .field("message", &self.message)
            .field("sender", &self.sender.as_ref().map(|s| &s.id))
            .field("pending_upload", &self.pending_upload)
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
