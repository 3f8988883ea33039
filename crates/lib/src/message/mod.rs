//! Canonical message model shared by every channel.
//!
//! Inbound interactions are normalized into [`StdIncomingMessage`] (plus an optional
//! [`Payload`]); outbound interactions are described by an [`Envelope`] that each
//! channel renders into its own wire format.

mod envelope;
mod template;

pub use envelope::{context_seed, select_candidate, EnvelopeFactory, TextInput};
pub use template::{render_template, to_handlebars};

use serde::{Deserialize, Serialize};

/// Payload used by the "View More" button appended to paginated lists.
pub const VIEW_MORE_PAYLOAD: &str = "VIEW_MORE";

/// Kind of event received from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Delivery,
    Read,
    Typing,
    Echo,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Delivery => "delivery",
            EventType::Read => "read",
            EventType::Typing => "typing",
            EventType::Echo => "echo",
            EventType::Unknown => "unknown",
        }
    }
}

/// Kind of message carried by a `message` event. Plain text is `Message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomingMessageType {
    Message,
    Postback,
    QuickReply,
    Location,
    Attachments,
    Unknown,
}

/// Coarse attachment type, derived from the mime type when uploading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Audio,
    File,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FileType {
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or("").trim();
        match top {
            "image" => FileType::Image,
            "video" => FileType::Video,
            "audio" => FileType::Audio,
            "" => FileType::Unknown,
            _ => FileType::File,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Audio => "audio",
            FileType::File => "file",
            FileType::Unknown => "unknown",
        }
    }
}

/// Discriminator used by location and attachment messages (`"type"` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    Location,
    Attachments,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Where an attachment's bytes live once stored (id) or can be fetched (url).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    #[serde(rename = "type")]
    pub kind: FileType,
    pub payload: AttachmentRef,
}

/// Payload of an inbound event: the postback value, the shared location, or the attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Postback { payload: String },
    Location { coordinates: Coordinates },
    Attachments { attachments: AttachmentPayload },
}

impl Payload {
    pub fn as_postback(&self) -> Option<&str> {
        match self {
            Payload::Postback { payload } => Some(payload),
            _ => None,
        }
    }
}

/// Inbound message in its canonical, storable shape.
///
/// Variant order matters for deserialization: the most specific shapes come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StdIncomingMessage {
    Location {
        #[serde(rename = "type")]
        kind: PayloadType,
        coordinates: Coordinates,
    },
    Attachment {
        #[serde(rename = "type")]
        kind: PayloadType,
        serialized_text: String,
        attachment: AttachmentPayload,
    },
    Postback {
        text: String,
        postback: String,
    },
    Text {
        text: String,
    },
}

impl StdIncomingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        StdIncomingMessage::Text { text: text.into() }
    }

    pub fn postback(text: impl Into<String>, postback: impl Into<String>) -> Self {
        StdIncomingMessage::Postback {
            text: text.into(),
            postback: postback.into(),
        }
    }

    pub fn location(coordinates: Coordinates) -> Self {
        StdIncomingMessage::Location {
            kind: PayloadType::Location,
            coordinates,
        }
    }

    pub fn attachment(attachment: AttachmentPayload) -> Self {
        let url = attachment.payload.url.clone().unwrap_or_default();
        StdIncomingMessage::Attachment {
            kind: PayloadType::Attachments,
            serialized_text: format!("attachment:{}:{}", attachment.kind.as_str(), url),
            attachment,
        }
    }

    /// Text view of the message: the typed text, or the serialized attachment text.
    pub fn as_text(&self) -> &str {
        match self {
            StdIncomingMessage::Text { text } | StdIncomingMessage::Postback { text, .. } => text,
            StdIncomingMessage::Attachment {
                serialized_text, ..
            } => serialized_text,
            StdIncomingMessage::Location { .. } => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickReplyType {
    #[default]
    Text,
    Location,
    UserPhoneNumber,
    UserEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    #[serde(default)]
    pub content_type: QuickReplyType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Button {
    Postback {
        title: String,
        payload: String,
    },
    WebUrl {
        title: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webview_height_ratio: Option<String>,
    },
}

impl Button {
    pub fn title(&self) -> &str {
        match self {
            Button::Postback { title, .. } | Button::WebUrl { title, .. } => title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickRepliesMessage {
    pub text: String,
    pub quick_replies: Vec<QuickReply>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonsMessage {
    pub text: String,
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMessage {
    pub attachment: AttachmentPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
}

/// Which element attributes feed the rendered card (title, subtitle, image, link, postback).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_payload: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentOptions {
    pub fields: ContentFields,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default = "default_content_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_element_style: Option<String>,
}

fn default_content_limit() -> usize {
    2
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn has_more(&self) -> bool {
        self.total > self.skip + self.limit
    }
}

/// A content item shown in a list or carousel; must carry at least `id` and `title`.
pub type ContentElement = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMessage {
    pub options: ContentOptions,
    pub elements: Vec<ContentElement>,
    pub pagination: Pagination,
}

/// Format discriminator of an [`Envelope`] (`"format"` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutgoingFormat {
    Text,
    QuickReplies,
    Buttons,
    Attachment,
    List,
    Carousel,
}

impl OutgoingFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutgoingFormat::Text => "text",
            OutgoingFormat::QuickReplies => "quickReplies",
            OutgoingFormat::Buttons => "buttons",
            OutgoingFormat::Attachment => "attachment",
            OutgoingFormat::List => "list",
            OutgoingFormat::Carousel => "carousel",
        }
    }
}

/// Canonical outgoing message: `{ "format": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "message", rename_all = "camelCase")]
pub enum Envelope {
    Text(TextMessage),
    QuickReplies(QuickRepliesMessage),
    Buttons(ButtonsMessage),
    Attachment(AttachmentMessage),
    List(ListMessage),
    Carousel(ListMessage),
}

impl Envelope {
    pub fn format(&self) -> OutgoingFormat {
        match self {
            Envelope::Text(_) => OutgoingFormat::Text,
            Envelope::QuickReplies(_) => OutgoingFormat::QuickReplies,
            Envelope::Buttons(_) => OutgoingFormat::Buttons,
            Envelope::Attachment(_) => OutgoingFormat::Attachment,
            Envelope::List(_) => OutgoingFormat::List,
            Envelope::Carousel(_) => OutgoingFormat::Carousel,
        }
    }

    /// The format-specific body, as stored with sent messages and suspension records.
    pub fn message_value(&self) -> serde_json::Value {
        let value = match self {
            Envelope::Text(m) => serde_json::to_value(m),
            Envelope::QuickReplies(m) => serde_json::to_value(m),
            Envelope::Buttons(m) => serde_json::to_value(m),
            Envelope::Attachment(m) => serde_json::to_value(m),
            Envelope::List(m) | Envelope::Carousel(m) => serde_json::to_value(m),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Record of a message the bot sent, handed to persistence through `hook:chatbot:sent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub mid: String,
    pub message: serde_json::Value,
    pub recipient: String,
    pub handover: bool,
    pub read: bool,
    pub delivery: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_serializes_with_format_and_message() {
        let envelope = Envelope::QuickReplies(QuickRepliesMessage {
            text: "Pick one".to_string(),
            quick_replies: vec![QuickReply {
                content_type: QuickReplyType::Text,
                title: "Yes".to_string(),
                payload: "YES".to_string(),
            }],
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["format"], "quickReplies");
        assert_eq!(value["message"]["quickReplies"][0]["payload"], "YES");
        assert_eq!(envelope.format().as_str(), "quickReplies");
        assert_eq!(envelope.message_value()["text"], "Pick one");
    }

    #[test]
    fn incoming_message_shapes_deserialize_to_the_right_variant() {
        let postback: StdIncomingMessage =
            serde_json::from_value(json!({"text": "Yes", "postback": "YES"})).unwrap();
        assert_eq!(postback, StdIncomingMessage::postback("Yes", "YES"));

        let location: StdIncomingMessage = serde_json::from_value(
            json!({"type": "location", "coordinates": {"lat": 1.5, "lon": 2.5}}),
        )
        .unwrap();
        assert_eq!(
            location,
            StdIncomingMessage::location(Coordinates { lat: 1.5, lon: 2.5 })
        );

        let text: StdIncomingMessage = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(text.as_text(), "hi");
    }

    #[test]
    fn attachment_message_serializes_text_view() {
        let message = StdIncomingMessage::attachment(AttachmentPayload {
            kind: FileType::Image,
            payload: AttachmentRef {
                id: None,
                url: Some("https://cdn/x.png".to_string()),
            },
        });
        assert_eq!(message.as_text(), "attachment:image:https://cdn/x.png");
    }

    #[test]
    fn file_type_from_mime() {
        assert_eq!(FileType::from_mime("image/png"), FileType::Image);
        assert_eq!(FileType::from_mime("application/pdf"), FileType::File);
        assert_eq!(FileType::from_mime(""), FileType::Unknown);
    }

    #[test]
    fn unknown_file_type_falls_back() {
        let kind: FileType = serde_json::from_value(json!("hologram")).unwrap();
        assert_eq!(kind, FileType::Unknown);
    }
}
