//! Wire types of the web widget channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WebChannelConfig;
use crate::message::{Button, FileType, QuickReply};

/// `web_channel` settings group, as read from the settings tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebChannelSettings {
    pub allowed_domains: String,
    pub allowed_upload_types: String,
    pub allowed_upload_size: u64,
    pub greeting_message: String,
    pub window_title: String,
    pub show_emoji: bool,
    pub show_file: bool,
    pub show_location: bool,
}

impl Default for WebChannelSettings {
    fn default() -> Self {
        let c = WebChannelConfig::default();
        Self {
            allowed_domains: c.allowed_domains,
            allowed_upload_types: c.allowed_upload_types,
            allowed_upload_size: c.allowed_upload_size,
            greeting_message: c.greeting_message,
            window_title: c.window_title,
            show_emoji: c.show_emoji,
            show_file: c.show_file,
            show_location: c.show_location,
        }
    }
}

/// Query string of `GET /webhook/web`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebQuery {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, rename = "_get")]
    pub get: Option<String>,
    #[serde(default, rename = "_disconnect")]
    pub disconnect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadData {
    pub text: String,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub coordinates: LatLng,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    /// Mime type of the file.
    #[serde(rename = "type", default)]
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub name: String,
    /// Base64 file content, for uploads sent inline. Never echoed back.
    #[serde(default, skip_serializing)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebIncomingBody {
    Text {
        data: TextData,
    },
    QuickReply {
        data: PayloadData,
    },
    Postback {
        data: PayloadData,
    },
    Location {
        data: LocationData,
    },
    File {
        data: FileData,
    },
    Delivery {
        #[serde(default)]
        mids: Vec<String>,
    },
    Read {
        watermark: f64,
    },
    Typing,
}

/// Raw event posted by the widget (HTTP body or socket frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebEvent {
    #[serde(flatten)]
    pub body: WebIncomingBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Set when the message was already delivered to another device of the same user.
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DefaultAction {
    WebUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webview_height_ratio: Option<String>,
    },
}

/// A card in a list or carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebElement {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<DefaultAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WebOutgoingBody {
    Text {
        text: String,
    },
    QuickReplies {
        text: String,
        quick_replies: Vec<QuickReply>,
    },
    Buttons {
        text: String,
        buttons: Vec<Button>,
    },
    File {
        #[serde(rename = "type")]
        kind: FileType,
        url: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<QuickReply>,
    },
    List {
        elements: Vec<WebElement>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buttons: Vec<Button>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_element_style: Option<String>,
    },
    Carousel {
        elements: Vec<WebElement>,
    },
}

impl WebOutgoingBody {
    /// Length of the visible text, used for the typing delay.
    pub fn text_len(&self) -> usize {
        match self {
            WebOutgoingBody::Text { text }
            | WebOutgoingBody::QuickReplies { text, .. }
            | WebOutgoingBody::Buttons { text, .. } => text.chars().count(),
            _ => 0,
        }
    }
}

/// Message delivered to the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebOutgoingMessage {
    #[serde(flatten)]
    pub body: WebOutgoingBody,
    pub mid: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub handover: bool,
}

/// Frame pushed to socket subscribers: `{"type":"event","event":...,"payload":...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFrame {
    #[serde(rename = "type")]
    pub typ: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl WebFrame {
    pub fn event(event: &str, payload: serde_json::Value) -> Self {
        Self {
            typ: "event".to_string(),
            event: event.to_string(),
            payload,
        }
    }
}
