//! Console channel: a single local subscriber chatting through stdin/stdout.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    ChannelData, ChannelError, ChannelHandler, EnvelopeRenderer, Event, SendOptions, SendReceipt,
};
use crate::context::ConversationContext;
use crate::message::{
    AttachmentMessage, AttachmentPayload, AttachmentRef, Button, ButtonsMessage, Coordinates,
    Envelope, EventType, FileType, IncomingMessageType, ListMessage, Payload,
    QuickRepliesMessage, StdIncomingMessage, TextMessage,
};
use crate::subscriber::{NewSubscriber, Subscriber, SubscriberChannel, SubscriberStore};

pub const CONSOLE_CHANNEL_NAME: &str = "console-channel";
const CONSOLE_FOREIGN_ID: &str = "console-local";

fn mime_from_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Renders envelopes as plain text lines and writes them to `out`.
pub struct ConsoleChannel {
    out: mpsc::UnboundedSender<String>,
}

impl ConsoleChannel {
    pub fn new(out: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self { out })
    }

    /// The local console subscriber, created on first use.
    pub async fn get_or_create_session(
        &self,
        subscribers: &dyn SubscriberStore,
    ) -> Result<Subscriber, ChannelError> {
        if let Some(existing) = subscribers
            .find_by_foreign_id(CONSOLE_CHANNEL_NAME, CONSOLE_FOREIGN_ID)
            .await
        {
            return Ok(existing);
        }
        let user = std::env::var("USER").unwrap_or_else(|_| "Console".to_string());
        let created = subscribers
            .create(NewSubscriber {
                foreign_id: CONSOLE_FOREIGN_ID.to_string(),
                first_name: user,
                last_name: "User".to_string(),
                channel: SubscriberChannel {
                    name: CONSOLE_CHANNEL_NAME.to_string(),
                    data: ChannelData {
                        agent: "console".to_string(),
                        ..Default::default()
                    },
                },
                ..Default::default()
            })
            .await;
        subscribers
            .find(&created.id)
            .await
            .ok_or(ChannelError::SessionNotPersisted)
    }

    /// Turns one input line into an event. Blank lines yield `None`.
    ///
    /// `/postback <payload>`, `/location <lat>,<lon>` and `/file <path>` select the message
    /// kind; anything else is text.
    pub fn wrap_line(
        self: &Arc<Self>,
        line: &str,
        sender: Subscriber,
    ) -> Result<Option<Event>, ChannelError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let handler: Arc<dyn ChannelHandler> = self.clone();
        let message_event = |kind| {
            Event::new(handler.clone(), EventType::Message, kind, ChannelData::default())
                .with_id(format!("console-{}", uuid::Uuid::new_v4().simple()))
        };
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let event = match command {
            "/postback" if !rest.is_empty() => message_event(IncomingMessageType::Postback)
                .with_message(StdIncomingMessage::postback(rest, rest))
                .with_payload(Payload::Postback {
                    payload: rest.to_string(),
                }),
            "/location" => {
                let (lat, lon) = rest.split_once(',').ok_or_else(|| {
                    ChannelError::MalformedEvent("expected /location <lat>,<lon>".to_string())
                })?;
                let parse = |v: &str| {
                    v.trim().parse::<f64>().map_err(|e| {
                        ChannelError::MalformedEvent(format!("invalid coordinate {:?}: {}", v, e))
                    })
                };
                let coordinates = Coordinates {
                    lat: parse(lat)?,
                    lon: parse(lon)?,
                };
                message_event(IncomingMessageType::Location)
                    .with_message(StdIncomingMessage::location(coordinates))
                    .with_payload(Payload::Location { coordinates })
            }
            "/file" if !rest.is_empty() => {
                let attachment = AttachmentPayload {
                    kind: FileType::from_mime(mime_from_extension(Path::new(rest))),
                    payload: AttachmentRef {
                        id: None,
                        url: Some(format!("file://{}", rest)),
                    },
                };
                message_event(IncomingMessageType::Attachments)
                    .with_message(StdIncomingMessage::attachment(attachment.clone()))
                    .with_payload(Payload::Attachments {
                        attachments: attachment,
                    })
            }
            _ => message_event(IncomingMessageType::Message)
                .with_message(StdIncomingMessage::text(line)),
        };
        Ok(Some(event.with_sender(sender)))
    }
}

fn button_line(index: usize, button: &Button) -> String {
    match button {
        Button::Postback { title, payload } => {
            format!("  [{}] {}  (/postback {})", index + 1, title, payload)
        }
        Button::WebUrl { title, url, .. } => format!("  [{}] {}  <{}>", index + 1, title, url),
    }
}

impl EnvelopeRenderer for ConsoleChannel {
    type Output = Vec<String>;

    fn text_format(&self, message: &TextMessage, _options: &SendOptions) -> Vec<String> {
        vec![message.text.clone()]
    }

    fn quick_replies_format(
        &self,
        message: &QuickRepliesMessage,
        _options: &SendOptions,
    ) -> Vec<String> {
        let mut lines = vec![message.text.clone()];
        lines.extend(message.quick_replies.iter().enumerate().map(|(i, qr)| {
            format!("  ({}) {}  (/postback {})", i + 1, qr.title, qr.payload)
        }));
        lines
    }

    fn buttons_format(&self, message: &ButtonsMessage, _options: &SendOptions) -> Vec<String> {
        let mut lines = vec![message.text.clone()];
        lines.extend(message.buttons.iter().enumerate().map(|(i, b)| button_line(i, b)));
        lines
    }

    fn attachment_format(&self, message: &AttachmentMessage, _options: &SendOptions) -> Vec<String> {
        let payload = &message.attachment.payload;
        let target = payload
            .url
            .as_deref()
            .or(payload.id.as_deref())
            .unwrap_or("(no location)");
        let mut lines = vec![format!("[{}] {}", message.attachment.kind.as_str(), target)];
        lines.extend(
            message
                .quick_replies
                .iter()
                .enumerate()
                .map(|(i, qr)| format!("  ({}) {}", i + 1, qr.title)),
        );
        lines
    }

    fn list_format(&self, message: &ListMessage, _options: &SendOptions) -> Vec<String> {
        let title_key = message.options.fields.title.as_str();
        let mut lines: Vec<String> = message
            .elements
            .iter()
            .map(|e| {
                let title = e.get(title_key).and_then(|v| v.as_str()).unwrap_or("");
                format!("- {}", title)
            })
            .collect();
        if message.pagination.has_more() {
            lines.push("  (/postback VIEW_MORE)".to_string());
        }
        lines
    }

    fn carousel_format(&self, message: &ListMessage, options: &SendOptions) -> Vec<String> {
        self.list_format(message, options)
    }
}

#[async_trait]
impl ChannelHandler for ConsoleChannel {
    fn name(&self) -> &str {
        CONSOLE_CHANNEL_NAME
    }

    async fn send_message(
        &self,
        _event: &Event,
        envelope: &Envelope,
        options: &SendOptions,
        _context: &ConversationContext,
    ) -> Result<SendReceipt, ChannelError> {
        let text = self.format_message(envelope, options).join("\n");
        self.out
            .send(text)
            .map_err(|_| ChannelError::TransportSend("console output closed".to_string()))?;
        Ok(SendReceipt {
            mid: Some(format!("console-{}", uuid::Uuid::new_v4().simple())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{QuickReply, QuickReplyType};
    use crate::subscriber::InMemorySubscriberStore;

    async fn setup() -> (Arc<ConsoleChannel>, mpsc::UnboundedReceiver<String>, Subscriber) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = ConsoleChannel::new(tx);
        let store = InMemorySubscriberStore::new();
        let sender = channel.get_or_create_session(&store).await.unwrap();
        let again = channel.get_or_create_session(&store).await.unwrap();
        assert_eq!(sender.id, again.id);
        (channel, rx, sender)
    }

    #[tokio::test]
    async fn classifies_input_lines() {
        let (channel, _rx, sender) = setup().await;

        let event = channel.wrap_line("hello", sender.clone()).unwrap().unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Message);
        assert_eq!(event.text(), "hello");

        let event = channel.wrap_line("/postback YES", sender.clone()).unwrap().unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Postback);
        assert_eq!(event.payload().and_then(|p| p.as_postback()), Some("YES"));

        let event = channel
            .wrap_line("/location 1.5, 2.5", sender.clone())
            .unwrap()
            .unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Location);

        let event = channel
            .wrap_line("/file ./photo.PNG", sender.clone())
            .unwrap()
            .unwrap();
        assert_eq!(event.text(), "attachment:image:file://./photo.PNG");

        assert!(channel.wrap_line("   ", sender.clone()).unwrap().is_none());
        assert!(matches!(
            channel.wrap_line("/location nowhere", sender),
            Err(ChannelError::MalformedEvent(_))
        ));
    }

    #[tokio::test]
    async fn renders_quick_replies_as_lines() {
        let (channel, mut rx, sender) = setup().await;
        let event = channel.wrap_line("hi", sender).unwrap().unwrap();
        let envelope = Envelope::QuickReplies(QuickRepliesMessage {
            text: "Pick".to_string(),
            quick_replies: vec![QuickReply {
                content_type: QuickReplyType::Text,
                title: "Yes".to_string(),
                payload: "YES".to_string(),
            }],
        });
        channel
            .send_message(&event, &envelope, &SendOptions::default(), &ConversationContext::default())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), "Pick\n  (1) Yes  (/postback YES)");
    }
}
