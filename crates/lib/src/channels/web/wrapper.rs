//! Normalizes raw widget events into canonical [`Event`]s.

use std::sync::Arc;

use base64::Engine;

use super::types::{WebEvent, WebIncomingBody};
use crate::channels::{ChannelData, ChannelError, ChannelHandler, Event, PendingUpload};
use crate::message::{
    AttachmentPayload, AttachmentRef, Coordinates, EventType, FileType, IncomingMessageType,
    Payload, StdIncomingMessage,
};

/// Parses a raw widget payload. Unknown or incomplete shapes are rejected.
pub fn parse_web_event(raw: serde_json::Value) -> Result<WebEvent, ChannelError> {
    serde_json::from_value(raw).map_err(|e| ChannelError::MalformedEvent(e.to_string()))
}

fn decode_inline_file(encoded: &str) -> Result<Vec<u8>, ChannelError> {
    let data = match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ChannelError::MalformedEvent(format!("invalid file content: {}", e)))
}

/// Builds the canonical event for `raw`. The sender is attached by the caller.
pub fn wrap_web_event(
    handler: Arc<dyn ChannelHandler>,
    raw: &WebEvent,
    channel_data: ChannelData,
) -> Result<Event, ChannelError> {
    let message_event =
        |kind: IncomingMessageType| Event::new(handler.clone(), EventType::Message, kind, channel_data.clone());

    let event = match &raw.body {
        WebIncomingBody::Text { data } => message_event(IncomingMessageType::Message)
            .with_message(StdIncomingMessage::text(&data.text)),
        WebIncomingBody::QuickReply { data } => message_event(IncomingMessageType::QuickReply)
            .with_message(StdIncomingMessage::postback(&data.text, &data.payload))
            .with_payload(Payload::Postback {
                payload: data.payload.clone(),
            }),
        WebIncomingBody::Postback { data } => message_event(IncomingMessageType::Postback)
            .with_message(StdIncomingMessage::postback(&data.text, &data.payload))
            .with_payload(Payload::Postback {
                payload: data.payload.clone(),
            }),
        WebIncomingBody::Location { data } => {
            let coordinates = Coordinates {
                lat: data.coordinates.lat,
                lon: data.coordinates.lng,
            };
            message_event(IncomingMessageType::Location)
                .with_message(StdIncomingMessage::location(coordinates))
                .with_payload(Payload::Location { coordinates })
        }
        WebIncomingBody::File { data } => match (&data.url, &data.file) {
            (Some(url), _) => {
                let attachment = AttachmentPayload {
                    kind: FileType::from_mime(&data.mime),
                    payload: AttachmentRef {
                        id: None,
                        url: Some(url.clone()),
                    },
                };
                message_event(IncomingMessageType::Attachments)
                    .with_message(StdIncomingMessage::attachment(attachment.clone()))
                    .with_payload(Payload::Attachments {
                        attachments: attachment,
                    })
            }
            (None, Some(encoded)) => message_event(IncomingMessageType::Attachments)
                .with_pending_upload(PendingUpload {
                    name: data.name.clone(),
                    mime: data.mime.clone(),
                    bytes: decode_inline_file(encoded)?,
                }),
            (None, None) => {
                return Err(ChannelError::MalformedEvent(
                    "file event carries neither url nor content".to_string(),
                ))
            }
        },
        WebIncomingBody::Delivery { mids } => Event::new(
            handler.clone(),
            EventType::Delivery,
            IncomingMessageType::Unknown,
            channel_data.clone(),
        )
        .with_delivered(mids.clone()),
        WebIncomingBody::Read { watermark } => Event::new(
            handler.clone(),
            EventType::Read,
            IncomingMessageType::Unknown,
            channel_data.clone(),
        )
        .with_watermark(*watermark),
        WebIncomingBody::Typing => Event::new(
            handler.clone(),
            EventType::Typing,
            IncomingMessageType::Unknown,
            channel_data.clone(),
        ),
    };

    Ok(match &raw.mid {
        Some(mid) => event.with_id(mid.clone()),
        None => event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::RecordingChannel;
    use serde_json::json;

    fn wrap(raw: serde_json::Value) -> Result<Event, ChannelError> {
        let handler = RecordingChannel::new("web-channel");
        let raw = parse_web_event(raw)?;
        wrap_web_event(handler, &raw, ChannelData::default())
    }

    #[test]
    fn text_event() {
        let event = wrap(json!({"type": "text", "data": {"text": "hello"}, "mid": "m1"})).unwrap();
        assert_eq!(event.event_type(), EventType::Message);
        assert_eq!(event.message_type(), IncomingMessageType::Message);
        assert_eq!(event.text(), "hello");
        assert_eq!(event.id(), Some("m1"));
        assert_eq!(event.channel(), "web-channel");
        assert!(event.payload().is_none());
    }

    #[test]
    fn postback_and_quick_reply_carry_payload() {
        let event =
            wrap(json!({"type": "postback", "data": {"text": "Yes", "payload": "YES"}})).unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Postback);
        assert_eq!(event.payload().and_then(|p| p.as_postback()), Some("YES"));

        let event =
            wrap(json!({"type": "quick_reply", "data": {"text": "No", "payload": "NO"}})).unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::QuickReply);
        assert_eq!(event.text(), "No");
    }

    #[test]
    fn location_maps_lng_to_lon() {
        let event = wrap(json!({
            "type": "location",
            "data": {"coordinates": {"lat": 36.8, "lng": 10.1}}
        }))
        .unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Location);
        assert_eq!(
            event.payload(),
            Some(&Payload::Location {
                coordinates: Coordinates { lat: 36.8, lon: 10.1 }
            })
        );
    }

    #[test]
    fn inline_file_becomes_pending_then_resolves() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"png-bytes");
        let event = wrap(json!({
            "type": "file",
            "data": {"type": "image/png", "size": 9, "name": "a.png", "file": encoded}
        }))
        .unwrap();
        assert_eq!(event.message_type(), IncomingMessageType::Attachments);
        assert_eq!(event.pending_upload().map(|u| u.bytes.len()), Some(9));
        assert!(event.message().is_none());

        let event = event.resolve_upload(AttachmentRef {
            id: Some("f1".to_string()),
            url: Some("/webhook/web/download/f1".to_string()),
        });
        assert!(event.pending_upload().is_none());
        assert_eq!(event.text(), "attachment:image:/webhook/web/download/f1");
    }

    #[test]
    fn status_events() {
        let event = wrap(json!({"type": "read", "watermark": 12.0})).unwrap();
        assert_eq!(event.event_type(), EventType::Read);
        assert_eq!(event.watermark(), 12.0);

        let event = wrap(json!({"type": "delivery", "mids": ["m1"]})).unwrap();
        assert_eq!(event.event_type(), EventType::Delivery);
        assert_eq!(event.delivered_messages(), ["m1".to_string()]);

        let event = wrap(json!({"type": "typing"})).unwrap();
        assert_eq!(event.event_type(), EventType::Typing);
    }

    #[test]
    fn malformed_payloads_fail_closed() {
        assert!(matches!(
            wrap(json!({"type": "hologram", "data": {}})),
            Err(ChannelError::MalformedEvent(_))
        ));
        assert!(matches!(
            wrap(json!({"type": "text"})),
            Err(ChannelError::MalformedEvent(_))
        ));
        assert!(matches!(
            wrap(json!({"type": "file", "data": {"type": "image/png"}})),
            Err(ChannelError::MalformedEvent(_))
        ));
    }
}
