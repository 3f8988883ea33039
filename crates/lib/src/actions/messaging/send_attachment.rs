use serde::Deserialize;

use super::{options_field, reply_schema, MessageAction};
use crate::actions::ActionMetadata;
use crate::channels::SendOptions;
use crate::message::{AttachmentPayload, Envelope, EnvelopeFactory, QuickReply};
use crate::schema::{Field, FieldKind, Schema};

#[derive(Debug, Clone, Deserialize)]
pub struct SendAttachmentInput {
    pub attachment: AttachmentPayload,
    #[serde(default)]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default)]
    pub options: SendOptions,
}

pub struct SendAttachment {
    metadata: ActionMetadata,
}

impl SendAttachment {
    pub fn new() -> Self {
        Self {
            metadata: ActionMetadata {
                name: "send_attachment".to_string(),
                description: "Send a file (image, video, audio or document) and wait for the reply"
                    .to_string(),
                input_schema: Schema::object(vec![
                    Field::required("attachment", FieldKind::Object, "Attachment type and payload {id, url}"),
                    Field::optional("quick_replies", FieldKind::List { min: 0 }, "Quick replies"),
                    options_field(),
                ]),
                output_schema: reply_schema(),
            },
        }
    }
}

impl Default for SendAttachment {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAction for SendAttachment {
    type Input = SendAttachmentInput;

    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    fn build_envelope(&self, factory: &EnvelopeFactory, input: &SendAttachmentInput) -> Envelope {
        factory.build_attachment_envelope(&input.attachment, &input.quick_replies)
    }

    fn send_options(&self, input: &SendAttachmentInput) -> SendOptions {
        input.options.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionError};
    use crate::channels::testing::{text_event, RecordingChannel};
    use crate::workflow::testing::services;
    use crate::workflow::WorkflowContext;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn sends_attachment_with_quick_replies() {
        let channel = RecordingChannel::new("web-channel");
        let event = Arc::new(text_event(channel.clone(), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services().await).with_event(event);
        SendAttachment::new()
            .execute(
                &json!({
                    "attachment": {"type": "image", "payload": {"url": "https://cdn/x.png"}},
                    "quick_replies": [{"content_type": "text", "title": "Nice", "payload": "NICE"}]
                }),
                &ctx,
            )
            .await
            .unwrap();
        let sent = channel.sent();
        assert_eq!(sent[0].message_value()["attachment"]["type"], "image");
        assert_eq!(sent[0].message_value()["quickReplies"][0]["payload"], "NICE");
    }

    #[tokio::test]
    async fn attachment_is_required() {
        let channel = RecordingChannel::new("web-channel");
        let event = Arc::new(text_event(channel.clone(), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services().await).with_event(event);
        let err = SendAttachment::new()
            .execute(&json!({"quick_replies": []}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
        assert!(channel.sent().is_empty());
    }
}
