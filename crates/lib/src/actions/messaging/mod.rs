//! Message actions: build an envelope for the event's sender, send it, then suspend.
//!
//! Every message action follows the same sequence:
//!
//! 1. validate the input against the action's schema (nothing is sent on failure);
//! 2. [`prepare`]: resolve the event and recipient, merge the conversation context and
//!    build an [`EnvelopeFactory`];
//! 3. build the envelope;
//! 4. [`send_prepared_and_suspend`]: send through the event's channel, emit
//!    `outgoing` / `all_messages` stats, await `hook:chatbot:sent`, then suspend with an
//!    `awaiting_user_response` record.
//!
//! A new message kind only needs an input type, a schema and a builder (see
//! [`MessageAction`]).

mod send_attachment;
mod send_buttons;
mod send_quick_replies;
mod send_text;

pub use send_attachment::{SendAttachment, SendAttachmentInput};
pub use send_buttons::{SendButtons, SendButtonsInput};
pub use send_quick_replies::{SendQuickReplies, SendQuickRepliesInput};
pub use send_text::{SendTextMessage, SendTextInput};

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Action, ActionError, ActionMetadata, ActionOutcome};
use crate::bus::{BusEvent, StatsKind};
use crate::channels::{Event, SendOptions};
use crate::context::ConversationContext;
use crate::message::{context_seed, Envelope, EnvelopeFactory, SentMessage};
use crate::schema::{Field, FieldKind, Schema};
use crate::subscriber::Subscriber;
use crate::workflow::{SuspensionData, SuspensionRecord, WorkflowContext};

pub fn builtin_actions() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(SendTextMessage::new()),
        Arc::new(SendButtons::new()),
        Arc::new(SendQuickReplies::new()),
        Arc::new(SendAttachment::new()),
    ]
}

/// Output shape shared by message actions: the subscriber's reply.
pub(crate) fn reply_schema() -> Schema {
    Schema::object(vec![
        Field::optional("text", FieldKind::String, "Text of the reply"),
        Field::optional("postback", FieldKind::String, "Payload of the chosen button or quick reply"),
        Field::optional("coordinates", FieldKind::Object, "Shared location"),
        Field::optional("attachment", FieldKind::Object, "Sent file"),
    ])
}

pub(crate) fn options_field() -> Field {
    Field::optional("options", FieldKind::Object, "Send options (typing, assign_to)")
}

/// A message action: an input type plus an envelope builder.
pub trait MessageAction: Send + Sync {
    type Input: DeserializeOwned + Send + Sync;

    fn metadata(&self) -> &ActionMetadata;

    fn build_envelope(&self, factory: &EnvelopeFactory, input: &Self::Input) -> Envelope;

    fn send_options(&self, _input: &Self::Input) -> SendOptions {
        SendOptions::default()
    }
}

#[async_trait]
impl<T> Action for T
where
    T: MessageAction,
{
    fn metadata(&self) -> &ActionMetadata {
        MessageAction::metadata(self)
    }

    async fn execute(
        &self,
        input: &Value,
        context: &WorkflowContext,
    ) -> Result<ActionOutcome, ActionError> {
        let name = &MessageAction::metadata(self).name;
        let input: T::Input = MessageAction::metadata(self)
            .input_schema
            .parse(input)
            .map_err(|e| {
                log::warn!("action {}: invalid input: {}", name, e);
                e
            })?;
        let prepared = prepare(context).await?;
        let envelope = self.build_envelope(&prepared.factory, &input);
        let options = self.send_options(&input);
        send_prepared_and_suspend(name, context, prepared, envelope, &options).await
    }
}

/// Resolved inputs of a send: the event, its sender, and the factory for their context.
pub struct PreparedMessage {
    pub event: Arc<Event>,
    pub recipient: Subscriber,
    pub context: ConversationContext,
    pub factory: EnvelopeFactory,
}

pub async fn prepare(ctx: &WorkflowContext) -> Result<PreparedMessage, ActionError> {
    let event = ctx.event.clone().ok_or_else(|| {
        log::error!("conversation {}: no event to reply to", ctx.conversation_id);
        ActionError::MissingEvent
    })?;
    let recipient = event.sender().cloned().ok_or_else(|| {
        log::error!("conversation {}: event has no sender", ctx.conversation_id);
        ActionError::MissingRecipient
    })?;
    let context = ConversationContext::merge(
        &ConversationContext::default(),
        ctx.chat_context.as_ref(),
        Some(&recipient),
        event.channel(),
    );
    let settings = ctx.services.settings.get_settings().await?;
    let factory = EnvelopeFactory::new(
        context.clone(),
        settings,
        ctx.services.i18n.clone(),
        context_seed(&ctx.conversation_id, event.id()),
    );
    Ok(PreparedMessage {
        event,
        recipient,
        context,
        factory,
    })
}

/// Sends `envelope` and suspends the run. A transport failure is returned as is: no stats,
/// no sent event, no suspension. Bus failures after a successful send are only logged.
pub async fn send_prepared_and_suspend(
    action: &str,
    ctx: &WorkflowContext,
    prepared: PreparedMessage,
    envelope: Envelope,
    options: &SendOptions,
) -> Result<ActionOutcome, ActionError> {
    let PreparedMessage {
        event,
        recipient,
        context,
        ..
    } = prepared;

    let receipt = event
        .handler()
        .send_message(&event, &envelope, options, &context)
        .await
        .map_err(|e| {
            log::warn!("action {}: send to {} failed: {}", action, recipient.foreign_id, e);
            ActionError::TransportSend(e)
        })?;

    let bus = &ctx.services.bus;
    bus.emit(BusEvent::stats(StatsKind::Outgoing, "Outgoing"));
    bus.emit(BusEvent::stats(StatsKind::AllMessages, "All Messages"));

    let mid = receipt.mid.filter(|m| !m.is_empty());
    let sent = SentMessage {
        mid: mid.clone().unwrap_or_default(),
        message: envelope.message_value(),
        recipient: recipient.id.clone(),
        handover: false,
        read: false,
        delivery: false,
    };
    if let Err(e) = bus
        .emit_async(BusEvent::ChatbotSent {
            message: sent,
            event: Some(event.clone()),
        })
        .await
    {
        log::warn!("action {}: sent-message listeners failed: {}", action, e);
    }

    let record = SuspensionRecord::awaiting_user_response(SuspensionData {
        action: action.to_string(),
        channel: event.channel().to_string(),
        recipient: recipient.id,
        conversation_id: ctx.conversation_id.clone(),
        message_id: mid,
        format: envelope.format(),
        envelope: envelope.message_value(),
    });
    log::debug!("action {}: suspended {}", action, ctx.conversation_id);
    Ok(ctx.workflow.suspend(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::RecordingListener;
    use crate::channels::testing::{text_event, RecordingChannel};
    use crate::message::OutgoingFormat;
    use crate::workflow::testing::services;
    use crate::workflow::AWAITING_USER_RESPONSE;
    use serde_json::json;

    #[tokio::test]
    async fn sends_then_emits_then_suspends() {
        let services = services().await;
        let listener = Arc::new(RecordingListener::default());
        services.bus.subscribe(listener.clone()).await;
        let channel = RecordingChannel::new("web-channel");
        let event = Arc::new(text_event(channel.clone(), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        let outcome = SendTextMessage::new()
            .execute(&json!({"text": "Hello {context.user.first_name}"}), &ctx)
            .await
            .unwrap();

        let ActionOutcome::Suspended(record) = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(record.reason, AWAITING_USER_RESPONSE);
        assert_eq!(record.data.action, "send_text_message");
        assert_eq!(record.data.channel, "web-channel");
        assert_eq!(record.data.recipient, "sub-web-1");
        assert_eq!(record.data.conversation_id, "web-channel:web-1");
        assert_eq!(record.data.message_id.as_deref(), Some("mid-1"));
        assert_eq!(record.data.format, OutgoingFormat::Text);
        assert_eq!(record.data.envelope, json!({"text": "Hello Ada"}));
        assert_eq!(ctx.workflow.suspension(), Some(record));
        assert_eq!(channel.sent().len(), 1);

        assert_eq!(
            listener.names().await,
            vec![
                "hook:stats:entry:Outgoing".to_string(),
                "hook:stats:entry:All Messages".to_string(),
                "hook:chatbot:sent".to_string(),
            ]
        );
    }

    #[derive(Default)]
    struct SentRecorder {
        sent: tokio::sync::Mutex<Vec<SentMessage>>,
    }

    #[async_trait::async_trait]
    impl crate::bus::BusListener for SentRecorder {
        async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
            if let BusEvent::ChatbotSent { message, .. } = event {
                self.sent.lock().await.push(message.clone());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn sent_record_is_unread_undelivered_and_not_handed_over() {
        let services = services().await;
        let recorder = Arc::new(SentRecorder::default());
        services.bus.subscribe(recorder.clone()).await;
        let event = Arc::new(text_event(RecordingChannel::new("web-channel"), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        SendTextMessage::new()
            .execute(
                &json!({"text": "Hello", "options": {"assign_to": "agent-7"}}),
                &ctx,
            )
            .await
            .unwrap();

        let sent = recorder.sent.lock().await.clone();
        assert_eq!(
            sent,
            vec![SentMessage {
                mid: "mid-1".to_string(),
                message: json!({"text": "Hello"}),
                recipient: "sub-web-1".to_string(),
                handover: false,
                read: false,
                delivery: false,
            }]
        );
    }

    #[tokio::test]
    async fn transport_failure_does_not_suspend_or_emit() {
        let services = services().await;
        let listener = Arc::new(RecordingListener::default());
        services.bus.subscribe(listener.clone()).await;
        let event = Arc::new(text_event(RecordingChannel::failing("web-channel"), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        let err = SendTextMessage::new()
            .execute(&json!({"text": "Hello"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::TransportSend(_)));
        assert!(ctx.workflow.suspension().is_none());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(listener.names().await.is_empty());
    }

    #[tokio::test]
    async fn sent_listener_failure_still_suspends() {
        let services = services().await;
        let listener = Arc::new(RecordingListener {
            fail_on: Some("hook:chatbot:sent"),
            ..Default::default()
        });
        services.bus.subscribe(listener).await;
        let event = Arc::new(text_event(RecordingChannel::new("web-channel"), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        let outcome = SendTextMessage::new()
            .execute(&json!({"text": "Hello"}), &ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Suspended(_)));
    }

    #[tokio::test]
    async fn invalid_input_fails_before_sending() {
        let services = services().await;
        let channel = RecordingChannel::new("web-channel");
        let event = Arc::new(text_event(channel.clone(), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        let err = SendButtons::new()
            .execute(&json!({"text": "Pick", "buttons": []}), &ctx)
            .await
            .unwrap_err();
        let ActionError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert_eq!(v.field, "buttons");
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_button_is_reported_on_buttons() {
        let services = services().await;
        let channel = RecordingChannel::new("web-channel");
        let event = Arc::new(text_event(channel.clone(), "web-1", "hi"));
        let ctx = WorkflowContext::new("web-channel:web-1", services).with_event(event);

        let err = SendButtons::new()
            .execute(
                &json!({"text": "Pick", "buttons": [{"type": "postback", "title": "Yes"}]}),
                &ctx,
            )
            .await
            .unwrap_err();
        let ActionError::Validation(v) = err else {
            panic!("expected validation error");
        };
        assert_eq!(v.field, "buttons");
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_event_or_recipient() {
        let services = services().await;
        let ctx = WorkflowContext::new("c1", services.clone());
        let err = SendTextMessage::new()
            .execute(&json!({"text": "Hello"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingEvent));

        let channel = RecordingChannel::new("web-channel");
        let anonymous = Event::new(
            channel.clone(),
            crate::message::EventType::Message,
            crate::message::IncomingMessageType::Message,
            Default::default(),
        );
        let ctx = WorkflowContext::new("c1", services).with_event(Arc::new(anonymous));
        let err = SendTextMessage::new()
            .execute(&json!({"text": "Hello"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::MissingRecipient));
        assert!(channel.sent().is_empty());
    }
}
