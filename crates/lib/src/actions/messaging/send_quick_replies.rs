use serde::Deserialize;

use super::{options_field, reply_schema, MessageAction};
use crate::actions::ActionMetadata;
use crate::channels::SendOptions;
use crate::message::{Envelope, EnvelopeFactory, QuickReply, TextInput};
use crate::schema::{Field, FieldKind, Schema};

#[derive(Debug, Clone, Deserialize)]
pub struct SendQuickRepliesInput {
    pub text: TextInput,
    pub quick_replies: Vec<QuickReply>,
    #[serde(default)]
    pub options: SendOptions,
}

pub struct SendQuickReplies {
    metadata: ActionMetadata,
}

impl SendQuickReplies {
    pub fn new() -> Self {
        Self {
            metadata: ActionMetadata {
                name: "send_quick_replies".to_string(),
                description: "Send a text with quick replies and wait for the choice".to_string(),
                input_schema: Schema::object(vec![
                    Field::required("text", FieldKind::Text, "Text shown above the quick replies"),
                    Field::required("quick_replies", FieldKind::List { min: 1 }, "Quick replies"),
                    options_field(),
                ]),
                output_schema: reply_schema(),
            },
        }
    }
}

impl Default for SendQuickReplies {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAction for SendQuickReplies {
    type Input = SendQuickRepliesInput;

    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    fn build_envelope(&self, factory: &EnvelopeFactory, input: &SendQuickRepliesInput) -> Envelope {
        factory.build_quick_replies_envelope(&input.text, &input.quick_replies)
    }

    fn send_options(&self, input: &SendQuickRepliesInput) -> SendOptions {
        input.options.clone()
    }
}
