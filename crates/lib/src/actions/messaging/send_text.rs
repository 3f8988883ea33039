use serde::Deserialize;

use super::{options_field, reply_schema, MessageAction};
use crate::actions::ActionMetadata;
use crate::channels::SendOptions;
use crate::message::{Envelope, EnvelopeFactory, TextInput};
use crate::schema::{Field, FieldKind, Schema};

#[derive(Debug, Clone, Deserialize)]
pub struct SendTextInput {
    pub text: TextInput,
    #[serde(default)]
    pub options: SendOptions,
}

pub struct SendTextMessage {
    metadata: ActionMetadata,
}

impl SendTextMessage {
    pub fn new() -> Self {
        Self {
            metadata: ActionMetadata {
                name: "send_text_message".to_string(),
                description: "Send a text message and wait for the reply".to_string(),
                input_schema: Schema::object(vec![
                    Field::required("text", FieldKind::Text, "Text, or candidates to pick from"),
                    options_field(),
                ]),
                output_schema: reply_schema(),
            },
        }
    }
}

impl Default for SendTextMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAction for SendTextMessage {
    type Input = SendTextInput;

    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    fn build_envelope(&self, factory: &EnvelopeFactory, input: &SendTextInput) -> Envelope {
        factory.build_text_envelope(&input.text)
    }

    fn send_options(&self, input: &SendTextInput) -> SendOptions {
        input.options.clone()
    }
}
