use serde::Deserialize;

use super::{options_field, reply_schema, MessageAction};
use crate::actions::ActionMetadata;
use crate::channels::SendOptions;
use crate::message::{Button, Envelope, EnvelopeFactory, TextInput};
use crate::schema::{Field, FieldKind, Schema};

#[derive(Debug, Clone, Deserialize)]
pub struct SendButtonsInput {
    pub text: TextInput,
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub options: SendOptions,
}

pub struct SendButtons {
    metadata: ActionMetadata,
}

impl SendButtons {
    pub fn new() -> Self {
        Self {
            metadata: ActionMetadata {
                name: "send_buttons".to_string(),
                description: "Send a text with postback or link buttons and wait for the choice"
                    .to_string(),
                input_schema: Schema::object(vec![
                    Field::required("text", FieldKind::Text, "Text shown above the buttons"),
                    Field::required("buttons", FieldKind::List { min: 1 }, "Buttons"),
                    options_field(),
                ]),
                output_schema: reply_schema(),
            },
        }
    }
}

impl Default for SendButtons {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAction for SendButtons {
    type Input = SendButtonsInput;

    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    fn build_envelope(&self, factory: &EnvelopeFactory, input: &SendButtonsInput) -> Envelope {
        factory.build_buttons_envelope(&input.text, &input.buttons)
    }

    fn send_options(&self, input: &SendButtonsInput) -> SendOptions {
        input.options.clone()
    }
}
