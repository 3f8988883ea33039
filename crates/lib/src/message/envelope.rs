use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{
    render_template, AttachmentMessage, AttachmentPayload, Button, ButtonsMessage,
    ContentElement, ContentOptions, Envelope, ListMessage, OutgoingFormat, Pagination,
    QuickRepliesMessage, QuickReply, TextMessage,
};
use crate::context::ConversationContext;
use crate::i18n::{TranslateOptions, Translator};
use crate::schema::ValidationError;
use crate::settings::Settings;

/// A single text, or several candidates of which one is picked per send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    One(String),
    Many(Vec<String>),
}

impl TextInput {
    pub fn candidates(&self) -> &[String] {
        match self {
            TextInput::One(s) => std::slice::from_ref(s),
            TextInput::Many(items) => items,
        }
    }
}

impl From<&str> for TextInput {
    fn from(s: &str) -> Self {
        TextInput::One(s.to_string())
    }
}

/// Seed for candidate selection, stable for one conversation turn.
pub fn context_seed(conversation_id: &str, event_id: Option<&str>) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(conversation_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(event_id.unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Deterministically picks one candidate for `seed`; `None` only when there are none.
pub fn select_candidate(candidates: &[String], seed: u64) -> Option<&str> {
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0].as_str()),
        n => {
            let mut hasher = Sha256::new();
            hasher.update(seed.to_le_bytes());
            for c in candidates {
                hasher.update(c.as_bytes());
                hasher.update([0u8]);
            }
            let digest = hasher.finalize();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bytes) % n as u64) as usize;
            Some(candidates[index].as_str())
        }
    }
}

/// Builds envelopes for one recipient: selection, then translation, then templating.
pub struct EnvelopeFactory {
    context: ConversationContext,
    settings: Arc<Settings>,
    i18n: Arc<dyn Translator>,
    seed: u64,
}

impl EnvelopeFactory {
    pub fn new(
        context: ConversationContext,
        settings: Arc<Settings>,
        i18n: Arc<dyn Translator>,
        seed: u64,
    ) -> Self {
        Self {
            context,
            settings,
            i18n,
            seed,
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    fn lang(&self) -> Option<&str> {
        self.context.user.language.as_deref()
    }

    fn template_data(&self) -> serde_json::Value {
        json!({
            "context": self.context,
            "contact": self.settings.contact(),
        })
    }

    /// Translates then renders a single string for this recipient.
    pub fn process_str(&self, text: &str) -> String {
        let translated = self.i18n.t(text, &TranslateOptions::lang(self.lang()));
        render_template(&translated, &self.template_data())
    }

    pub fn process_text(&self, text: &TextInput) -> String {
        let selected = select_candidate(text.candidates(), self.seed).unwrap_or("");
        self.process_str(selected)
    }

    pub fn build_text_envelope(&self, text: &TextInput) -> Envelope {
        Envelope::Text(TextMessage {
            text: self.process_text(text),
        })
    }

    pub fn build_quick_replies_envelope(
        &self,
        text: &TextInput,
        quick_replies: &[QuickReply],
    ) -> Envelope {
        Envelope::QuickReplies(QuickRepliesMessage {
            text: self.process_text(text),
            quick_replies: quick_replies
                .iter()
                .map(|qr| QuickReply {
                    content_type: qr.content_type,
                    title: self.process_str(&qr.title),
                    payload: self.process_str(&qr.payload),
                })
                .collect(),
        })
    }

    /// Postback titles and payloads are processed; web_url buttons pass through untouched.
    pub fn build_buttons_envelope(&self, text: &TextInput, buttons: &[Button]) -> Envelope {
        Envelope::Buttons(ButtonsMessage {
            text: self.process_text(text),
            buttons: buttons
                .iter()
                .map(|b| match b {
                    Button::Postback { title, payload } => Button::Postback {
                        title: self.process_str(title),
                        payload: self.process_str(payload),
                    },
                    other => other.clone(),
                })
                .collect(),
        })
    }

    pub fn build_attachment_envelope(
        &self,
        attachment: &AttachmentPayload,
        quick_replies: &[QuickReply],
    ) -> Envelope {
        Envelope::Attachment(AttachmentMessage {
            attachment: attachment.clone(),
            quick_replies: quick_replies
                .iter()
                .map(|qr| QuickReply {
                    content_type: qr.content_type,
                    title: self.process_str(&qr.title),
                    payload: self.process_str(&qr.payload),
                })
                .collect(),
        })
    }

    /// List and carousel envelopes need at least one element.
    pub fn build_list_envelope(
        &self,
        format: OutgoingFormat,
        options: ContentOptions,
        elements: Vec<ContentElement>,
        pagination: Pagination,
    ) -> Result<Envelope, ValidationError> {
        if elements.is_empty() {
            return Err(ValidationError::new(
                "elements",
                "expected at least 1 item(s), got 0",
            ));
        }
        let message = ListMessage {
            options,
            elements,
            pagination,
        };
        match format {
            OutgoingFormat::List => Ok(Envelope::List(message)),
            OutgoingFormat::Carousel => Ok(Envelope::Carousel(message)),
            other => Err(ValidationError::new(
                "format",
                format!("`{}` is not a list format", other.as_str()),
            )),
        }
    }
}
