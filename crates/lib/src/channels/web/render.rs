use serde_json::Value;

use super::types::{DefaultAction, WebElement, WebOutgoingBody};
use super::WebChannel;
use crate::channels::{EnvelopeRenderer, SendOptions};
use crate::i18n::TranslateOptions;
use crate::message::{
    AttachmentMessage, Button, ButtonsMessage, ContentElement, ContentOptions, ListMessage,
    QuickRepliesMessage, TextMessage, VIEW_MORE_PAYLOAD,
};

fn field_str(item: &ContentElement, key: Option<&str>) -> Option<String> {
    match item.get(key?)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Image fields hold either a plain url or an attachment (`{"payload": {"url": ...}}`).
fn image_url(item: &ContentElement, key: Option<&str>) -> Option<String> {
    match item.get(key?)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(attachment) => attachment
            .get("payload")
            .and_then(|p| p.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn absolute_url(url: String) -> String {
    if url.starts_with("http") || url.starts_with('/') {
        url
    } else {
        format!("https://{}", url)
    }
}

impl WebChannel {
    /// Maps content items onto cards using the configured field names.
    pub(crate) fn format_elements(
        &self,
        elements: &[ContentElement],
        options: &ContentOptions,
    ) -> Vec<WebElement> {
        let fields = &options.fields;
        elements
            .iter()
            .map(|item| {
                let mut element = WebElement {
                    title: field_str(item, Some(fields.title.as_str())).unwrap_or_default(),
                    subtitle: field_str(item, fields.subtitle.as_deref()),
                    image_url: image_url(item, fields.image_url.as_deref()),
                    default_action: None,
                    buttons: Vec::new(),
                };
                let id = field_str(item, Some("id")).unwrap_or_default();
                for (index, button) in options.buttons.iter().enumerate() {
                    let mut button = match button {
                        Button::WebUrl {
                            title,
                            webview_height_ratio,
                            ..
                        } => {
                            let url = field_str(item, fields.url.as_deref())
                                .or_else(|| field_str(item, Some("url")))
                                .unwrap_or_default();
                            let url = absolute_url(url);
                            if element.default_action.is_none() {
                                element.default_action = Some(DefaultAction::WebUrl {
                                    url: url.clone(),
                                    webview_height_ratio: webview_height_ratio.clone(),
                                });
                            }
                            Button::WebUrl {
                                title: title.clone(),
                                url,
                                webview_height_ratio: webview_height_ratio.clone(),
                            }
                        }
                        Button::Postback { title, .. } => {
                            let value = field_str(item, fields.action_payload.as_deref())
                                .unwrap_or_else(|| id.clone());
                            Button::Postback {
                                title: title.clone(),
                                payload: format!("{}:{}", title, value),
                            }
                        }
                    };
                    if index == 0 {
                        if let Some(custom) = field_str(item, fields.action_title.as_deref()) {
                            match &mut button {
                                Button::WebUrl { title, .. } | Button::Postback { title, .. } => {
                                    *title = custom
                                }
                            }
                        }
                    }
                    element.buttons.push(button);
                }
                element
            })
            .collect()
    }
}

impl EnvelopeRenderer for WebChannel {
    type Output = WebOutgoingBody;

    fn text_format(&self, message: &TextMessage, _options: &SendOptions) -> WebOutgoingBody {
        WebOutgoingBody::Text {
            text: message.text.clone(),
        }
    }

    fn quick_replies_format(
        &self,
        message: &QuickRepliesMessage,
        _options: &SendOptions,
    ) -> WebOutgoingBody {
        WebOutgoingBody::QuickReplies {
            text: message.text.clone(),
            quick_replies: message.quick_replies.clone(),
        }
    }

    fn buttons_format(&self, message: &ButtonsMessage, _options: &SendOptions) -> WebOutgoingBody {
        WebOutgoingBody::Buttons {
            text: message.text.clone(),
            buttons: message.buttons.clone(),
        }
    }

    fn attachment_format(
        &self,
        message: &AttachmentMessage,
        _options: &SendOptions,
    ) -> WebOutgoingBody {
        let payload = &message.attachment.payload;
        let url = payload
            .url
            .clone()
            .or_else(|| payload.id.as_ref().map(|id| format!("{}/{}", super::DOWNLOAD_PATH, id)))
            .unwrap_or_default();
        WebOutgoingBody::File {
            kind: message.attachment.kind,
            url,
            quick_replies: message.quick_replies.clone(),
        }
    }

    fn list_format(&self, message: &ListMessage, _options: &SendOptions) -> WebOutgoingBody {
        let buttons = if message.pagination.has_more() {
            vec![Button::Postback {
                title: self.i18n.t("View More", &TranslateOptions::default()),
                payload: VIEW_MORE_PAYLOAD.to_string(),
            }]
        } else {
            Vec::new()
        };
        WebOutgoingBody::List {
            elements: self.format_elements(&message.elements, &message.options),
            buttons,
            top_element_style: message.options.top_element_style.clone(),
        }
    }

    fn carousel_format(&self, message: &ListMessage, _options: &SendOptions) -> WebOutgoingBody {
        WebOutgoingBody::Carousel {
            elements: self.format_elements(&message.elements, &message.options),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::{ContextUser, ConversationContext};
    use crate::i18n::Catalog;
    use crate::message::{
        AttachmentPayload, AttachmentRef, EnvelopeFactory, FileType, QuickReply, QuickReplyType,
        TextInput,
    };
    use crate::settings::Settings;

    fn factory() -> EnvelopeFactory {
        let context = ConversationContext {
            user: ContextUser {
                id: "sub-1".to_string(),
                first_name: Some("Ada".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        EnvelopeFactory::new(
            context,
            Arc::new(Settings::default()),
            Arc::new(Catalog::default()),
            7,
        )
    }

    fn quick_reply(title: &str, payload: &str) -> QuickReply {
        QuickReply {
            content_type: QuickReplyType::Text,
            title: title.to_string(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn text_renders_the_processed_text() {
        let web = super::super::tests::fixture().await.channel;
        let envelope = factory().build_text_envelope(&TextInput::from("Hi {context.user.first_name}"));
        assert_eq!(
            web.format_message(&envelope, &SendOptions::default()),
            WebOutgoingBody::Text {
                text: "Hi Ada".to_string()
            }
        );
    }

    #[tokio::test]
    async fn quick_replies_keep_titles_and_payloads() {
        let web = super::super::tests::fixture().await.channel;
        let envelope = factory().build_quick_replies_envelope(
            &TextInput::from("Pick one, {context.user.first_name}"),
            &[quick_reply("Yes", "YES"), quick_reply("No", "NO")],
        );
        assert_eq!(
            web.format_message(&envelope, &SendOptions::default()),
            WebOutgoingBody::QuickReplies {
                text: "Pick one, Ada".to_string(),
                quick_replies: vec![quick_reply("Yes", "YES"), quick_reply("No", "NO")],
            }
        );
    }

    #[tokio::test]
    async fn buttons_render_postbacks_and_links() {
        let web = super::super::tests::fixture().await.channel;
        let buttons = vec![
            Button::Postback {
                title: "Call {context.user.first_name}".to_string(),
                payload: "CALL".to_string(),
            },
            Button::WebUrl {
                title: "Docs".to_string(),
                url: "https://acme.test/docs".to_string(),
                webview_height_ratio: None,
            },
        ];
        let envelope = factory().build_buttons_envelope(&TextInput::from("Choose"), &buttons);
        assert_eq!(
            web.format_message(&envelope, &SendOptions::default()),
            WebOutgoingBody::Buttons {
                text: "Choose".to_string(),
                buttons: vec![
                    Button::Postback {
                        title: "Call Ada".to_string(),
                        payload: "CALL".to_string(),
                    },
                    buttons[1].clone(),
                ],
            }
        );
    }

    #[tokio::test]
    async fn attachment_by_url_or_stored_id() {
        let web = super::super::tests::fixture().await.channel;
        let by_url = factory().build_attachment_envelope(
            &AttachmentPayload {
                kind: FileType::Image,
                payload: AttachmentRef {
                    id: None,
                    url: Some("https://cdn.acme.test/cat.png".to_string()),
                },
            },
            &[quick_reply("More", "MORE")],
        );
        assert_eq!(
            web.format_message(&by_url, &SendOptions::default()),
            WebOutgoingBody::File {
                kind: FileType::Image,
                url: "https://cdn.acme.test/cat.png".to_string(),
                quick_replies: vec![quick_reply("More", "MORE")],
            }
        );

        let stored = factory().build_attachment_envelope(
            &AttachmentPayload {
                kind: FileType::File,
                payload: AttachmentRef {
                    id: Some("att-9".to_string()),
                    url: None,
                },
            },
            &[],
        );
        assert_eq!(
            web.format_message(&stored, &SendOptions::default()),
            WebOutgoingBody::File {
                kind: FileType::File,
                url: format!("{}/att-9", super::super::DOWNLOAD_PATH),
                quick_replies: Vec::new(),
            }
        );
    }
}
