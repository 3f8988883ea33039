//! Rendering of canonical envelopes into channel-specific message bodies.

use super::SendOptions;
use crate::message::{
    AttachmentMessage, ButtonsMessage, Envelope, ListMessage, QuickRepliesMessage, TextMessage,
};

/// One formatter per envelope format. `format_message` is exhaustive, so a channel that
/// implements this trait renders every envelope.
pub trait EnvelopeRenderer {
    type Output;

    fn text_format(&self, message: &TextMessage, options: &SendOptions) -> Self::Output;
    fn quick_replies_format(&self, message: &QuickRepliesMessage, options: &SendOptions) -> Self::Output;
    fn buttons_format(&self, message: &ButtonsMessage, options: &SendOptions) -> Self::Output;
    fn attachment_format(&self, message: &AttachmentMessage, options: &SendOptions) -> Self::Output;
    fn list_format(&self, message: &ListMessage, options: &SendOptions) -> Self::Output;
    fn carousel_format(&self, message: &ListMessage, options: &SendOptions) -> Self::Output;

    fn format_message(&self, envelope: &Envelope, options: &SendOptions) -> Self::Output {
        match envelope {
            Envelope::Text(m) => self.text_format(m, options),
            Envelope::QuickReplies(m) => self.quick_replies_format(m, options),
            Envelope::Buttons(m) => self.buttons_format(m, options),
            Envelope::Attachment(m) => self.attachment_format(m, options),
            Envelope::List(m) => self.list_format(m, options),
            Envelope::Carousel(m) => self.carousel_format(m, options),
        }
    }
}
