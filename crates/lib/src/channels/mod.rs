//! Communication channels (web widget, console).
//!
//! A channel turns raw payloads into canonical [`Event`]s and renders [`Envelope`]s back
//! into its wire format. Inbound events are queued to the workflow dispatcher.
//!
//! [`Envelope`]: crate::message::Envelope

mod console;
mod event;
mod registry;
mod render;
pub mod web;

pub use console::{ConsoleChannel, CONSOLE_CHANNEL_NAME};
pub use event::{ChannelData, Event, PendingUpload};
pub use registry::{ChannelError, ChannelHandler, ChannelRegistry, SendOptions, SendReceipt, Typing};
pub use render::EnvelopeRenderer;
pub use web::{WebChannel, WEB_CHANNEL_NAME};
