//! Parley core library: channel-agnostic messages, the web widget channel, the
//! suspend/resume workflow runner and the gateway that hosts them.

pub mod actions;
pub mod attachments;
pub mod bus;
pub mod channels;
pub mod config;
pub mod context;
pub mod gateway;
pub mod history;
pub mod i18n;
pub mod message;
pub mod runtime;
pub mod schema;
pub mod settings;
pub mod stats;
pub mod subscriber;
pub mod workflow;
