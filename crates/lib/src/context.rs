//! Conversation context: what templates and actions see about the ongoing chat.
//!
//! The effective context is merged from three layers, lowest precedence first:
//! defaults, the stored conversation context, and the live sender profile.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::Coordinates;
use crate::subscriber::Subscriber;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUser {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ContextUser {
    /// Overlays the fields `other` actually carries.
    fn overlay(&mut self, other: &ContextUser) {
        if !other.id.is_empty() {
            self.id = other.id.clone();
        }
        let pairs = [
            (&mut self.foreign_id, &other.foreign_id),
            (&mut self.first_name, &other.first_name),
            (&mut self.last_name, &other.last_name),
            (&mut self.language, &other.language),
            (&mut self.locale, &other.locale),
        ];
        for (mine, theirs) in pairs {
            if theirs.is_some() {
                *mine = theirs.clone();
            }
        }
    }
}

impl From<&Subscriber> for ContextUser {
    fn from(s: &Subscriber) -> Self {
        Self {
            id: s.id.clone(),
            foreign_id: Some(s.foreign_id.clone()),
            first_name: Some(s.first_name.clone()),
            last_name: Some(s.last_name.clone()),
            language: s.language.clone(),
            locale: s.locale.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub lat: f64,
    pub lon: f64,
}

impl From<Coordinates> for UserLocation {
    fn from(c: Coordinates) -> Self {
        Self { lat: c.lat, lon: c.lon }
    }
}

/// Effective context of a conversation after merging all layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default)]
    pub user: ContextUser,
    #[serde(default)]
    pub user_location: UserLocation,
    #[serde(default)]
    pub skip: HashMap<String, u64>,
    #[serde(default)]
    pub attempt: u32,
}

/// Context persisted with a conversation. Absent fields fall through to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ContextUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location: Option<UserLocation>,
    #[serde(default)]
    pub skip: HashMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl ConversationContext {
    /// Merges `defaults < stored < sender`.
    ///
    /// `vars`, `skip` and `user` merge key-wise; `attempt` and `user_location` come from the
    /// stored layer when present; `channel` falls back to the handling channel's name.
    pub fn merge(
        defaults: &ConversationContext,
        stored: Option<&StoredContext>,
        sender: Option<&Subscriber>,
        channel_name: &str,
    ) -> ConversationContext {
        let mut merged = defaults.clone();

        if let Some(stored) = stored {
            merged
                .vars
                .extend(stored.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
                .skip
                .extend(stored.skip.iter().map(|(k, v)| (k.clone(), *v)));
            if let Some(user) = &stored.user {
                merged.user.overlay(user);
            }
            if let Some(location) = &stored.user_location {
                merged.user_location = location.clone();
            }
            if let Some(attempt) = stored.attempt {
                merged.attempt = attempt;
            }
            if stored.channel.is_some() {
                merged.channel = stored.channel.clone();
            }
        }

        if let Some(sender) = sender {
            merged.user.overlay(&ContextUser::from(sender));
            merged.vars.extend(
                sender
                    .context
                    .vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        if merged.channel.is_none() {
            merged.channel = Some(channel_name.to_string());
        }
        merged
    }
}
