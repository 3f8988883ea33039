//! Settings: grouped key/value entries, a versioned cache, and the typed views channels use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use crate::bus::{BusEvent, BusListener, EventBus};
use crate::config::{resolve_allowed_domains, Config};

pub const WEB_CHANNEL_GROUP: &str = "web_channel";
pub const CONTACT_GROUP: &str = "contact";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings unavailable: {0}")]
    Unavailable(String),
    #[error("invalid settings group `{group}`: {source}")]
    Invalid {
        group: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Snapshot of all settings as `group -> label -> value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    tree: HashMap<String, Map<String, Value>>,
}

impl Settings {
    pub fn from_tree(tree: HashMap<String, Map<String, Value>>) -> Self {
        Self { tree }
    }

    pub fn group(&self, group: &str) -> Option<&Map<String, Value>> {
        self.tree.get(group)
    }

    pub fn get(&self, group: &str, label: &str) -> Option<&Value> {
        self.tree.get(group).and_then(|g| g.get(label))
    }

    /// Deserializes a whole group; a missing group yields `T::default()`.
    pub fn group_as<T: DeserializeOwned + Default>(&self, group: &str) -> Result<T, SettingsError> {
        match self.tree.get(group) {
            None => Ok(T::default()),
            Some(map) => serde_json::from_value(Value::Object(map.clone())).map_err(|source| {
                SettingsError::Invalid {
                    group: group.to_string(),
                    source,
                }
            }),
        }
    }

    /// Every origin listed in an `allowed_domains` setting of any group, de-duplicated in
    /// first-seen order (groups sorted by name).
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut groups: Vec<&String> = self.tree.keys().collect();
        groups.sort();
        let mut origins: Vec<String> = Vec::new();
        for group in groups {
            let Some(Value::String(raw)) = self.get(group, "allowed_domains") else {
                continue;
            };
            for origin in split_list(raw) {
                if !origins.contains(&origin) {
                    origins.push(origin);
                }
            }
        }
        origins
    }

    /// The `contact` group as a JSON object, for template rendering.
    pub fn contact(&self) -> Value {
        self.group(CONTACT_GROUP)
            .map(|m| Value::Object(m.clone()))
            .unwrap_or_else(|| json!({}))
    }
}

/// Splits a comma-separated setting into trimmed, non-empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> Result<Settings, SettingsError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry {
    pub group: String,
    pub label: String,
    pub value: Value,
    pub weight: u32,
}

/// Authoritative setting entries. Updates are announced on the bus.
pub struct SettingStore {
    entries: RwLock<Vec<SettingEntry>>,
    bus: Option<Arc<EventBus>>,
}

impl SettingStore {
    pub fn new(bus: Option<Arc<EventBus>>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Store seeded from the channel, contact and i18n sections of `config`.
    pub async fn from_config(config: &Config, bus: Option<Arc<EventBus>>) -> Self {
        let store = Self::new(bus);
        let web = &config.channels.web;
        let contact = &config.contact;
        store
            .seed_if_not_exist(
                WEB_CHANNEL_GROUP,
                vec![
                    ("allowed_domains", json!(resolve_allowed_domains(config))),
                    ("allowed_upload_types", json!(web.allowed_upload_types)),
                    ("allowed_upload_size", json!(web.allowed_upload_size)),
                    ("greeting_message", json!(web.greeting_message)),
                    ("window_title", json!(web.window_title)),
                    ("show_emoji", json!(web.show_emoji)),
                    ("show_file", json!(web.show_file)),
                    ("show_location", json!(web.show_location)),
                ],
            )
            .await;
        store
            .seed_if_not_exist(
                CONTACT_GROUP,
                vec![
                    ("company_name", json!(contact.company_name)),
                    ("contact_email", json!(contact.contact_email)),
                    ("company_phone", json!(contact.company_phone)),
                    ("company_address", json!(contact.company_address)),
                ],
            )
            .await;
        store
            .seed_if_not_exist(
                "chatbot_settings",
                vec![("default_language", json!(config.i18n.default_language))],
            )
            .await;
        store
    }

    /// Inserts the entries of `group` unless the group already has any.
    pub async fn seed_if_not_exist(&self, group: &str, data: Vec<(&str, Value)>) {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.group == group) {
            return;
        }
        for (weight, (label, value)) in data.into_iter().enumerate() {
            entries.push(SettingEntry {
                group: group.to_string(),
                label: label.to_string(),
                value,
                weight: weight as u32 + 1,
            });
        }
    }

    /// Sets one value and waits for `hook:setting:updated` listeners (cache invalidation).
    pub async fn set(&self, group: &str, label: &str, value: Value) {
        {
            let mut entries = self.entries.write().await;
            match entries
                .iter_mut()
                .find(|e| e.group == group && e.label == label)
            {
                Some(entry) => entry.value = value,
                None => {
                    let weight = entries.iter().filter(|e| e.group == group).count() as u32 + 1;
                    entries.push(SettingEntry {
                        group: group.to_string(),
                        label: label.to_string(),
                        value,
                        weight,
                    });
                }
            }
        }
        if let Some(bus) = &self.bus {
            let event = BusEvent::SettingUpdated {
                group: group.to_string(),
                label: label.to_string(),
            };
            if let Err(e) = bus.emit_async(event).await {
                log::warn!("setting update notification failed: {}", e);
            }
        }
    }

    pub async fn build_tree(&self) -> Settings {
        let entries = self.entries.read().await;
        let mut sorted: Vec<&SettingEntry> = entries.iter().collect();
        sorted.sort_by_key(|e| e.weight);
        let mut tree: HashMap<String, Map<String, Value>> = HashMap::new();
        for entry in sorted {
            tree.entry(entry.group.clone())
                .or_default()
                .insert(entry.label.clone(), entry.value.clone());
        }
        Settings::from_tree(tree)
    }
}

#[async_trait]
impl SettingsSource for SettingStore {
    async fn load(&self) -> Result<Settings, SettingsError> {
        Ok(self.build_tree().await)
    }
}

/// Read-through cache over a [`SettingsSource`], invalidated by `hook:setting:updated`.
pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    version: AtomicU64,
    cached: RwLock<Option<Arc<Settings>>>,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self {
            source,
            version: AtomicU64::new(0),
            cached: RwLock::new(None),
        }
    }

    pub async fn get_settings(&self) -> Result<Arc<Settings>, SettingsError> {
        if let Some(settings) = self.cached.read().await.as_ref() {
            return Ok(settings.clone());
        }
        let mut cached = self.cached.write().await;
        if let Some(settings) = cached.as_ref() {
            return Ok(settings.clone());
        }
        let settings = Arc::new(self.source.load().await?);
        *cached = Some(settings.clone());
        Ok(settings)
    }

    pub async fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        *self.cached.write().await = None;
    }

    /// Number of invalidations so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusListener for SettingsCache {
    async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
        if let BusEvent::SettingUpdated { group, label } = event {
            log::debug!("setting {}.{} updated; invalidating cache", group, label);
            self.invalidate().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allowed_origins_are_collected_across_groups() {
        let store = SettingStore::new(None);
        store
            .seed_if_not_exist(
                WEB_CHANNEL_GROUP,
                vec![("allowed_domains", json!("https://a.com, https://b.com"))],
            )
            .await;
        store
            .seed_if_not_exist("admin_channel", vec![("allowed_domains", json!("https://b.com,https://c.com"))])
            .await;
        let origins = store.build_tree().await.allowed_origins();
        assert_eq!(origins, vec!["https://b.com", "https://c.com", "https://a.com"]);
    }

    #[tokio::test]
    async fn seed_is_skipped_for_existing_group() {
        let store = SettingStore::new(None);
        store
            .seed_if_not_exist("contact", vec![("company_name", json!("Acme"))])
            .await;
        store
            .seed_if_not_exist("contact", vec![("company_name", json!("Other"))])
            .await;
        let tree = store.build_tree().await;
        assert_eq!(tree.get("contact", "company_name"), Some(&json!("Acme")));
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_setting_update() {
        let bus = EventBus::new();
        let store = Arc::new(SettingStore::new(Some(bus.clone())));
        store
            .seed_if_not_exist(WEB_CHANNEL_GROUP, vec![("allowed_domains", json!("https://a.com"))])
            .await;
        let cache = Arc::new(SettingsCache::new(store.clone()));
        bus.subscribe(cache.clone()).await;

        let before = cache.get_settings().await.unwrap();
        assert_eq!(
            before.get(WEB_CHANNEL_GROUP, "allowed_domains"),
            Some(&json!("https://a.com"))
        );

        store
            .set(WEB_CHANNEL_GROUP, "allowed_domains", json!("https://b.com"))
            .await;
        assert_eq!(cache.version(), 1);
        let after = cache.get_settings().await.unwrap();
        assert_eq!(
            after.get(WEB_CHANNEL_GROUP, "allowed_domains"),
            Some(&json!("https://b.com"))
        );
    }

    #[tokio::test]
    async fn from_config_seeds_web_and_contact() {
        let mut config = Config::default();
        config.contact.company_name = "Acme".to_string();
        let store = SettingStore::from_config(&config, None).await;
        let tree = store.build_tree().await;
        assert_eq!(tree.contact()["company_name"], "Acme");
        assert!(tree.get(WEB_CHANNEL_GROUP, "allowed_upload_size").is_some());
    }

    #[test]
    fn split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" https://a.com , ,https://b.com"),
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
    }
}
