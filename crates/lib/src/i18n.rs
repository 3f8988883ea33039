//! Translation catalogs keyed by language.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions<'a> {
    pub lang: Option<&'a str>,
    pub default_value: Option<&'a str>,
}

impl<'a> TranslateOptions<'a> {
    pub fn lang(lang: Option<&'a str>) -> Self {
        Self {
            lang,
            default_value: None,
        }
    }
}

pub trait Translator: Send + Sync {
    /// Returns the translation of `key`, or the default value, or the key itself.
    fn t(&self, key: &str, opts: &TranslateOptions<'_>) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default = "default_language")]
    pub default_language: String,
    /// language -> (source text -> translation)
    #[serde(default)]
    pub catalogs: HashMap<String, HashMap<String, String>>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            catalogs: HashMap::new(),
        }
    }
}

impl Catalog {
    pub fn insert(&mut self, lang: &str, key: &str, value: &str) {
        self.catalogs
            .entry(lang.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

impl Translator for Catalog {
    fn t(&self, key: &str, opts: &TranslateOptions<'_>) -> String {
        let lang = opts
            .lang
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_language);
        self.catalogs
            .get(lang)
            .and_then(|entries| entries.get(key))
            .cloned()
            .or_else(|| opts.default_value.map(str::to_string))
            .unwrap_or_else(|| key.to_string())
    }
}
