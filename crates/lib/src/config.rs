//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Channel, contact and chatbot sections seed the setting store on startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::workflow::Flow;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (web widget).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Company contact details, exposed to templates as `contact.*`.
    #[serde(default)]
    pub contact: ContactConfig,

    #[serde(default)]
    pub i18n: I18nConfig,

    /// Workflows the runner can start. When empty, a built-in welcome flow is used.
    #[serde(default)]
    pub flows: Vec<Flow>,

    /// Flow started for conversations without a pending suspension.
    #[serde(default)]
    pub default_flow: Option<String>,

    /// Where pending suspensions are persisted. Defaults to `suspensions.json` next to the config.
    #[serde(default)]
    pub suspensions_path: Option<PathBuf>,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 15160).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    15160
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub web: WebChannelConfig,
}

/// Web widget channel config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChannelConfig {
    /// Comma-separated origins allowed to call the webhook. Overridden by PARLEY_ALLOWED_DOMAINS.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: String,
    /// Comma-separated mime types accepted for uploads.
    #[serde(default = "default_allowed_upload_types")]
    pub allowed_upload_types: String,
    /// Maximum upload size in bytes.
    #[serde(default = "default_allowed_upload_size")]
    pub allowed_upload_size: u64,
    /// Directory uploaded files are written to (default ~/.parley/uploads).
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default = "default_greeting_message")]
    pub greeting_message: String,
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default)]
    pub show_emoji: bool,
    #[serde(default = "default_true")]
    pub show_file: bool,
    #[serde(default = "default_true")]
    pub show_location: bool,
}

fn default_allowed_domains() -> String {
    "http://localhost:8080,http://localhost:5173".to_string()
}

fn default_allowed_upload_types() -> String {
    "image/png,image/jpeg,image/gif,audio/mpeg,video/mp4,application/pdf".to_string()
}

fn default_allowed_upload_size() -> u64 {
    2_500_000
}

fn default_greeting_message() -> String {
    "Welcome {context.user.first_name}! How can we help you today?".to_string()
}

fn default_window_title() -> String {
    "Live Chat".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WebChannelConfig {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
            allowed_upload_types: default_allowed_upload_types(),
            allowed_upload_size: default_allowed_upload_size(),
            upload_dir: None,
            greeting_message: default_greeting_message(),
            window_title: default_window_title(),
            show_emoji: false,
            show_file: true,
            show_location: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactConfig {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub company_phone: String,
    #[serde(default)]
    pub company_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct I18nConfig {
    #[serde(default = "default_language")]
    pub default_language: String,
    /// language -> (source text -> translation)
    #[serde(default)]
    pub catalogs: HashMap<String, HashMap<String, String>>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            catalogs: HashMap::new(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the web channel's allowed domains: env PARLEY_ALLOWED_DOMAINS overrides config.
pub fn resolve_allowed_domains(config: &Config) -> String {
    non_empty_env("PARLEY_ALLOWED_DOMAINS")
        .unwrap_or_else(|| config.channels.web.allowed_domains.clone())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".parley").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn resolve_relative(path: &Path, config_path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_parent(config_path).join(path)
    }
}

/// Upload directory: `channels.web.uploadDir` (relative to the config file) or `uploads` next to it.
pub fn resolve_upload_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.channels.web.upload_dir {
        Some(d) if !d.as_os_str().is_empty() => resolve_relative(d, config_path),
        _ => config_parent(config_path).join("uploads"),
    }
}

/// Suspension file: `suspensionsPath` (relative to the config file) or `suspensions.json` next to it.
pub fn resolve_suspensions_path(config: &Config, config_path: &Path) -> PathBuf {
    match &config.suspensions_path {
        Some(p) if !p.as_os_str().is_empty() => resolve_relative(p, config_path),
        _ => config_parent(config_path).join("suspensions.json"),
    }
}

/// Load config from the default path (or PARLEY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving relative paths).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
