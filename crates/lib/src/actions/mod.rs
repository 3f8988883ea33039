//! Actions: named, schema-validated units of work a workflow step runs.
//!
//! Message actions send an envelope to the event's sender and then suspend the run until
//! the subscriber replies (see [`messaging`]).

pub mod messaging;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::ChannelError;
use crate::schema::{Schema, ValidationError};
use crate::settings::SettingsError;
use crate::workflow::{SuspensionRecord, WorkflowContext};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("workflow context has no event")]
    MissingEvent,
    #[error("event has no sender to reply to")]
    MissingRecipient,
    #[error("transport send failed: {0}")]
    TransportSend(#[source] ChannelError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("action timed out after {0} ms")]
    Timeout(u64),
}

impl ActionError {
    /// Only transient failures that happen before anything was sent are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Settings(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("action name `{0}` must be snake_case")]
    InvalidName(String),
    #[error("action `{0}` is already registered")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Completed(Value),
    Suspended(SuspensionRecord),
}

pub struct ActionMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn metadata(&self) -> &ActionMetadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    async fn execute(&self, input: &Value, context: &WorkflowContext)
        -> Result<ActionOutcome, ActionError>;
}

/// Per-step execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: RetryPolicy,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff for retryable action failures. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let ms = (self.backoff_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Runs an action under `settings`: each attempt is bounded by the timeout, and retryable
/// failures are retried with backoff until `retries.max_attempts` is reached.
pub async fn run(
    action: &dyn Action,
    input: &Value,
    context: &WorkflowContext,
    settings: &ActionSettings,
) -> Result<ActionOutcome, ActionError> {
    let policy = settings.retries;
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(
            Duration::from_millis(settings.timeout_ms),
            action.execute(input, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(settings.timeout_ms)),
        };
        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "action {} failed ({}); retry {}/{} in {:?}",
                    action.name(),
                    e,
                    attempt,
                    policy.max_attempts - 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn is_snake_case(name: &str) -> bool {
    !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.ends_with('_')
        && !name.contains("__")
}

/// Actions by unique snake_case name.
#[derive(Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in message actions.
    pub fn with_messaging_actions() -> Self {
        let mut registry = Self::new();
        for action in messaging::builtin_actions() {
            if let Err(e) = registry.register(action) {
                log::error!("builtin action rejected: {}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let name = action.name().to_string();
        if !is_snake_case(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.actions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn list(&self) -> impl Iterator<Item = &ActionMetadata> {
        self.actions.values().map(|a| a.metadata())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::services;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        metadata: ActionMetadata,
        calls: AtomicU32,
        error: fn() -> ActionError,
    }

    impl Flaky {
        fn new(name: &str, error: fn() -> ActionError) -> Self {
            Self {
                metadata: ActionMetadata {
                    name: name.to_string(),
                    description: "fails every time".to_string(),
                    input_schema: Schema::default(),
                    output_schema: Schema::default(),
                },
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl Action for Flaky {
        fn metadata(&self) -> &ActionMetadata {
            &self.metadata
        }

        async fn execute(&self, _input: &Value, _context: &WorkflowContext) -> Result<ActionOutcome, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    #[tokio::test]
    async fn retries_only_retryable_errors() {
        let context = WorkflowContext::new("c1", services().await);
        let settings = ActionSettings {
            timeout_ms: 1000,
            retries: RetryPolicy {
                max_attempts: 3,
                backoff_ms: 1,
                ..Default::default()
            },
        };

        let flaky = Flaky::new("flaky", || {
            ActionError::Settings(SettingsError::Unavailable("db down".to_string()))
        });
        assert!(run(&flaky, &json!({}), &context, &settings).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

        let failing = Flaky::new("failing", || {
            ActionError::TransportSend(ChannelError::TransportSend("closed".to_string()))
        });
        assert!(run(&failing, &json!({}), &context, &settings).await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_ms: 100,
            multiplier: 3.0,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn settings_parse_from_flow_json() {
        let settings: ActionSettings =
            serde_json::from_value(json!({"timeoutMs": 50, "retries": {"maxAttempts": 4}})).unwrap();
        assert_eq!(settings.timeout_ms, 50);
        assert_eq!(settings.retries.max_attempts, 4);
        assert_eq!(settings.retries.backoff_ms, 200);
    }

    #[test]
    fn registry_enforces_unique_snake_case_names() {
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(Flaky::new("send_thing", || ActionError::MissingEvent)))
            .unwrap();
        assert!(matches!(
            registry.register(Arc::new(Flaky::new("send_thing", || ActionError::MissingEvent))),
            Err(RegistryError::Duplicate(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(Flaky::new("SendThing", || ActionError::MissingEvent))),
            Err(RegistryError::InvalidName(_))
        ));
        assert!(registry.get("send_thing").is_some());
    }

    #[test]
    fn builtin_actions_are_registered() {
        let registry = ActionRegistry::with_messaging_actions();
        let names: Vec<&str> = registry.list().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "send_attachment",
                "send_buttons",
                "send_quick_replies",
                "send_text_message"
            ]
        );
    }
}
