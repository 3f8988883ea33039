use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actions::ActionSettings;

/// One step of a flow: which action to run with which input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    /// Key under which the step's output is kept; defaults to `step_<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub settings: ActionSettings,
}

impl FlowStep {
    pub fn output_key(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("step_{}", index))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    pub steps: Vec<FlowStep>,
}

impl Flow {
    /// Flow used when none is configured: greet, offer choices, acknowledge.
    pub fn welcome(greeting: &str) -> Self {
        let step = |action: &str, input: serde_json::Value| FlowStep {
            id: None,
            action: action.to_string(),
            input,
            settings: ActionSettings::default(),
        };
        Self {
            name: "welcome".to_string(),
            steps: vec![
                step("send_text_message", json!({"text": greeting})),
                step(
                    "send_quick_replies",
                    json!({
                        "text": "What would you like to do?",
                        "quick_replies": [
                            {"content_type": "text", "title": "Contact us", "payload": "CONTACT"},
                            {"content_type": "text", "title": "Just browsing", "payload": "BROWSE"}
                        ]
                    }),
                ),
                step(
                    "send_text_message",
                    json!({"text": [
                        "Thanks {context.user.first_name}, you can reach us at {contact.contact_email}.",
                        "Noted, {context.user.first_name}. Write to {contact.contact_email} anytime."
                    ]}),
                ),
            ],
        }
    }
}
