use std::sync::{Arc, Mutex};

use crate::bus::EventBus;
use crate::channels::Event;
use crate::context::StoredContext;
use crate::i18n::Translator;
use crate::settings::SettingsCache;

use super::SuspensionRecord;
use crate::actions::ActionOutcome;

/// Shared services handed to every action.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<SettingsCache>,
    pub i18n: Arc<dyn Translator>,
    pub bus: Arc<EventBus>,
}

/// Lets an action suspend the run it belongs to.
#[derive(Debug, Default)]
pub struct WorkflowHandle {
    suspended: Mutex<Option<SuspensionRecord>>,
}

impl WorkflowHandle {
    /// Records the suspension and returns the outcome the action should report.
    pub fn suspend(&self, record: SuspensionRecord) -> ActionOutcome {
        if let Ok(mut slot) = self.suspended.lock() {
            *slot = Some(record.clone());
        }
        ActionOutcome::Suspended(record)
    }

    pub fn suspension(&self) -> Option<SuspensionRecord> {
        self.suspended.lock().ok().and_then(|s| s.clone())
    }
}

/// Everything an action sees while running one step of a conversation.
pub struct WorkflowContext {
    pub conversation_id: String,
    pub event: Option<Arc<Event>>,
    pub chat_context: Option<StoredContext>,
    pub services: Services,
    pub workflow: WorkflowHandle,
    /// The reply that resumed this run, if it was resumed.
    pub resume_data: Option<serde_json::Value>,
}

impl WorkflowContext {
    pub fn new(conversation_id: impl Into<String>, services: Services) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            event: None,
            chat_context: None,
            services,
            workflow: WorkflowHandle::default(),
            resume_data: None,
        }
    }

    pub fn with_event(mut self, event: Arc<Event>) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_chat_context(mut self, context: StoredContext) -> Self {
        self.chat_context = Some(context);
        self
    }

    pub fn with_resume_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.resume_data = data;
        self
    }
}
