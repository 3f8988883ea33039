//! Workflow execution: flows of action steps that suspend on every message sent and
//! resume when the subscriber replies.

mod context;
mod flow;
mod runner;
mod suspension;

pub use context::{Services, WorkflowContext, WorkflowHandle};
pub use flow::{Flow, FlowStep};
pub use runner::{conversation_id, spawn_dispatcher, RunStatus, WorkflowError, WorkflowRunner};
pub use suspension::{
    PendingRun, SuspensionData, SuspensionRecord, SuspensionStore, AWAITING_USER_RESPONSE,
};

#[cfg(test)]
pub(crate) mod testing {
    use super::Services;
    use crate::bus::EventBus;
    use crate::i18n::Catalog;
    use crate::settings::{SettingStore, SettingsCache};
    use serde_json::json;
    use std::sync::Arc;

    pub async fn services() -> Services {
        let bus = EventBus::new();
        let store = Arc::new(SettingStore::new(Some(bus.clone())));
        store
            .seed_if_not_exist(
                "contact",
                vec![("contact_email", json!("hello@acme.test"))],
            )
            .await;
        let settings = Arc::new(SettingsCache::new(store));
        bus.subscribe(settings.clone()).await;
        Services {
            settings,
            i18n: Arc::new(Catalog::default()),
            bus,
        }
    }
}
