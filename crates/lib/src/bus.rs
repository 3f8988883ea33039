//! In-process event bus for side effects (stats, message log, cache invalidation).
//!
//! `emit` is fire-and-forget: events are queued to a background worker and delivered to
//! listeners in emission order. `emit_async` goes through the same queue and waits until
//! its event (and everything emitted before it) has been delivered.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::channels::Event;
use crate::message::SentMessage;
use crate::workflow::SuspensionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsKind {
    Incoming,
    Outgoing,
    AllMessages,
    NewUsers,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    StatsEntry {
        kind: StatsKind,
        label: String,
    },
    ChatbotSent {
        message: SentMessage,
        event: Option<Arc<Event>>,
    },
    ChatbotReceived {
        event: Arc<Event>,
    },
    SettingUpdated {
        group: String,
        label: String,
    },
    WorkflowSuspended {
        record: SuspensionRecord,
    },
    WorkflowResumed {
        conversation_id: String,
    },
}

impl BusEvent {
    pub fn stats(kind: StatsKind, label: &str) -> Self {
        BusEvent::StatsEntry {
            kind,
            label: label.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::StatsEntry { .. } => "hook:stats:entry",
            BusEvent::ChatbotSent { .. } => "hook:chatbot:sent",
            BusEvent::ChatbotReceived { .. } => "hook:chatbot:received",
            BusEvent::SettingUpdated { .. } => "hook:setting:updated",
            BusEvent::WorkflowSuspended { .. } => "hook:workflow:suspended",
            BusEvent::WorkflowResumed { .. } => "hook:workflow:resumed",
        }
    }
}

#[async_trait]
pub trait BusListener: Send + Sync {
    async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()>;
}

type Listeners = Arc<RwLock<Vec<Arc<dyn BusListener>>>>;

enum Delivery {
    Emit(BusEvent),
    /// Delivered after everything queued before it; the first listener error is sent back.
    Await(BusEvent, oneshot::Sender<anyhow::Result<()>>),
}

pub struct EventBus {
    listeners: Listeners,
    tx: mpsc::UnboundedSender<Delivery>,
}

async fn deliver(listeners: &Listeners, event: &BusEvent) -> anyhow::Result<()> {
    let snapshot = listeners.read().await.clone();
    let mut first_err = None;
    for listener in snapshot {
        if let Err(e) = listener.on_event(event).await {
            log::warn!("bus listener failed on {}: {}", event.name(), e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl EventBus {
    /// Creates the bus and spawns its delivery worker; must be called inside a Tokio runtime.
    pub fn new() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        let worker_listeners = listeners.clone();
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Emit(event) => {
                        let _ = deliver(&worker_listeners, &event).await;
                    }
                    Delivery::Await(event, reply) => {
                        let result = deliver(&worker_listeners, &event).await;
                        let _ = reply.send(result);
                    }
                }
            }
        });
        Arc::new(Self { listeners, tx })
    }

    pub async fn subscribe(&self, listener: Arc<dyn BusListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Queues an event without waiting. Failures are logged, never returned.
    pub fn emit(&self, event: BusEvent) {
        let name = event.name();
        if self.tx.send(Delivery::Emit(event)).is_err() {
            log::warn!("event bus closed; dropped {}", name);
        }
    }

    /// Delivers an event to every listener and waits for them. Events emitted earlier are
    /// delivered first. All listeners run; the first failure is returned.
    pub async fn emit_async(&self, event: BusEvent) -> anyhow::Result<()> {
        let name = event.name();
        let (reply, done) = oneshot::channel();
        if self.tx.send(Delivery::Await(event, reply)).is_err() {
            anyhow::bail!("event bus closed; dropped {}", name);
        }
        done.await
            .map_err(|_| anyhow::anyhow!("event bus stopped before delivering {}", name))?
    }
}

/// Listener that records event names; used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingListener {
        pub seen: Mutex<Vec<String>>,
        pub fail_on: Option<&'static str>,
    }

    impl RecordingListener {
        pub async fn names(&self) -> Vec<String> {
            self.seen.lock().await.clone()
        }
    }

    #[async_trait]
    impl BusListener for RecordingListener {
        async fn on_event(&self, event: &BusEvent) -> anyhow::Result<()> {
            let label = match event {
                BusEvent::StatsEntry { label, .. } => format!("{}:{}", event.name(), label),
                _ => event.name().to_string(),
            };
            self.seen.lock().await.push(label);
            if self.fail_on == Some(event.name()) {
                anyhow::bail!("listener refused {}", event.name());
            }
            Ok(())
        }
    }

    /// Waits until the background worker has drained everything queued so far.
    pub async fn flush(listener: &RecordingListener, expected: usize) {
        for _ in 0..100 {
            if listener.seen.lock().await.len() >= expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{flush, RecordingListener};
    use super::*;

    #[tokio::test]
    async fn emit_delivers_in_order() {
        let bus = EventBus::new();
        let listener = Arc::new(RecordingListener::default());
        bus.subscribe(listener.clone()).await;

        bus.emit(BusEvent::stats(StatsKind::Outgoing, "Outgoing"));
        bus.emit(BusEvent::stats(StatsKind::AllMessages, "All Messages"));
        flush(&listener, 2).await;

        assert_eq!(
            listener.names().await,
            vec![
                "hook:stats:entry:Outgoing".to_string(),
                "hook:stats:entry:All Messages".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn emit_async_waits_for_earlier_emits() {
        let bus = EventBus::new();
        let listener = Arc::new(RecordingListener::default());
        bus.subscribe(listener.clone()).await;

        bus.emit(BusEvent::stats(StatsKind::Outgoing, "Outgoing"));
        bus.emit(BusEvent::stats(StatsKind::AllMessages, "All Messages"));
        bus.emit_async(BusEvent::WorkflowResumed {
            conversation_id: "web-channel:u1".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            listener.names().await,
            vec![
                "hook:stats:entry:Outgoing".to_string(),
                "hook:stats:entry:All Messages".to_string(),
                "hook:workflow:resumed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn emit_async_runs_all_listeners_and_reports_failure() {
        let bus = EventBus::new();
        let failing = Arc::new(RecordingListener {
            fail_on: Some("hook:setting:updated"),
            ..Default::default()
        });
        let healthy = Arc::new(RecordingListener::default());
        bus.subscribe(failing.clone()).await;
        bus.subscribe(healthy.clone()).await;

        let result = bus
            .emit_async(BusEvent::SettingUpdated {
                group: "chatbot_settings".to_string(),
                label: "greeting".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(healthy.names().await, vec!["hook:setting:updated".to_string()]);
    }
}
