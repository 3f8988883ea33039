//! Runs flows for conversations and dispatches inbound events to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{Flow, PendingRun, Services, SuspensionRecord, SuspensionStore, WorkflowContext};
use crate::actions::{self, ActionError, ActionOutcome, ActionRegistry};
use crate::bus::BusEvent;
use crate::channels::Event;
use crate::context::StoredContext;
use crate::message::{EventType, Payload};

/// How long a conversation lane stays alive without events.
const LANE_IDLE: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("event has no sender")]
    MissingSender,
    #[error("flow `{0}` not found")]
    UnknownFlow(String),
    #[error("action `{0}` is not registered")]
    UnknownAction(String),
    #[error("step {step} ({action}) failed: {source}")]
    Step {
        step: usize,
        action: String,
        #[source]
        source: ActionError,
    },
    #[error("persisting suspension failed: {0}")]
    Persist(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Not a message event; nothing ran.
    Ignored,
    Suspended(SuspensionRecord),
    Finished,
}

/// Conversation key: `<channel>:<sender foreign id>`.
pub fn conversation_id(event: &Event) -> Option<String> {
    event
        .sender()
        .map(|s| format!("{}:{}", event.channel(), s.foreign_id))
}

pub struct WorkflowRunner {
    actions: Arc<ActionRegistry>,
    flows: HashMap<String, Flow>,
    default_flow: String,
    suspensions: Arc<SuspensionStore>,
    services: Services,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowRunner {
    /// Checks that the default flow exists and every step names a registered action.
    pub fn new(
        actions: Arc<ActionRegistry>,
        flows: Vec<Flow>,
        default_flow: Option<String>,
        suspensions: Arc<SuspensionStore>,
        services: Services,
    ) -> Result<Self, WorkflowError> {
        let default_flow = default_flow
            .or_else(|| flows.first().map(|f| f.name.clone()))
            .ok_or_else(|| WorkflowError::UnknownFlow("<none configured>".to_string()))?;
        for flow in &flows {
            for step in &flow.steps {
                if actions.get(&step.action).is_none() {
                    return Err(WorkflowError::UnknownAction(step.action.clone()));
                }
            }
        }
        let flows: HashMap<String, Flow> = flows.into_iter().map(|f| (f.name.clone(), f)).collect();
        if !flows.contains_key(&default_flow) {
            return Err(WorkflowError::UnknownFlow(default_flow));
        }
        Ok(Self {
            actions,
            flows,
            default_flow,
            suspensions,
            services,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    async fn lock_for(&self, conversation: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, l| Arc::strong_count(l) > 1);
        locks.entry(conversation.to_string()).or_default().clone()
    }

    /// Runs the conversation of `event` until the next suspension or the end of its flow.
    /// Events of one conversation are processed one at a time.
    pub async fn handle_event(&self, event: Event) -> Result<RunStatus, WorkflowError> {
        if event.event_type() != EventType::Message {
            return Ok(RunStatus::Ignored);
        }
        let conversation = conversation_id(&event).ok_or(WorkflowError::MissingSender)?;
        let lock = self.lock_for(&conversation).await;
        let _guard = lock.lock().await;
        let event = Arc::new(event);

        // The pending run stays stored until the flow suspends again or ends, so a failed
        // step can be retried by the next reply.
        let mut pending = self.suspensions.get(&conversation).await;
        if let Some(flow) = pending
            .as_ref()
            .map(|run| run.flow.clone())
            .filter(|flow| !self.flows.contains_key(flow))
        {
            log::warn!("conversation {}: dropping run of unknown flow {}", conversation, flow);
            self.suspensions.take(&conversation).await?;
            pending = None;
        }
        let resuming = pending.is_some();

        let (flow_name, start, stored, mut outputs, resume_data) = match pending {
            Some(run) => self.resume(&conversation, run, &event),
            None => {
                let stored = StoredContext {
                    channel: Some(event.channel().to_string()),
                    ..Default::default()
                };
                (self.default_flow.clone(), 0, stored, Map::new(), None)
            }
        };
        let flow = self
            .flows
            .get(&flow_name)
            .ok_or_else(|| WorkflowError::UnknownFlow(flow_name.clone()))?;

        for (index, step) in flow.steps.iter().enumerate().skip(start) {
            let action = self
                .actions
                .get(&step.action)
                .ok_or_else(|| WorkflowError::UnknownAction(step.action.clone()))?;
            let mut vars = stored.vars.clone();
            vars.insert("outputs".to_string(), Value::Object(outputs.clone()));
            let ctx = WorkflowContext::new(conversation.clone(), self.services.clone())
                .with_event(event.clone())
                .with_chat_context(StoredContext {
                    vars,
                    ..stored.clone()
                })
                .with_resume_data(resume_data.clone());

            log::debug!("conversation {}: {} step {} ({})", conversation, flow.name, index, step.action);
            let outcome = actions::run(action.as_ref(), &step.input, &ctx, &step.settings)
                .await
                .map_err(|source| WorkflowError::Step {
                    step: index,
                    action: step.action.clone(),
                    source,
                })?;
            match outcome {
                ActionOutcome::Completed(output) => {
                    outputs.insert(step.output_key(index), output);
                }
                ActionOutcome::Suspended(record) => {
                    self.suspensions
                        .put(
                            &conversation,
                            PendingRun {
                                flow: flow.name.clone(),
                                step: index,
                                record: record.clone(),
                                context: stored,
                                outputs,
                            },
                        )
                        .await?;
                    self.services.bus.emit(BusEvent::WorkflowSuspended {
                        record: record.clone(),
                    });
                    return Ok(RunStatus::Suspended(record));
                }
            }
        }
        if resuming {
            self.suspensions.take(&conversation).await?;
        }
        log::debug!("conversation {}: flow {} finished", conversation, flow.name);
        Ok(RunStatus::Finished)
    }

    /// Binds the reply to the suspended step and returns where to continue.
    fn resume(
        &self,
        conversation: &str,
        run: PendingRun,
        event: &Event,
    ) -> (String, usize, StoredContext, Map<String, Value>, Option<Value>) {
        let PendingRun {
            flow,
            step,
            record,
            mut context,
            mut outputs,
        } = run;
        if record.data.channel != event.channel() {
            log::warn!(
                "conversation {}: reply on {} to a message sent on {}",
                conversation,
                event.channel(),
                record.data.channel
            );
        }
        let reply = json!(event.message());
        let key = self
            .flows
            .get(&flow)
            .and_then(|f| f.steps.get(step))
            .map(|s| s.output_key(step))
            .unwrap_or_else(|| format!("step_{}", step));
        outputs.insert(key, reply.clone());
        if let Some(Payload::Location { coordinates }) = event.payload() {
            context.user_location = Some((*coordinates).into());
        }
        self.services.bus.emit(BusEvent::WorkflowResumed {
            conversation_id: conversation.to_string(),
        });
        (flow, step + 1, context, outputs, Some(reply))
    }
}

fn spawn_lane(runner: Arc<WorkflowRunner>) -> mpsc::UnboundedSender<Event> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        loop {
            let event = match tokio::time::timeout(LANE_IDLE, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    rx.close();
                    while let Ok(event) = rx.try_recv() {
                        process(&runner, event).await;
                    }
                    break;
                }
            };
            process(&runner, event).await;
        }
    });
    tx
}

async fn process(runner: &WorkflowRunner, event: Event) {
    match runner.handle_event(event).await {
        Ok(RunStatus::Suspended(record)) => {
            log::debug!("conversation {} awaiting reply", record.data.conversation_id)
        }
        Ok(_) => {}
        Err(e) => log::error!("workflow run failed: {}", e),
    }
}

/// Consumes the inbound queue. Conversations run concurrently; events of one conversation
/// are handled in arrival order.
pub fn spawn_dispatcher(runner: Arc<WorkflowRunner>, mut rx: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lanes: HashMap<String, mpsc::UnboundedSender<Event>> = HashMap::new();
        while let Some(event) = rx.recv().await {
            let Some(conversation) = conversation_id(&event) else {
                log::warn!("dropping {} event without sender", event.channel());
                continue;
            };
            lanes.retain(|_, tx| !tx.is_closed());
            let tx = lanes
                .entry(conversation.clone())
                .or_insert_with(|| spawn_lane(runner.clone()));
            if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                let fresh = spawn_lane(runner.clone());
                if fresh.send(event).is_err() {
                    log::error!("conversation {}: lane unavailable", conversation);
                }
                lanes.insert(conversation, fresh);
            }
        }
        log::debug!("inbound queue closed; dispatcher stopping");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::{text_event, RecordingChannel};
    use crate::message::Envelope;
    use crate::workflow::testing::services;

    fn runner(suspensions: Arc<SuspensionStore>, services: Services) -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::new(ActionRegistry::with_messaging_actions()),
            vec![Flow::welcome("Welcome {context.user.first_name}!")],
            None,
            suspensions,
            services,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn suspends_at_each_message_and_resumes_on_reply() {
        let suspensions = Arc::new(SuspensionStore::in_memory());
        let runner = runner(suspensions.clone(), services().await);
        let channel = RecordingChannel::new("web-channel");

        let status = runner
            .handle_event(text_event(channel.clone(), "web-1", "hi"))
            .await
            .unwrap();
        let RunStatus::Suspended(record) = status else {
            panic!("expected suspension");
        };
        assert_eq!(record.data.conversation_id, "web-channel:web-1");
        assert_eq!(suspensions.get("web-channel:web-1").await.map(|r| r.step), Some(0));
        assert_eq!(
            channel.sent()[0].message_value()["text"],
            "Welcome Ada!"
        );

        let status = runner
            .handle_event(text_event(channel.clone(), "web-1", "ok"))
            .await
            .unwrap();
        assert!(matches!(status, RunStatus::Suspended(_)));
        let pending = suspensions.get("web-channel:web-1").await.unwrap();
        assert_eq!(pending.step, 1);
        assert_eq!(pending.outputs["step_0"], json!({"text": "ok"}));
        assert!(matches!(channel.sent()[1], Envelope::QuickReplies(_)));

        let status = runner
            .handle_event(text_event(channel.clone(), "web-1", "Contact us"))
            .await
            .unwrap();
        assert!(matches!(status, RunStatus::Suspended(_)));
        let text = channel.sent()[2].message_value()["text"].clone();
        assert!(text.as_str().unwrap().contains("hello@acme.test"));

        let status = runner
            .handle_event(text_event(channel.clone(), "web-1", "bye"))
            .await
            .unwrap();
        assert_eq!(status, RunStatus::Finished);
        assert_eq!(suspensions.len().await, 0);
    }

    #[tokio::test]
    async fn conversations_are_independent() {
        let suspensions = Arc::new(SuspensionStore::in_memory());
        let runner = runner(suspensions.clone(), services().await);
        let channel = RecordingChannel::new("web-channel");
        runner
            .handle_event(text_event(channel.clone(), "web-1", "hi"))
            .await
            .unwrap();
        runner
            .handle_event(text_event(channel.clone(), "web-2", "hi"))
            .await
            .unwrap();
        assert_eq!(suspensions.get("web-channel:web-1").await.map(|r| r.step), Some(0));
        assert_eq!(suspensions.get("web-channel:web-2").await.map(|r| r.step), Some(0));
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_suspension() {
        let suspensions = Arc::new(SuspensionStore::in_memory());
        let runner = runner(suspensions.clone(), services().await);
        let err = runner
            .handle_event(text_event(RecordingChannel::failing("web-channel"), "web-1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Step {
                source: ActionError::TransportSend(_),
                ..
            }
        ));
        assert_eq!(suspensions.len().await, 0);
    }

    #[tokio::test]
    async fn failed_reply_keeps_the_pending_run_for_the_next_reply() {
        let suspensions = Arc::new(SuspensionStore::in_memory());
        let runner = runner(suspensions.clone(), services().await);
        let channel = RecordingChannel::new("web-channel");
        runner
            .handle_event(text_event(channel.clone(), "web-1", "hi"))
            .await
            .unwrap();

        let err = runner
            .handle_event(text_event(RecordingChannel::failing("web-channel"), "web-1", "ok"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Step { step: 1, .. }));
        let pending = suspensions.get("web-channel:web-1").await.unwrap();
        assert_eq!(pending.step, 0);
        assert!(pending.outputs.is_empty());

        let status = runner
            .handle_event(text_event(channel.clone(), "web-1", "ok again"))
            .await
            .unwrap();
        assert!(matches!(status, RunStatus::Suspended(_)));
        let pending = suspensions.get("web-channel:web-1").await.unwrap();
        assert_eq!(pending.step, 1);
        assert_eq!(pending.outputs["step_0"], json!({"text": "ok again"}));
        assert_eq!(channel.sent().len(), 2);
        assert!(matches!(channel.sent()[1], Envelope::QuickReplies(_)));
    }

    #[tokio::test]
    async fn unknown_actions_are_rejected_up_front() {
        let mut flow = Flow::welcome("hi");
        flow.steps[0].action = "send_fax".to_string();
        let result = WorkflowRunner::new(
            Arc::new(ActionRegistry::with_messaging_actions()),
            vec![flow],
            None,
            Arc::new(SuspensionStore::in_memory()),
            services().await,
        );
        assert!(matches!(result, Err(WorkflowError::UnknownAction(a)) if a == "send_fax"));
    }

    #[tokio::test]
    async fn dispatcher_processes_queued_events() {
        let suspensions = Arc::new(SuspensionStore::in_memory());
        let runner = Arc::new(runner(suspensions.clone(), services().await));
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_dispatcher(runner, rx);
        let channel = RecordingChannel::new("web-channel");
        tx.send(text_event(channel.clone(), "web-1", "hi")).await.unwrap();
        tx.send(text_event(channel.clone(), "web-1", "ok")).await.unwrap();
        for _ in 0..100 {
            if channel.sent().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(channel.sent()[0], Envelope::Text(_)));
        assert!(matches!(channel.sent()[1], Envelope::QuickReplies(_)));
        drop(tx);
        handle.await.unwrap();
    }
}
