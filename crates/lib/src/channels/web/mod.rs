//! Web widget channel: CORS checks, cookie sessions, socket or polling delivery, uploads.

mod render;
mod session;
mod types;
mod wrapper;

pub use session::{
    new_session_id, session_id_from_cookie, SessionId, WebSession, WebSessionStore, SESSION_COOKIE,
};
pub use types::{
    DefaultAction, WebChannelSettings, WebElement, WebEvent, WebFrame, WebIncomingBody,
    WebOutgoingBody, WebOutgoingMessage, WebQuery,
};
pub use wrapper::{parse_web_event, wrap_web_event};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::{
    ChannelData, ChannelError, ChannelHandler, EnvelopeRenderer, Event, PendingUpload,
    SendOptions, SendReceipt,
};
use crate::attachments::AttachmentStore;
use crate::bus::{BusEvent, EventBus, StatsKind};
use crate::context::ConversationContext;
use crate::i18n::Translator;
use crate::message::{AttachmentRef, Envelope, EventType, SentMessage};
use crate::settings::{split_list, SettingsCache, WEB_CHANNEL_GROUP};
use crate::subscriber::{NewSubscriber, Subscriber, SubscriberChannel, SubscriberStore};

pub const WEB_CHANNEL_NAME: &str = "web-channel";
pub const DOWNLOAD_PATH: &str = "/webhook/web/download";
pub const CHATBOT_AUTHOR: &str = "chatbot";
/// Messages kept per polling subscriber; the oldest are dropped first.
pub const POLL_QUEUE_CAPACITY: usize = 100;

/// Result of accepting a raw widget event.
#[derive(Debug)]
pub struct InboundOutcome {
    /// The raw event as echoed back to the widget (mid and author filled in).
    pub echo: WebEvent,
    pub event: Event,
    /// False for status events and for messages already synced from another device.
    pub dispatched: bool,
}

pub fn generate_mid() -> String {
    format!("web-{}", uuid::Uuid::new_v4().simple())
}

pub struct WebChannel {
    settings: Arc<SettingsCache>,
    pub(crate) i18n: Arc<dyn Translator>,
    subscribers: Arc<dyn SubscriberStore>,
    attachments: Arc<dyn AttachmentStore>,
    bus: Arc<EventBus>,
    inbound: mpsc::Sender<Event>,
    pub sessions: WebSessionStore,
    /// subscriber id -> outgoing socket frames
    sockets: RwLock<HashMap<String, mpsc::UnboundedSender<String>>>,
    /// subscriber id -> messages waiting for the next poll
    queues: Mutex<HashMap<String, VecDeque<WebOutgoingMessage>>>,
}

impl WebChannel {
    pub fn new(
        settings: Arc<SettingsCache>,
        i18n: Arc<dyn Translator>,
        subscribers: Arc<dyn SubscriberStore>,
        attachments: Arc<dyn AttachmentStore>,
        bus: Arc<EventBus>,
        inbound: mpsc::Sender<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            i18n,
            subscribers,
            attachments,
            bus,
            inbound,
            sessions: WebSessionStore::new(),
            sockets: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
        })
    }

    pub async fn web_settings(&self) -> Result<WebChannelSettings, ChannelError> {
        let settings = self.settings.get_settings().await?;
        Ok(settings.group_as::<WebChannelSettings>(WEB_CHANNEL_GROUP)?)
    }

    /// Settings exposed to the widget (`?_get=settings`).
    pub async fn widget_settings(&self) -> Result<serde_json::Value, ChannelError> {
        let s = self.web_settings().await?;
        Ok(json!({
            "window_title": s.window_title,
            "greeting_message": s.greeting_message,
            "show_emoji": s.show_emoji,
            "show_file": s.show_file,
            "show_location": s.show_location,
            "allowed_upload_types": s.allowed_upload_types,
            "allowed_upload_size": s.allowed_upload_size,
        }))
    }

    /// Checks `origin` against the allowed domains and writes the CORS response headers.
    ///
    /// Matching is exact on the trimmed, comma-separated list. A rejected origin gets an
    /// empty `Access-Control-Allow-Origin` header and no credentials.
    pub async fn validate_cors(
        &self,
        origin: Option<&str>,
        preflight: bool,
        res: &mut HeaderMap,
    ) -> Result<(), ChannelError> {
        let origin = origin.map(str::trim).unwrap_or("");
        let allowed = match self.web_settings().await {
            Ok(s) => split_list(&s.allowed_domains),
            Err(e) => {
                res.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(""));
                return Err(e);
            }
        };
        let value = (!origin.is_empty() && allowed.iter().any(|d| d == origin))
            .then(|| HeaderValue::from_str(origin).ok())
            .flatten();
        let Some(value) = value else {
            log::debug!("web channel: origin {:?} not allowed", origin);
            res.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(""));
            return Err(ChannelError::CorsRejected {
                origin: origin.to_string(),
            });
        };
        res.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        res.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        res.insert(header::VARY, HeaderValue::from_static("Origin"));
        if preflight {
            res.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            );
            res.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("content-type, x-requested-with"),
            );
        }
        Ok(())
    }

    /// Returns the session's subscriber, creating and persisting one on first contact.
    /// Calling it again for the same session returns the same subscriber.
    pub async fn get_or_create_session(
        &self,
        session: &mut WebSession,
        query: &WebQuery,
        channel_data: ChannelData,
    ) -> Result<Subscriber, ChannelError> {
        if let Some(profile) = &session.profile {
            let refreshed = self
                .subscribers
                .touch(&profile.id, channel_data.clone())
                .await
                .ok_or(ChannelError::SessionNotPersisted)?;
            session.is_socket = channel_data.is_socket;
            session.profile = Some(refreshed.clone());
            return Ok(refreshed);
        }

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        let created = self
            .subscribers
            .create(NewSubscriber {
                foreign_id: generate_mid(),
                first_name: non_empty(&query.first_name).unwrap_or_else(|| "Anon.".to_string()),
                last_name: non_empty(&query.last_name).unwrap_or_else(|| "Web User".to_string()),
                language: non_empty(&query.language),
                locale: None,
                channel: SubscriberChannel {
                    name: WEB_CHANNEL_NAME.to_string(),
                    data: channel_data.clone(),
                },
            })
            .await;
        let persisted = self
            .subscribers
            .find(&created.id)
            .await
            .ok_or(ChannelError::SessionNotPersisted)?;
        log::info!("web channel: new subscriber {}", persisted.foreign_id);
        self.bus.emit(BusEvent::stats(StatsKind::NewUsers, "New Users"));
        session.is_socket = channel_data.is_socket;
        session.profile = Some(persisted.clone());
        Ok(persisted)
    }

    /// Accepts a raw event from a subscribed session and queues message events for the
    /// workflow dispatcher.
    pub async fn handle_inbound(
        self: &Arc<Self>,
        session: &WebSession,
        raw: serde_json::Value,
        channel_data: ChannelData,
    ) -> Result<InboundOutcome, ChannelError> {
        let profile = session
            .profile
            .clone()
            .ok_or_else(|| ChannelError::Unauthorized("no subscriber for this session".to_string()))?;
        if session.is_socket != channel_data.is_socket {
            return Err(ChannelError::Unauthorized(
                "mixed socket and polling requests".to_string(),
            ));
        }

        let mut echo = parse_web_event(raw)?;
        let from_chatbot = echo.sync && echo.author.as_deref() == Some(CHATBOT_AUTHOR);
        echo.mid.get_or_insert_with(generate_mid);
        if !from_chatbot {
            echo.author = Some(profile.foreign_id.clone());
        }

        let subscriber_id = profile.id.clone();
        let handler: Arc<dyn ChannelHandler> = self.clone();
        let mut event = wrap_web_event(handler, &echo, channel_data)?.with_sender(profile);
        if let Some(upload) = event.pending_upload().cloned() {
            let stored = self.store_upload(&upload).await?;
            if let WebIncomingBody::File { data } = &mut echo.body {
                data.url = stored.url.clone();
                data.file = None;
            }
            event = event.resolve_upload(stored);
        }

        if event.event_type() != EventType::Message {
            log::debug!("web channel: {} event", event.event_type().as_str());
            return Ok(InboundOutcome {
                echo,
                event,
                dispatched: false,
            });
        }

        if from_chatbot {
            // Copy of a bot message shown on another device: already delivered and read.
            self.bus.emit(BusEvent::ChatbotSent {
                message: SentMessage {
                    mid: echo.mid.clone().unwrap_or_default(),
                    message: serde_json::to_value(event.message())
                        .map_err(|e| ChannelError::MalformedEvent(e.to_string()))?,
                    recipient: subscriber_id,
                    handover: false,
                    read: true,
                    delivery: true,
                },
                event: None,
            });
            return Ok(InboundOutcome {
                echo,
                event,
                dispatched: false,
            });
        }

        self.bus.emit(BusEvent::ChatbotReceived {
            event: Arc::new(event.clone()),
        });
        self.bus.emit(BusEvent::stats(StatsKind::Incoming, "Incoming"));
        if echo.sync {
            return Ok(InboundOutcome {
                echo,
                event,
                dispatched: false,
            });
        }
        self.inbound
            .send(event.clone())
            .await
            .map_err(|_| ChannelError::InboundClosed)?;
        Ok(InboundOutcome {
            echo,
            event,
            dispatched: true,
        })
    }

    async fn store_upload(&self, upload: &PendingUpload) -> Result<AttachmentRef, ChannelError> {
        let settings = self.web_settings().await?;
        if !split_list(&settings.allowed_upload_types)
            .iter()
            .any(|t| t == &upload.mime)
        {
            return Err(ChannelError::Upload(format!(
                "file type `{}` is not allowed",
                upload.mime
            )));
        }
        if upload.bytes.len() as u64 > settings.allowed_upload_size {
            return Err(ChannelError::Upload(format!(
                "file of {} bytes exceeds the {} byte limit",
                upload.bytes.len(),
                settings.allowed_upload_size
            )));
        }
        self.attachments
            .store(upload)
            .await
            .map_err(|e| ChannelError::Upload(e.to_string()))
    }

    pub async fn attach_socket(&self, subscriber_id: &str, tx: mpsc::UnboundedSender<String>) {
        self.sockets
            .write()
            .await
            .insert(subscriber_id.to_string(), tx);
    }

    pub async fn detach_socket(&self, subscriber_id: &str) {
        self.sockets.write().await.remove(subscriber_id);
    }

    /// Drains the messages queued for a polling subscriber.
    pub async fn poll(&self, subscriber_id: &str) -> Vec<WebOutgoingMessage> {
        self.queues
            .lock()
            .await
            .remove(subscriber_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Ends a widget session and drops what was waiting for its subscriber.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        let Some(handle) = self.sessions.remove(session_id).await else {
            return false;
        };
        let profile = handle.lock().await.profile.clone();
        if let Some(profile) = profile {
            self.queues.lock().await.remove(&profile.id);
            self.detach_socket(&profile.id).await;
            log::debug!("web session {} of {} disconnected", session_id, profile.id);
        }
        true
    }

    async fn broadcast(
        &self,
        subscriber: &Subscriber,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), ChannelError> {
        if !subscriber.channel.data.is_socket {
            return Ok(());
        }
        let tx = self
            .sockets
            .read()
            .await
            .get(&subscriber.id)
            .cloned()
            .ok_or_else(|| {
                ChannelError::TransportSend(format!("no socket for subscriber {}", subscriber.id))
            })?;
        let frame = serde_json::to_string(&WebFrame::event(event, payload))
            .map_err(|e| ChannelError::TransportSend(e.to_string()))?;
        tx.send(frame)
            .map_err(|_| ChannelError::TransportSend("socket closed".to_string()))
    }

    async fn deliver(
        &self,
        subscriber: &Subscriber,
        message: WebOutgoingMessage,
    ) -> Result<(), ChannelError> {
        if subscriber.channel.data.is_socket {
            let payload = serde_json::to_value(&message)
                .map_err(|e| ChannelError::TransportSend(e.to_string()))?;
            return self.broadcast(subscriber, "message", payload).await;
        }
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(subscriber.id.clone()).or_default();
        if queue.len() == POLL_QUEUE_CAPACITY {
            queue.pop_front();
            log::debug!("poll queue of {} full; dropped oldest message", subscriber.id);
        }
        queue.push_back(message);
        Ok(())
    }

    /// Shows the typing indicator for `ms` milliseconds (socket subscribers only).
    pub async fn send_typing_indicator(
        &self,
        subscriber: &Subscriber,
        ms: u64,
    ) -> Result<(), ChannelError> {
        if !subscriber.channel.data.is_socket {
            return Ok(());
        }
        self.broadcast(subscriber, "typing", json!(true)).await?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.broadcast(subscriber, "typing", json!(false)).await
    }
}

#[async_trait]
impl ChannelHandler for WebChannel {
    fn name(&self) -> &str {
        WEB_CHANNEL_NAME
    }

    async fn send_message(
        &self,
        event: &Event,
        envelope: &Envelope,
        options: &SendOptions,
        _context: &ConversationContext,
    ) -> Result<SendReceipt, ChannelError> {
        let subscriber = event
            .sender()
            .ok_or_else(|| ChannelError::TransportSend("event has no sender".to_string()))?;
        let body = self.format_message(envelope, options);
        if let Some(ms) = options.typing_delay_ms(body.text_len()) {
            if let Err(e) = self.send_typing_indicator(subscriber, ms).await {
                log::warn!("web channel: typing indicator failed: {}", e);
            }
        }
        let message = WebOutgoingMessage {
            body,
            mid: generate_mid(),
            author: CHATBOT_AUTHOR.to_string(),
            created_at: Utc::now(),
            handover: options.assign_to.is_some(),
        };
        let mid = message.mid.clone();
        self.deliver(subscriber, message).await?;
        log::debug!("web channel: sent {} to {}", mid, subscriber.foreign_id);
        Ok(SendReceipt { mid: Some(mid) })
    }

    fn stop(&self) {
        log::info!("web channel stopped");
    }
}
