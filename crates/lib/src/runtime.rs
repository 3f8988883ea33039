//! Wires stores, channels, actions and the runner together from a [`Config`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::actions::ActionRegistry;
use crate::attachments::LocalAttachmentStore;
use crate::bus::EventBus;
use crate::channels::web::DOWNLOAD_PATH;
use crate::channels::{ChannelRegistry, Event, WebChannel};
use crate::config::{resolve_suspensions_path, resolve_upload_dir, Config};
use crate::history::MessageLog;
use crate::i18n::Catalog;
use crate::settings::{SettingStore, SettingsCache};
use crate::stats::StatsCounter;
use crate::subscriber::InMemorySubscriberStore;
use crate::workflow::{spawn_dispatcher, Flow, Services, SuspensionStore, WorkflowRunner};

const INBOUND_QUEUE: usize = 256;

pub struct Runtime {
    pub config: Config,
    pub config_path: PathBuf,
    pub bus: Arc<EventBus>,
    pub setting_store: Arc<SettingStore>,
    pub services: Services,
    pub subscribers: Arc<InMemorySubscriberStore>,
    pub messages: Arc<MessageLog>,
    pub stats: Arc<StatsCounter>,
    pub channels: Arc<ChannelRegistry>,
    pub actions: Arc<ActionRegistry>,
    pub suspensions: Arc<SuspensionStore>,
    pub runner: Arc<WorkflowRunner>,
    pub attachments: Arc<LocalAttachmentStore>,
    pub web: Arc<WebChannel>,
}

impl Runtime {
    /// Builds everything and starts the inbound dispatcher. Must run inside a Tokio runtime.
    pub async fn start(config: Config, config_path: PathBuf) -> Result<Self> {
        let bus = EventBus::new();
        let setting_store = Arc::new(SettingStore::from_config(&config, Some(bus.clone())).await);
        let settings = Arc::new(SettingsCache::new(setting_store.clone()));
        bus.subscribe(settings.clone()).await;
        log::info!(
            "allowed origins: {}",
            settings.get_settings().await?.allowed_origins().join(", ")
        );

        let messages = Arc::new(MessageLog::default());
        bus.subscribe(messages.clone()).await;
        let stats = Arc::new(StatsCounter::new());
        bus.subscribe(stats.clone()).await;

        let i18n = Arc::new(Catalog {
            default_language: config.i18n.default_language.clone(),
            catalogs: config.i18n.catalogs.clone(),
        });
        let services = Services {
            settings: settings.clone(),
            i18n: i18n.clone(),
            bus: bus.clone(),
        };

        let actions = Arc::new(ActionRegistry::with_messaging_actions());
        let suspensions_path = resolve_suspensions_path(&config, &config_path);
        let suspensions = Arc::new(SuspensionStore::load(&suspensions_path).await);
        log::info!(
            "{} pending conversation(s) loaded from {}",
            suspensions.len().await,
            suspensions_path.display()
        );

        let flows = if config.flows.is_empty() {
            vec![Flow::welcome(&config.channels.web.greeting_message)]
        } else {
            config.flows.clone()
        };
        let runner = Arc::new(
            WorkflowRunner::new(
                actions.clone(),
                flows,
                config.default_flow.clone(),
                suspensions.clone(),
                services.clone(),
            )
            .context("loading flows")?,
        );

        let (inbound_tx, inbound_rx) = mpsc::channel::<Event>(INBOUND_QUEUE);
        spawn_dispatcher(runner.clone(), inbound_rx);

        let subscribers = Arc::new(InMemorySubscriberStore::new());
        let upload_dir = resolve_upload_dir(&config, &config_path);
        let attachments = Arc::new(LocalAttachmentStore::new(upload_dir, DOWNLOAD_PATH));
        let web = WebChannel::new(
            settings,
            i18n,
            subscribers.clone(),
            attachments.clone(),
            bus.clone(),
            inbound_tx,
        );
        let channels = Arc::new(ChannelRegistry::new());
        channels.register(web.clone()).await;

        Ok(Self {
            config,
            config_path,
            bus,
            setting_store,
            services,
            subscribers,
            messages,
            stats,
            channels,
            actions,
            suspensions,
            runner,
            attachments,
            web,
        })
    }
}
