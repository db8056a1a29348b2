use std::sync::Arc;

use crate::attacher::{ContentAttacher, HeadlessPresenter, MessagePresenter};
use crate::chat::{collect_peer_messages, ChatMessage};
use crate::clock::{Clock, SystemClock};
use crate::config::PhoneConfig;
use crate::generation::{GenerationClient, GenerationError, LlmClient};
use crate::integration::ContentIntegration;
use crate::navigation::{AppLoader, NavigationController, RegistryAppLoader};
use crate::parser::RecordParser;
use crate::records::Record;
use crate::store::{MemoryStateStore, SqliteStateStore, StateStore};
use crate::unread::UnreadTracker;

/// Every service, constructed once at start-up and shared by reference.
pub struct PhoneRuntime {
    pub config: PhoneConfig,
    pub parser: Arc<RecordParser>,
    pub unread: Arc<UnreadTracker>,
    pub attacher: Arc<ContentAttacher>,
    pub navigation: Arc<NavigationController>,
    pub integration: Arc<ContentIntegration>,
}

pub struct PhoneRuntimeBuilder {
    config: PhoneConfig,
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    generator: Option<Arc<dyn GenerationClient>>,
    presenter: Option<Arc<dyn MessagePresenter>>,
    app_loader: Option<Arc<dyn AppLoader>>,
}

impl PhoneRuntimeBuilder {
    pub fn new(config: PhoneConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            generator: None,
            presenter: None,
            app_loader: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn MessagePresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_app_loader(mut self, app_loader: Arc<dyn AppLoader>) -> Self {
        self.app_loader = Some(app_loader);
        self
    }

    pub fn build(self) -> PhoneRuntime {
        let config = self.config;

        let store = self.store.unwrap_or_else(|| open_default_store(&config));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(LlmClient::from_config(&config)) as Arc<dyn GenerationClient>);
        let presenter = self
            .presenter
            .unwrap_or_else(|| Arc::new(HeadlessPresenter::new()) as Arc<dyn MessagePresenter>);
        let app_loader = self
            .app_loader
            .unwrap_or_else(|| Arc::new(RegistryAppLoader::default()) as Arc<dyn AppLoader>);

        let parser = Arc::new(RecordParser::new());
        let unread = Arc::new(UnreadTracker::load(
            store.clone(),
            clock.clone(),
            config.unread_recompute,
        ));
        let attacher = Arc::new(ContentAttacher::new(presenter, clock.clone()));
        let navigation = Arc::new(NavigationController::new(
            app_loader,
            clock,
            config.debounce_window(),
        ));
        let integration = Arc::new(ContentIntegration::new(
            store,
            generator,
            parser.clone(),
            attacher.clone(),
        ));

        tracing::info!(
            "Phone runtime ready (grammar rules: {}, debounce: {}ms)",
            parser.grammar().count(),
            config.debounce_ms
        );

        PhoneRuntime {
            config,
            parser,
            unread,
            attacher,
            navigation,
            integration,
        }
    }
}

impl PhoneRuntime {
    pub fn bootstrap(config: PhoneConfig) -> Self {
        PhoneRuntimeBuilder::new(config).build()
    }

    /// Parse `text`, attach the records to `message` and return them.
    pub async fn ingest(&self, message: &mut ChatMessage, text: &str) -> Vec<Record> {
        let records = self.parser.parse(text);
        self.attacher.attach(message, &records).await;
        records
    }

    /// Ask the generation service for phone content for `message`, waiting
    /// for it to come up first.
    pub async fn generate(
        &self,
        message: &mut ChatMessage,
        context: &str,
    ) -> Result<Vec<Record>, GenerationError> {
        let ready = self
            .integration
            .wait_until_configured(
                self.config.config_wait_attempts,
                self.config.config_wait_interval(),
            )
            .await;
        if !ready {
            return Err(GenerationError::NotConfigured);
        }
        self.integration.generate_for_message(message, context).await
    }

    /// Recount unread messages for every peer seen in `history`.
    pub fn refresh_unread(&self, history: &[ChatMessage]) -> bool {
        let by_peer = collect_peer_messages(&self.parser, history);
        self.unread.batch_recompute(&by_peer)
    }

    /// Flush durable state before the host exits.
    pub fn shutdown(&self) {
        self.unread.persist();
        tracing::info!("Phone runtime shut down");
    }
}

fn open_default_store(config: &PhoneConfig) -> Arc<dyn StateStore> {
    match SqliteStateStore::open(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                "Failed to open state database {}: {}; state will not persist",
                config.database_path,
                e
            );
            Arc::new(MemoryStateStore::new())
        }
    }
}
