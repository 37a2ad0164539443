pub mod config;
pub mod db;
pub mod models;
pub mod normalize;
pub mod observer;
pub mod overlay;
pub mod page;
pub mod platform;
pub mod popup;
pub mod relay;
pub mod remote;
pub mod scheduler;
pub mod scraping;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use models::{EventRecord, Location, PartialEventRecord};
pub use platform::{classify, PlatformTag};

use config::{AppConfig, ConfigStore};
use db::Store;
use overlay::OverlayPresenter;
use page::PageAgent;
use relay::Relay;
use remote::EventsApi;
use scraping::ExtractionSettings;

/// Background services sharing one store: relay, overlay and the refresh
/// heartbeat.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub relay: Arc<Relay>,
    pub overlay: Arc<OverlayPresenter>,
}

impl App {
    pub fn open() -> anyhow::Result<Self> {
        let config = ConfigStore::load().read();
        let store = Store::open_default().context("failed to open event store")?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AppConfig, store: Store) -> Self {
        let store = Arc::new(store);
        let api = EventsApi::with_reqwest(config.api_base_url.clone());
        let relay = Arc::new(Relay::new(store.clone(), api));
        let overlay = Arc::new(OverlayPresenter::new(&config, store.clone()));
        Self {
            config,
            store,
            relay,
            overlay,
        }
    }

    /// Loads `url` as the active tab and runs one extraction pass over it.
    /// Returns the agent so later requests can reach the page.
    pub async fn open_page(
        &self,
        url: &str,
    ) -> anyhow::Result<(Arc<PageAgent>, Option<EventRecord>)> {
        self.relay
            .on_tab_navigated(url)
            .context("failed to update active tab")?;
        let snapshot = scraping::base::fetch_page(url).await?;
        let (_page_tx, page_rx) = watch::channel(snapshot);
        let agent = Arc::new(PageAgent::new(
            page_rx,
            ExtractionSettings::from_config(&self.config),
        ));
        self.relay.attach_page(agent.clone());
        let record = agent
            .load(&self.relay, &self.overlay, None)
            .await
            .map(|load| load.outcome.record);
        Ok((agent, record))
    }

    pub fn start_scheduler(&self) -> JoinHandle<()> {
        scheduler::init(self.relay.clone(), &self.config)
    }
}
