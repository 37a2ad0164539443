//! Page side of the pipeline: one extraction pass when a page loads, the
//! observer for anything that renders later, and delivery of every published
//! record to the relay and the overlay.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::models::{EventRecord, PageEventFields};
use crate::observer::{self, MutationBatch, ObserveTarget, ObserverHandle, Publisher};
use crate::overlay::OverlayPresenter;
use crate::relay::{PageContext, Relay};
use crate::scraping::{
    self, ExtractionSession, ExtractionSettings, PageSnapshot, PassOutcome, SnapshotSource,
};

pub struct PageAgent {
    page: watch::Receiver<PageSnapshot>,
    settings: ExtractionSettings,
    publisher: Arc<Publisher>,
}

pub struct PageLoad {
    pub outcome: PassOutcome,
    pub observer: Option<ObserverHandle>,
}

impl PageAgent {
    pub fn new(page: watch::Receiver<PageSnapshot>, settings: ExtractionSettings) -> Self {
        Self {
            page,
            settings,
            publisher: Arc::new(Publisher::new()),
        }
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        self.publisher.clone()
    }

    fn session(&self) -> Option<ExtractionSession> {
        let url = self.page.borrow().url.clone();
        ExtractionSession::start(&url, self.publisher.next_version(), self.settings.clone())
    }

    /// Runs the initial pass and delivers it. `None` on unsupported pages.
    /// With a mutation stream the observer is started for whatever is still
    /// missing.
    pub async fn load(
        &self,
        relay: &Relay,
        overlay: &OverlayPresenter,
        mutations: Option<mpsc::Receiver<MutationBatch>>,
    ) -> Option<PageLoad> {
        let Some(session) = self.session() else {
            tracing::debug!(url = %self.page.borrow().url, "not an event page");
            return None;
        };
        let outcome = scraping::run_pass(&self.page, &session).await;
        self.publisher.publish(outcome.clone());
        deliver(&outcome.record, relay, overlay);

        let observer = match mutations {
            Some(mutations) if !outcome.is_complete() => {
                // Added child nodes of any kind are relevant to a container
                // target, so late `<meta>` tags in the head are seen as well.
                let target = ObserveTarget::Container(outcome.container.to_string());
                match observer::observe(
                    session,
                    target,
                    &self.page.snapshot(),
                    &outcome,
                    mutations,
                    self.publisher.clone(),
                ) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        tracing::warn!("could not observe page: {err}");
                        None
                    }
                }
            }
            _ => None,
        };
        Some(PageLoad { outcome, observer })
    }
}

#[async_trait]
impl PageContext for PageAgent {
    async fn current_record(&self) -> Result<Option<EventRecord>, String> {
        if let Some(outcome) = self.publisher.latest() {
            return Ok(Some(outcome.record));
        }
        Ok(self
            .session()
            .map(|session| scraping::extract_snapshot(&self.page.snapshot(), &session).record))
    }
}

/// Stores the record and shows it. Failures surface as the error banner.
pub fn deliver(record: &EventRecord, relay: &Relay, overlay: &OverlayPresenter) {
    if let Err(err) = relay.store_event_data(PageEventFields::from(record)) {
        overlay.show_error(&format!("Failed to send event data: {err}"), chrono::Utc::now());
    }
    if let Err(err) = overlay.present(record) {
        overlay.show_error(&format!("Failed to show event: {err}"), chrono::Utc::now());
    }
}

/// Delivers every record published after this call.
pub fn follow(
    publisher: &Publisher,
    relay: Arc<Relay>,
    overlay: Arc<OverlayPresenter>,
) -> JoinHandle<()> {
    let mut updates = publisher.subscribe();
    updates.borrow_and_update();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let record = updates
                .borrow_and_update()
                .as_ref()
                .map(|outcome| outcome.record.clone());
            if let Some(record) = record {
                deliver(&record, &relay, &overlay);
            }
        }
    })
}
