use std::error::Error as _;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::db::{ErrorRecord, Store};
use crate::models::{EventRecord, PageEventFields};
use crate::platform;
use crate::remote::{EventsApi, RemoteError};

/// Requests accepted by the background side, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    EventData(PageEventFields),
    FetchRemoteEvents,
    SetApiToken { token: String },
    GetEventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("page context error: {0}")]
    Page(String),
    #[error("no page context attached")]
    NoPage,
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The page side as seen from the background: whatever record it holds now.
#[async_trait]
pub trait PageContext: Send + Sync {
    async fn current_record(&self) -> Result<Option<EventRecord>, String>;
}

pub struct Relay {
    store: Arc<Store>,
    api: EventsApi,
    page: Mutex<Option<Arc<dyn PageContext>>>,
    active_url: Mutex<Option<String>>,
    updates: watch::Sender<Option<PageEventFields>>,
}

impl Relay {
    pub fn new(store: Arc<Store>, api: EventsApi) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            store,
            api,
            page: Mutex::new(None),
            active_url: Mutex::new(None),
            updates,
        }
    }

    pub fn with_page_context(self, page: Arc<dyn PageContext>) -> Self {
        self.attach_page(page);
        self
    }

    /// Points page-side requests at the page the active tab shows now.
    pub fn attach_page(&self, page: Arc<dyn PageContext>) {
        match self.page.lock() {
            Ok(mut guard) => *guard = Some(page),
            Err(poisoned) => *poisoned.into_inner() = Some(page),
        }
    }

    fn page_context(&self) -> Option<Arc<dyn PageContext>> {
        match self.page.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Listeners (overlay, popup) see every stored page field set.
    pub fn subscribe(&self) -> watch::Receiver<Option<PageEventFields>> {
        self.updates.subscribe()
    }

    pub fn active_url(&self) -> Option<String> {
        match self.active_url.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn handle(&self, message: Message) -> Reply {
        let result = match message {
            Message::EventData(fields) => self.store_event_data(fields).map(|_| None),
            Message::FetchRemoteEvents => self
                .fetch_remote_events()
                .await
                .map(|events| Some(Value::Array(events))),
            Message::SetApiToken { token } => self
                .store
                .set_api_token(&token)
                .map(|_| {
                    tracing::info!("api token updated");
                    None
                })
                .map_err(RelayError::from),
            Message::GetEventData => self.current_page_record().await.and_then(|record| {
                record
                    .map(|record| serde_json::to_value(&record))
                    .transpose()
                    .map_err(RelayError::from)
            }),
        };
        match result {
            Ok(data) => Reply::Success { data },
            Err(err) => {
                tracing::warn!("message handling failed: {err}");
                Reply::Error {
                    error: err.to_string(),
                }
            }
        }
    }

    pub fn store_event_data(&self, fields: PageEventFields) -> Result<(), RelayError> {
        self.store.put_page_event(&fields, Utc::now())?;
        tracing::info!(title = ?fields.title, date = ?fields.date, "event data stored");
        self.updates.send_replace(Some(fields));
        Ok(())
    }

    /// Remote events with the page-context fallback. Whatever succeeds is
    /// cached; a failure of the API path is always recorded.
    pub async fn fetch_remote_events(&self) -> Result<Vec<Value>, RelayError> {
        let error = match self.fetch_from_api().await {
            Ok(events) => {
                self.store.put_remote_events(&events, Utc::now())?;
                tracing::info!(count = events.len(), "remote events cached");
                return Ok(events);
            }
            Err(err) => err,
        };
        tracing::warn!("events API failed: {error}");
        self.record_failure(&error);

        match self.fetch_from_page().await {
            Some(record) => {
                let events = vec![serde_json::to_value(&record)?];
                self.store.put_remote_events(&events, Utc::now())?;
                tracing::info!(id = %record.id, "cached page record in place of remote events");
                Ok(events)
            }
            None => Err(error),
        }
    }

    async fn fetch_from_api(&self) -> Result<Vec<Value>, RelayError> {
        let token = self.store.api_token()?.ok_or(RemoteError::MissingToken)?;
        Ok(self.api.list_events(&token).await?)
    }

    async fn fetch_from_page(&self) -> Option<EventRecord> {
        let url = self.active_url()?;
        if !platform::is_event_page(&url) {
            return None;
        }
        match self.current_page_record().await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(url = %url, "page fallback failed: {err}");
                None
            }
        }
    }

    async fn current_page_record(&self) -> Result<Option<EventRecord>, RelayError> {
        let page = self.page_context().ok_or(RelayError::NoPage)?;
        page.current_record().await.map_err(RelayError::Page)
    }

    fn record_failure(&self, error: &RelayError) {
        let mut trace = vec![error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        let record = ErrorRecord {
            message: error.to_string(),
            trace,
            timestamp: Utc::now(),
            url: self.active_url(),
        };
        if let Err(err) = self.store.put_last_error(&record) {
            tracing::warn!("failed to record error: {err}");
        }
    }

    /// Tab navigation hook. Leaving the supported platforms clears every
    /// page-scoped field; returns whether that happened.
    pub fn on_tab_navigated(&self, url: &str) -> Result<bool, RelayError> {
        match self.active_url.lock() {
            Ok(mut guard) => *guard = Some(url.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(url.to_string()),
        }
        if platform::is_event_page(url) {
            return Ok(false);
        }
        self.store.clear_page_event()?;
        self.updates.send_replace(None);
        tracing::info!(url, "cleared event data for non-event page");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PAGE_KEYS;
    use crate::models::Location;
    use crate::remote::tests::FakeTransport;
    use serde_json::json;

    struct StaticPage(Option<EventRecord>);

    #[async_trait]
    impl PageContext for StaticPage {
        async fn current_record(&self) -> Result<Option<EventRecord>, String> {
            Ok(self.0.clone())
        }
    }

    fn record() -> EventRecord {
        EventRecord {
            id: "sampletalktoron20240305".to_string(),
            title: "Sample Talk".to_string(),
            image: None,
            start_date: "2024-03-05T18:00:00Z".to_string(),
            end_date: "2024-03-05T18:00:00Z".to_string(),
            location: Location {
                name: "Toronto".to_string(),
                ..Location::default()
            },
            description: None,
            source_url: "https://lu.ma/sample".to_string(),
            platform: Some(platform::PlatformTag::Luma),
        }
    }

    fn relay(transport: FakeTransport, page: Option<EventRecord>) -> Relay {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let api = EventsApi::new("https://api.test", Box::new(transport));
        Relay::new(store, api).with_page_context(Arc::new(StaticPage(page)))
    }

    #[test]
    fn messages_use_type_tags() {
        let parsed: Message =
            serde_json::from_value(json!({"type": "setApiToken", "token": "abc"})).expect("parse");
        assert_eq!(
            parsed,
            Message::SetApiToken {
                token: "abc".to_string()
            }
        );
        let parsed: Message = serde_json::from_value(json!({
            "type": "eventData",
            "title": "Sample Talk",
            "date": "2024-03-05T18:00:00Z"
        }))
        .expect("parse");
        let Message::EventData(fields) = parsed else {
            panic!("expected eventData");
        };
        assert_eq!(fields.title.as_deref(), Some("Sample Talk"));
        assert!(fields.image.is_none());

        assert_eq!(
            serde_json::to_value(Message::FetchRemoteEvents).expect("serialize"),
            json!({"type": "fetchRemoteEvents"})
        );
        assert_eq!(
            serde_json::to_value(Reply::Success { data: None }).expect("serialize"),
            json!({"status": "success"})
        );
        assert_eq!(
            serde_json::to_value(Reply::Error {
                error: "boom".to_string()
            })
            .expect("serialize"),
            json!({"status": "error", "error": "boom"})
        );
    }

    #[tokio::test]
    async fn event_data_is_stored_and_broadcast() {
        let relay = relay(FakeTransport::new(200, "[]"), None);
        let mut updates = relay.subscribe();
        let reply = relay
            .handle(Message::EventData(PageEventFields {
                title: Some("Sample Talk".to_string()),
                ..Default::default()
            }))
            .await;
        assert_eq!(reply, Reply::Success { data: None });

        let stored = relay.store().page_event().expect("read").expect("stored");
        assert_eq!(stored.fields.title.as_deref(), Some("Sample Talk"));
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(
            updates.borrow_and_update().as_ref().and_then(|f| f.title.clone()),
            Some("Sample Talk".to_string())
        );
    }

    #[test]
    fn leaving_event_pages_clears_page_fields() {
        let relay = relay(FakeTransport::new(200, "[]"), None);
        relay.store().set_api_token("secret").expect("token");
        relay
            .store_event_data(PageEventFields::from(&record()))
            .expect("store");

        assert!(!relay.on_tab_navigated("https://lu.ma/other").expect("nav"));
        assert!(relay.store().page_event().expect("read").is_some());

        assert!(relay.on_tab_navigated("https://example.com/").expect("nav"));
        for key in PAGE_KEYS {
            assert!(!relay.store().contains(key).expect("contains"), "{key} left behind");
        }
        assert_eq!(
            relay.store().api_token().expect("token").as_deref(),
            Some("secret")
        );
    }

    #[tokio::test]
    async fn api_success_is_cached() {
        let relay = relay(FakeTransport::new(200, r#"[{"id":"a"}]"#), None);
        relay.store().set_api_token("secret").expect("token");
        let events = relay.fetch_remote_events().await.expect("events");
        assert_eq!(events, vec![json!({"id": "a"})]);
        assert_eq!(relay.store().remote_events().expect("read"), Some(events));
        assert!(relay.store().remote_events_updated().expect("read").is_some());
        assert!(relay.store().last_error().expect("read").is_none());
    }

    #[tokio::test]
    async fn api_failure_falls_back_to_the_page_record() {
        let relay = relay(
            FakeTransport::new(401, r#"{"message":"invalid token"}"#),
            Some(record()),
        );
        relay.store().set_api_token("stale").expect("token");
        relay.on_tab_navigated("https://lu.ma/sample").expect("nav");

        let events = relay.fetch_remote_events().await.expect("fallback");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["title"], "Sample Talk");
        assert_eq!(relay.store().remote_events().expect("read"), Some(events));

        let error = relay.store().last_error().expect("read").expect("recorded");
        assert!(error.message.contains("401"));
        assert_eq!(error.url.as_deref(), Some("https://lu.ma/sample"));
    }

    #[tokio::test]
    async fn failure_off_platform_is_surfaced() {
        let relay = relay(FakeTransport::failing("connection refused"), Some(record()));
        relay.store().set_api_token("secret").expect("token");
        relay.on_tab_navigated("https://example.com/").expect("nav");

        let reply = relay.handle(Message::FetchRemoteEvents).await;
        let Reply::Error { error } = reply else {
            panic!("expected error reply");
        };
        assert!(error.contains("connection refused"), "{error}");
        assert!(relay.store().remote_events().expect("read").is_none());
        assert!(relay.store().last_error().expect("read").is_some());
    }

    #[tokio::test]
    async fn missing_token_is_an_error() {
        let relay = relay(FakeTransport::new(200, "[]"), None);
        let err = relay.fetch_remote_events().await.expect_err("no token");
        assert!(matches!(err, RelayError::Remote(RemoteError::MissingToken)));
    }
}
