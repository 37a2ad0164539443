pub mod base;
pub mod heuristic;
pub mod layout;
pub mod meta;
pub mod selectors;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scraper::Html;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::models::{EventRecord, PartialEventRecord};
use crate::normalize;
use crate::platform::{self, PlatformTag};

use self::heuristic::ContainerAnchor;
use self::layout::{Layout, StaticLayout};

/// Serialized state of a page at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Anything that can hand out the page's current markup.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> PageSnapshot;
}

impl SnapshotSource for PageSnapshot {
    fn snapshot(&self) -> PageSnapshot {
        self.clone()
    }
}

impl SnapshotSource for watch::Receiver<PageSnapshot> {
    fn snapshot(&self) -> PageSnapshot {
        self.borrow().clone()
    }
}

#[derive(Clone)]
pub struct ExtractionSettings {
    pub container_retries: u32,
    pub retry_delay: Duration,
    pub min_container_size: f64,
    pub timezone: Tz,
    pub layout: Arc<dyn Layout>,
}

impl ExtractionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            container_retries: config.container_retries,
            retry_delay: config.retry_delay(),
            min_container_size: config.min_container_size,
            timezone: config.tz(),
            layout: Arc::new(StaticLayout::new(
                config.viewport_width,
                config.viewport_height,
            )),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Context threaded through one extraction pass. Nothing here is mutated
/// after `start`; every extractor returns a fresh value.
#[derive(Clone)]
pub struct ExtractionSession {
    pub url: String,
    pub platform: Option<PlatformTag>,
    pub version: u64,
    pub started_at: DateTime<Utc>,
    pub settings: ExtractionSettings,
}

impl ExtractionSession {
    /// `None` when the URL is not a supported event page.
    pub fn start(url: &str, version: u64, settings: ExtractionSettings) -> Option<Self> {
        let platform = platform::classify(url)?;
        Some(Self {
            url: url.to_string(),
            platform: Some(platform),
            version,
            started_at: Utc::now(),
            settings,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub version: u64,
    pub record: EventRecord,
    /// Meta and heuristic results merged, before defaults.
    pub extracted: PartialEventRecord,
    pub container: &'static str,
}

impl PassOutcome {
    pub fn is_complete(&self) -> bool {
        self.extracted.is_complete()
    }
}

/// Full pass: meta tags first, then heuristics for whatever is still
/// missing, with container discovery retrying against `source`.
pub async fn run_pass<S>(source: &S, session: &ExtractionSession) -> PassOutcome
where
    S: SnapshotSource + ?Sized,
{
    let snapshot = source.snapshot();
    let meta = {
        let document = Html::parse_document(&snapshot.html);
        meta::extract_meta(&document)
    };
    let missing = meta.missing();
    if missing.is_empty() {
        return finish(session, meta, PartialEventRecord::default(), "none");
    }

    let located = heuristic::locate_container(source, session).await;
    let document = Html::parse_document(&located.snapshot.html);
    let container = located.anchor.resolve(&document);
    let found = heuristic::extract_heuristic(session, &document, container, &missing);
    finish(session, meta, found, located.anchor.describe())
}

/// Single-attempt pass over one snapshot, for callers that cannot wait
/// (mutation callbacks). Falls straight back to the body.
pub fn extract_snapshot(snapshot: &PageSnapshot, session: &ExtractionSession) -> PassOutcome {
    let document = Html::parse_document(&snapshot.html);
    let meta = meta::extract_meta(&document);
    let missing = meta.missing();
    if missing.is_empty() {
        return finish(session, meta, PartialEventRecord::default(), "none");
    }
    let anchor = heuristic::find_container(&document, session).unwrap_or(ContainerAnchor::Body);
    let container = anchor.resolve(&document);
    let found = heuristic::extract_heuristic(session, &document, container, &missing);
    finish(session, meta, found, anchor.describe())
}

fn finish(
    session: &ExtractionSession,
    meta: PartialEventRecord,
    found: PartialEventRecord,
    container: &'static str,
) -> PassOutcome {
    let record = normalize::normalize(session, &meta, &found);
    tracing::info!(
        id = %record.id,
        version = session.version,
        container,
        "event record extracted"
    );
    PassOutcome {
        version: session.version,
        extracted: meta.or(&found),
        record,
        container,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TALK: &str = r#"<html><head>
        <title>Sample Talk | Meetup</title>
        <meta property="og:title" content="Sample Talk">
        <meta property="og:image" content="https://secure.meetupstatic.com/photos/talk.jpeg">
    </head><body>
        <div data-testid="event-details">
            <time datetime="2024-03-05T18:00:00Z">Tuesday, March 5</time>
            <p>Speakers and snacks.</p>
        </div>
    </body></html>"#;

    fn session(url: &str) -> ExtractionSession {
        ExtractionSession::start(url, 7, ExtractionSettings::default()).expect("supported")
    }

    #[tokio::test]
    async fn meta_title_and_time_element() {
        let url = "https://www.meetup.com/events/300000001/";
        let snapshot = PageSnapshot::new(url, SAMPLE_TALK);
        let outcome = run_pass(&snapshot, &session(url)).await;

        assert_eq!(outcome.record.title, "Sample Talk");
        assert_eq!(outcome.record.start_date, "2024-03-05T18:00:00Z");
        assert_eq!(outcome.record.location.name, "Unknown Location");
        assert_eq!(outcome.record.source_url, url);
        assert_eq!(outcome.version, 7);
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn location_only_when_body_text_matches() {
        let url = "https://www.meetup.com/events/300000001/";
        let html = SAMPLE_TALK.replace(
            "<p>Speakers and snacks.</p>",
            "<p>Speakers and snacks, downtown Ottawa.</p>",
        );
        let outcome = run_pass(&PageSnapshot::new(url, html), &session(url)).await;
        assert_eq!(outcome.record.location.name, "Ottawa");
        assert!(outcome.is_complete());
    }

    #[test]
    fn unsupported_pages_do_not_start_a_session() {
        assert!(ExtractionSession::start(
            "https://example.com/blog",
            1,
            ExtractionSettings::default()
        )
        .is_none());
    }

    #[test]
    fn single_attempt_pass_matches_async_pass_on_static_page() {
        let url = "https://www.meetup.com/events/300000001/";
        let outcome = extract_snapshot(&PageSnapshot::new(url, SAMPLE_TALK), &session(url));
        assert_eq!(outcome.record.title, "Sample Talk");
        assert_eq!(outcome.container, r#"[data-testid="event-details"]"#);
    }
}
