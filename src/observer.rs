//! Re-extraction driven by DOM mutations.
//!
//! A page that renders client-side often has nothing useful on the first
//! pass. The observer listens to mutation batches, re-runs extraction on the
//! snapshot that came with each relevant batch and publishes whenever a field
//! that was missing shows up. Publication is versioned so a slow pass can
//! never replace a newer record.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scraper::{Html, Selector};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::models::Field;
use crate::scraping::{self, ExtractionSession, PageSnapshot, PassOutcome};

const WATCHED_ATTRIBUTES: [&str; 3] = ["class", "id", "style"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// Nodes added to or removed from the observed subtree. `added` holds the
    /// lowercase tag names of element nodes.
    ChildList { added: Vec<String>, removed: usize },
    Attributes { name: String },
    CharacterData,
}

#[derive(Debug, Clone)]
pub struct MutationBatch {
    pub snapshot: PageSnapshot,
    pub records: Vec<MutationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveTarget {
    /// The subtree under the first element matching this selector.
    Container(String),
    /// `document.head`; only added `meta` nodes are relevant.
    Head,
}

impl ObserveTarget {
    fn is_relevant(&self, record: &MutationRecord) -> bool {
        match (self, record) {
            (ObserveTarget::Head, MutationRecord::ChildList { added, .. }) => {
                added.iter().any(|tag| tag.eq_ignore_ascii_case("meta"))
            }
            (ObserveTarget::Head, _) => false,
            (ObserveTarget::Container(_), MutationRecord::ChildList { .. }) => true,
            (ObserveTarget::Container(_), MutationRecord::Attributes { name }) => {
                WATCHED_ATTRIBUTES.contains(&name.as_str())
            }
            (ObserveTarget::Container(_), MutationRecord::CharacterData) => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("mutation stream is closed")]
    StreamClosed,
    #[error("invalid container selector {0:?}")]
    InvalidSelector(String),
    #[error("no element matches container selector {0:?}")]
    ContainerNotFound(String),
}

/// Monotonic version source plus the latest published outcome.
pub struct Publisher {
    counter: AtomicU64,
    latest: watch::Sender<Option<PassOutcome>>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            counter: AtomicU64::new(0),
            latest,
        }
    }

    pub fn next_version(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stores `outcome` unless something newer is already published.
    pub fn publish(&self, outcome: PassOutcome) -> bool {
        let version = outcome.version;
        let accepted = self.latest.send_if_modified(|current| {
            if current.as_ref().is_some_and(|held| held.version > version) {
                return false;
            }
            *current = Some(outcome);
            true
        });
        if !accepted {
            tracing::debug!(version, "discarding stale extraction result");
        }
        accepted
    }

    pub fn latest(&self) -> Option<PassOutcome> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PassOutcome>> {
        self.latest.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverExit {
    Complete,
    StreamEnded,
    Cancelled,
}

pub struct ObserverHandle {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<ObserverExit>,
}

impl ObserverHandle {
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> ObserverExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(err) => {
                tracing::warn!("observer task failed: {err}");
                ObserverExit::Cancelled
            }
        }
    }
}

/// Starts watching. `current` is the page as it is now and `initial` the
/// result of the pass that preceded observation; only its missing fields are
/// watched for. Returns immediately when `initial` is already complete.
pub fn observe(
    session: ExtractionSession,
    target: ObserveTarget,
    current: &PageSnapshot,
    initial: &PassOutcome,
    mut mutations: mpsc::Receiver<MutationBatch>,
    publisher: Arc<Publisher>,
) -> Result<ObserverHandle, ObserverError> {
    if let ObserveTarget::Container(css) = &target {
        let selector =
            Selector::parse(css).map_err(|_| ObserverError::InvalidSelector(css.clone()))?;
        let document = Html::parse_document(&current.html);
        if document.select(&selector).next().is_none() {
            return Err(ObserverError::ContainerNotFound(css.clone()));
        }
    }

    let pending = match mutations.try_recv() {
        Ok(batch) => Some(batch),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => return Err(ObserverError::StreamClosed),
    };

    let missing: HashSet<Field> = initial.extracted.missing().into_iter().collect();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tracing::debug!(observed = ?target, missing = ?missing, "observing page mutations");
    let task = tokio::spawn(watch_mutations(
        session, target, missing, pending, mutations, cancel_rx, publisher,
    ));
    Ok(ObserverHandle {
        cancel: Some(cancel_tx),
        task,
    })
}

async fn watch_mutations(
    session: ExtractionSession,
    target: ObserveTarget,
    initially_missing: HashSet<Field>,
    mut pending: Option<MutationBatch>,
    mut mutations: mpsc::Receiver<MutationBatch>,
    mut cancel: oneshot::Receiver<()>,
    publisher: Arc<Publisher>,
) -> ObserverExit {
    if initially_missing.is_empty() {
        return ObserverExit::Complete;
    }
    loop {
        let batch = match pending.take() {
            Some(batch) => batch,
            None => {
                tokio::select! {
                    _ = &mut cancel => return ObserverExit::Cancelled,
                    next = mutations.recv() => match next {
                        Some(batch) => batch,
                        None => return ObserverExit::StreamEnded,
                    },
                }
            }
        };
        if !batch.records.iter().any(|record| target.is_relevant(record)) {
            continue;
        }

        let pass_session = ExtractionSession {
            version: publisher.next_version(),
            ..session.clone()
        };
        let outcome = scraping::extract_snapshot(&batch.snapshot, &pass_session);
        if outcome.is_complete() {
            tracing::info!(version = outcome.version, "complete record available");
            publisher.publish(outcome);
            return ObserverExit::Complete;
        }

        // Compare with what is published now, not with the first pass: a
        // field found earlier may have disappeared while the page re-rendered.
        let lacking: Vec<Field> = match publisher.latest() {
            Some(latest) => latest.extracted.missing(),
            None => initially_missing.iter().copied().collect(),
        };
        let found: Vec<Field> = lacking
            .into_iter()
            .filter(|field| outcome.extracted.has(*field))
            .collect();
        if found.is_empty() {
            continue;
        }
        tracing::info!(fields = ?found, version = outcome.version, "late fields available");
        publisher.publish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraping::ExtractionSettings;

    const URL: &str = "https://lu.ma/late";

    const EMPTY_PAGE: &str = r#"<html><head><title>Late · Luma</title></head><body>
        <div class="jsx-1 event-content"><p>Loading</p></div></body></html>"#;

    const RENDERED_PAGE: &str = r#"<html><head>
        <title>Late · Luma</title>
        <meta property="og:title" content="Late Night Hack">
        <meta property="og:image" content="https://lu.ma/covers/late.png">
    </head><body>
        <div class="jsx-1 event-content">
            <div class="jsx-1 event-date">May 2, 2024</div>
            <div class="jsx-1 event-location">Bitmaker, Toronto</div>
        </div></body></html>"#;

    fn session() -> ExtractionSession {
        ExtractionSession::start(URL, 1, ExtractionSettings::default()).expect("session")
    }

    fn first_pass(publisher: &Publisher) -> (PageSnapshot, PassOutcome) {
        let snapshot = PageSnapshot::new(URL, EMPTY_PAGE);
        let session = ExtractionSession {
            version: publisher.next_version(),
            ..session()
        };
        let outcome = scraping::extract_snapshot(&snapshot, &session);
        (snapshot, outcome)
    }

    fn batch(html: &str, records: Vec<MutationRecord>) -> MutationBatch {
        MutationBatch {
            snapshot: PageSnapshot::new(URL, html),
            records,
        }
    }

    fn container() -> ObserveTarget {
        ObserveTarget::Container(r#"[class*="event-content"]"#.to_string())
    }

    #[tokio::test]
    async fn stops_once_the_record_is_complete() {
        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);
        assert!(!initial.is_complete());
        publisher.publish(initial.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle = observe(session(), container(), &snapshot, &initial, rx, publisher.clone())
            .expect("observe");

        tx.send(batch(
            RENDERED_PAGE,
            vec![MutationRecord::ChildList {
                added: vec!["div".to_string()],
                removed: 1,
            }],
        ))
        .await
        .expect("send");

        assert_eq!(handle.join().await, ObserverExit::Complete);
        let latest = publisher.latest().expect("published");
        assert_eq!(latest.record.title, "Late Night Hack");
        assert_eq!(latest.record.location.name, "Bitmaker, Toronto");
        assert_eq!(latest.record.start_date, "2024-05-02T04:00:00Z");
        assert!(latest.version > initial.version);
        // no further batches are consumed after completion
        assert!(tx.send(batch(RENDERED_PAGE, vec![])).await.is_err());
    }

    #[tokio::test]
    async fn completes_after_fields_arrive_out_of_order() {
        const LOCATION_ONLY: &str = r#"<html><head><title>Late · Luma</title></head><body>
            <div class="jsx-1 event-content">
                <div class="jsx-1 event-location">Bitmaker, Toronto</div>
            </div></body></html>"#;
        const IMAGE_AND_DATE: &str = r#"<html><head>
            <title>Late · Luma</title>
            <meta property="og:image" content="https://lu.ma/covers/late.png">
        </head><body>
            <div class="jsx-1 event-content">
                <div class="jsx-1 event-date">May 2, 2024</div>
            </div></body></html>"#;

        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);
        publisher.publish(initial.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle = observe(session(), container(), &snapshot, &initial, rx, publisher.clone())
            .expect("observe");
        for html in [LOCATION_ONLY, IMAGE_AND_DATE, RENDERED_PAGE] {
            tx.send(batch(html, vec![MutationRecord::CharacterData]))
                .await
                .expect("send");
        }

        assert_eq!(handle.join().await, ObserverExit::Complete);
        let latest = publisher.latest().expect("published");
        assert!(latest.is_complete());
        assert_eq!(latest.record.location.name, "Bitmaker, Toronto");
        assert_eq!(
            latest.record.image.as_deref(),
            Some("https://lu.ma/covers/late.png")
        );
    }

    #[tokio::test]
    async fn irrelevant_mutations_are_ignored() {
        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);
        publisher.publish(initial.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle =
            observe(session(), ObserveTarget::Head, &snapshot, &initial, rx, publisher.clone())
                .expect("observe");
        tx.send(batch(
            RENDERED_PAGE,
            vec![
                MutationRecord::Attributes {
                    name: "class".to_string(),
                },
                MutationRecord::ChildList {
                    added: vec!["script".to_string()],
                    removed: 0,
                },
            ],
        ))
        .await
        .expect("send");
        drop(tx);

        assert_eq!(handle.join().await, ObserverExit::StreamEnded);
        assert_eq!(publisher.latest().map(|o| o.version), Some(initial.version));
    }

    #[tokio::test]
    async fn container_target_sees_late_meta_tags() {
        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);
        publisher.publish(initial.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle = observe(session(), container(), &snapshot, &initial, rx, publisher.clone())
            .expect("observe");
        tx.send(batch(
            RENDERED_PAGE,
            vec![MutationRecord::ChildList {
                added: vec!["meta".to_string(), "meta".to_string()],
                removed: 0,
            }],
        ))
        .await
        .expect("send");

        assert_eq!(handle.join().await, ObserverExit::Complete);
        assert_eq!(publisher.latest().expect("published").record.title, "Late Night Hack");
    }

    #[test]
    fn attribute_filter_matches_watched_names_only() {
        let target = container();
        for name in ["class", "id", "style"] {
            assert!(target.is_relevant(&MutationRecord::Attributes {
                name: name.to_string()
            }));
        }
        assert!(!target.is_relevant(&MutationRecord::Attributes {
            name: "data-state".to_string()
        }));
        assert!(ObserveTarget::Head.is_relevant(&MutationRecord::ChildList {
            added: vec!["META".to_string()],
            removed: 0,
        }));
        assert!(!ObserveTarget::Head.is_relevant(&MutationRecord::CharacterData));
    }

    #[test]
    fn stale_versions_are_rejected() {
        let publisher = Publisher::new();
        let (_, older) = first_pass(&publisher);
        let (_, newer) = first_pass(&publisher);
        assert!(newer.version > older.version);

        assert!(publisher.publish(newer.clone()));
        assert!(!publisher.publish(older));
        assert_eq!(publisher.latest().map(|o| o.version), Some(newer.version));
    }

    #[tokio::test]
    async fn cancel_stops_the_task() {
        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);
        let (_tx, rx) = mpsc::channel(8);
        let mut handle =
            observe(session(), container(), &snapshot, &initial, rx, publisher).expect("observe");
        handle.cancel();
        assert_eq!(handle.join().await, ObserverExit::Cancelled);
    }

    #[tokio::test]
    async fn setup_failures_are_reported() {
        let publisher = Arc::new(Publisher::new());
        let (snapshot, initial) = first_pass(&publisher);

        let (tx, rx) = mpsc::channel::<MutationBatch>(1);
        drop(tx);
        let err = observe(session(), container(), &snapshot, &initial, rx, publisher.clone())
            .err()
            .expect("closed stream");
        assert!(matches!(err, ObserverError::StreamClosed));

        let (_tx, rx) = mpsc::channel(1);
        let err = observe(
            session(),
            ObserveTarget::Container(".does-not-exist".to_string()),
            &snapshot,
            &initial,
            rx,
            publisher,
        )
        .err()
        .expect("missing container");
        assert!(matches!(err, ObserverError::ContainerNotFound(_)));
    }
}
