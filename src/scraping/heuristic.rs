use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;

use super::base;
use super::layout::is_valid_container;
use super::selectors::{self, Purpose, SelectorRule};
use super::{ExtractionSession, SnapshotSource};
use super::PageSnapshot;
use crate::models::{Field, PartialEventRecord};

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{1,2}(?:st|nd|rd|th)?,? \d{4}",
        r"(?i)\d{1,2}(?:st|nd|rd|th)? (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*,? \d{4}",
        r"\d{4}-\d{2}-\d{2}",
        r"\d{1,2}/\d{1,2}/\d{4}",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("date pattern"))
    .collect()
});

// TODO: load the city list from config so regions outside Canada can be added without a rebuild.
const CITIES: &str = "Toronto|Vancouver|Montreal|Calgary|Ottawa|Edmonton|Halifax|Victoria|\
Winnipeg|Quebec City|Hamilton|Kitchener|London|Mississauga|Brampton|Surrey|Burnaby|Richmond|\
Vaughan|Markham|Oakville|Burlington|Oshawa|Barrie|Guelph|Cambridge|Waterloo|Kingston|\
St\\. Catharines|Niagara Falls|Windsor|Saskatoon|Regina|St\\. John's|Charlottetown|Fredericton|\
Moncton|Saint John|Yellowknife|Whitehorse|Iqaluit";

static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(&format!(r"(?i)\b(?:{CITIES})\b")).expect("city pattern"),
        Regex::new(
            r"(?i)\d+\s+[A-Za-z\s]+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Court|Ct|Circle|Cir|Place|Pl|Square|Sq|Terrace|Ter|Way|Highway|Hwy|Parkway|Pkwy)\b",
        )
        .expect("street pattern"),
        Regex::new(r"(?i)\b[A-Z]\d[A-Z]\s?\d[A-Z]\d\b").expect("postal code pattern"),
    ]
});

const LOCATION_LABELS: [&str; 5] = ["Location:", "Venue:", "Address:", "Where:", "Place:"];

static TWITTER_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="twitter:image"]"#).expect("twitter image"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("img selector"));

/// Where the heuristic extractor looks. `Body` is the fallback once every
/// discovery attempt has failed.
#[derive(Debug, Clone, Copy)]
pub enum ContainerAnchor {
    Matched {
        rule: &'static SelectorRule,
        position: usize,
    },
    Body,
}

impl ContainerAnchor {
    pub fn resolve<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        match self {
            ContainerAnchor::Matched { rule, position } => document
                .select(&rule.selector)
                .nth(*position)
                .unwrap_or_else(|| base::body(document)),
            ContainerAnchor::Body => base::body(document),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ContainerAnchor::Matched { rule, .. } => rule.css,
            ContainerAnchor::Body => "body",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerLocation {
    pub snapshot: PageSnapshot,
    pub anchor: ContainerAnchor,
    pub attempts: u32,
}

/// First element passing the validity predicate, by selector order and then
/// document order within a selector.
pub fn find_container(document: &Html, session: &ExtractionSession) -> Option<ContainerAnchor> {
    let settings = &session.settings;
    for rule in selectors::resolve(session.platform, Purpose::Container) {
        for (position, element) in document.select(&rule.selector).enumerate() {
            if is_valid_container(element, &*settings.layout, settings.min_container_size) {
                tracing::debug!(selector = rule.css, position, "container found");
                return Some(ContainerAnchor::Matched { rule, position });
            }
        }
    }
    None
}

/// Runs `find_container` against the latest snapshot, waiting between
/// attempts so late-rendered markup gets a chance. Falls back to the body.
pub async fn locate_container<S>(source: &S, session: &ExtractionSession) -> ContainerLocation
where
    S: SnapshotSource + ?Sized,
{
    let attempts = session.settings.container_retries + 1;
    for attempt in 1..=attempts {
        let snapshot = source.snapshot();
        let found = {
            let document = Html::parse_document(&snapshot.html);
            find_container(&document, session)
        };
        if let Some(anchor) = found {
            return ContainerLocation {
                snapshot,
                anchor,
                attempts: attempt,
            };
        }
        if attempt < attempts {
            tracing::debug!(attempt, "no valid container yet, retrying");
            sleep(session.settings.retry_delay).await;
        }
    }
    tracing::warn!(url = %session.url, attempts, "no valid container, using document body");
    ContainerLocation {
        snapshot: source.snapshot(),
        anchor: ContainerAnchor::Body,
        attempts,
    }
}

/// Fills only the fields listed in `missing`, reading from `container`.
pub fn extract_heuristic(
    session: &ExtractionSession,
    document: &Html,
    container: ElementRef<'_>,
    missing: &[Field],
) -> PartialEventRecord {
    let mut record = PartialEventRecord::default();
    for field in missing {
        match field {
            Field::Title => record.title = base::document_title(document),
            Field::Image => record.image = find_image(session, document, container),
            Field::StartDate => record.start_date = find_date(session, container),
            Field::Location => record.location_name = find_location(session, document, container),
        }
    }
    tracing::debug!(
        fields = ?missing,
        title = ?record.title,
        date = ?record.start_date,
        location = ?record.location_name,
        "heuristic extraction finished"
    );
    record
}

fn candidates<'a>(
    session: &ExtractionSession,
    container: ElementRef<'a>,
    purpose: Purpose,
) -> impl Iterator<Item = ElementRef<'a>> {
    selectors::resolve(session.platform, purpose)
        .into_iter()
        .flat_map(move |rule| container.select(&rule.selector))
        .chain(std::iter::once(container))
}

fn first_match(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|pattern| pattern.find(text))
        .map(|m| base::clean_text(m.as_str()))
}

pub fn match_date(text: &str) -> Option<String> {
    first_match(&DATE_PATTERNS, text)
}

pub fn match_location(text: &str) -> Option<String> {
    first_match(&LOCATION_PATTERNS, text)
}

/// Text after the first known label, up to the end of that line.
pub fn labelled_location(text: &str) -> Option<String> {
    LOCATION_LABELS.iter().find_map(|label| {
        let index = text.find(label)?;
        let rest = &text[index + label.len()..];
        let line = rest.split('\n').next().unwrap_or(rest);
        let value = base::clean_text(line);
        (!value.is_empty()).then_some(value)
    })
}

fn find_date(session: &ExtractionSession, container: ElementRef<'_>) -> Option<String> {
    candidates(session, container, Purpose::Date).find_map(|element| {
        let text = base::inner_text(element);
        if text.is_empty() {
            None
        } else {
            match_date(&text)
        }
    })
}

fn find_location(
    session: &ExtractionSession,
    document: &Html,
    container: ElementRef<'_>,
) -> Option<String> {
    if let Some(found) = candidates(session, container, Purpose::Location).find_map(|element| {
        let text = base::inner_text(element);
        if text.is_empty() {
            None
        } else {
            match_location(&text)
        }
    }) {
        return Some(found);
    }

    let details = selectors::resolve(session.platform, Purpose::Details)
        .into_iter()
        .find_map(|rule| document.select(&rule.selector).next());
    details
        .into_iter()
        .chain(std::iter::once(container))
        .find_map(|element| labelled_location(&base::block_text(element)))
}

fn find_image(
    session: &ExtractionSession,
    document: &Html,
    container: ElementRef<'_>,
) -> Option<String> {
    let root = document.root_element();
    base::first_attr(&root, &TWITTER_IMAGE, "content")
        .or_else(|| base::first_attr(&container, &IMG, "src"))
        .or_else(|| base::first_attr(&root, &IMG, "src"))
        .and_then(|src| base::absolute_url(&session.url, Some(src)))
}
