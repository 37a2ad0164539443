use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    EventRecord, Location, PartialEventRecord, DEFAULT_CITY, DEFAULT_COUNTRY,
    DEFAULT_LOCATION_NAME, DEFAULT_PROVINCE, DEFAULT_TITLE,
};
use crate::scraping::base::{self, clean_text};
use crate::scraping::heuristic;
use crate::scraping::ExtractionSession;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static LABEL_RES: Lazy<[Regex; 3]> = Lazy::new(|| {
    ["location", "venue", "address"]
        .map(|label| Regex::new(&format!(r"(?i)^{label}:?\s*")).expect("label regex"))
});
static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal regex"));

const OFFSET_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];
const NAIVE_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];
const NAIVE_DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Merges the two partial results (meta first) and fills every remaining gap
/// with a default. Never fails.
pub fn normalize(
    session: &ExtractionSession,
    meta: &PartialEventRecord,
    heuristic: &PartialEventRecord,
) -> EventRecord {
    let merged = meta.or(heuristic);
    let tz = session.settings.timezone;

    let title = merged
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let start = merged
        .start_date
        .as_deref()
        .and_then(|text| parse_date(text, tz))
        .unwrap_or(session.started_at);
    let start_date = format_timestamp(start);
    let end_date = merged
        .end_date
        .as_deref()
        .and_then(|text| parse_date(text, tz))
        .map(format_timestamp)
        .unwrap_or_else(|| start_date.clone());

    let location = Location {
        name: non_empty(merged.location_name.as_deref().map(format_location), DEFAULT_LOCATION_NAME),
        city: non_empty(merged.city.as_deref().map(clean_text), DEFAULT_CITY),
        province: non_empty(merged.province.as_deref().map(clean_text), DEFAULT_PROVINCE),
        country: non_empty(merged.country.as_deref().map(clean_text), DEFAULT_COUNTRY),
    };

    let image = merged
        .image
        .as_deref()
        .map(|url| normalize_image_url(url, &session.url));
    let description = merged
        .description
        .as_deref()
        .map(clean_text)
        .filter(|d| !d.is_empty());

    EventRecord {
        id: event_id(&title, &location.name, &start_date),
        title,
        image,
        start_date,
        end_date,
        location,
        description,
        source_url: session.url.clone(),
        platform: session.platform,
    }
}

fn non_empty(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Strips markup, collapses whitespace, drops leading labels and one
/// trailing punctuation mark.
pub fn format_location(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, "");
    let collapsed = clean_text(&without_tags);
    let unlabelled = LABEL_RES.iter().fold(collapsed, |text, label| {
        label.replace(&text, "").into_owned()
    });
    let trimmed = unlabelled.trim();
    trimmed
        .strip_suffix(['.', ',', ';', ':'])
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Accepts RFC 3339, ISO dates with or without a time, `M/D/YYYY`,
/// `Month D, YYYY` and `D Month YYYY`. Values without an offset are read in `tz`.
pub fn parse_date(text: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(parsed.with_timezone(&Utc));
    }
    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&cleaned, fmt) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    parse_naive_date(&cleaned)
        .or_else(|| heuristic::match_date(&cleaned).and_then(|found| parse_naive_date(&found)))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_naive_date(text: &str) -> Option<NaiveDate> {
    let simplified = ORDINAL_RE.replace_all(text, "$1").replace(',', " ");
    let simplified = clean_text(&simplified);
    NAIVE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&simplified, fmt).ok())
}

fn id_part(text: &str, len: usize) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(len)
        .collect()
}

/// `title[0:10] + location[0:5] + YYYYMMDD`, each part lowercased and
/// reduced to ASCII letters and digits. Pure: same inputs, same id.
pub fn event_id(title: &str, location_name: &str, start_date: &str) -> String {
    let date_digits = parse_date(start_date, Tz::UTC)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_default();
    format!(
        "{}{}{}",
        id_part(title, 10),
        id_part(location_name, 5),
        date_digits
    )
}

/// Removes CDN transformations so the widget gets the original asset, and
/// resolves relative paths against the page.
pub fn normalize_image_url(url: &str, page_url: &str) -> String {
    let url = url.trim();
    if url.contains("lumacdn.com") {
        if let Some((_, path)) = url.split_once("/event-covers/") {
            let path = path.split('&').next().unwrap_or(path);
            return format!("https://images.lumacdn.com/event-covers/{path}");
        }
    }
    if url.contains("social-images.lu.ma") {
        let inner = reqwest::Url::parse(url).ok().and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "img")
                .map(|(_, value)| value.into_owned())
        });
        if let Some(inner) = inner {
            return inner.split('&').next().unwrap_or(&inner).to_string();
        }
    }
    if let Some((before, _)) = url.split_once("cdn-cgi/image") {
        return before.to_string();
    }
    if url.starts_with('/') {
        return base::absolute_url(page_url, Some(url.to_string()))
            .unwrap_or_else(|| url.to_string());
    }
    url.to_string()
}
