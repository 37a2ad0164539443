use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;

use crate::config::AppConfig;
use crate::db::Store;
use crate::models::PageEventFields;
use crate::platform;

const STATUS_LOADED: &str = "Event data loaded";
const STATUS_EMPTY: &str = "No event data found";
const STATUS_ERROR: &str = "Error loading event data";

/// Read-only view of the last stored page event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupView {
    pub status: &'static str,
    pub title: String,
    pub date: String,
    pub location: String,
    pub image: Option<String>,
    pub can_open: bool,
    fields: PageEventFields,
    widget_base: String,
}

impl PopupView {
    pub fn load(store: &Store) -> Self {
        match store.page_event() {
            Ok(stored) => Self::from_fields(stored.map(|s| s.fields).unwrap_or_default()),
            Err(err) => {
                tracing::warn!("failed to load stored event: {err}");
                Self {
                    status: STATUS_ERROR,
                    ..Self::from_fields(PageEventFields::default())
                }
            }
        }
    }

    pub fn from_fields(fields: PageEventFields) -> Self {
        let has_title = fields.title.as_deref().is_some_and(|t| !t.is_empty());
        let or_placeholder = |value: &Option<String>, placeholder: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| placeholder.to_string())
        };
        Self {
            status: if has_title { STATUS_LOADED } else { STATUS_EMPTY },
            title: or_placeholder(&fields.title, "No event title available"),
            date: or_placeholder(&fields.date, "No date available"),
            location: or_placeholder(&fields.location, "No location available"),
            image: fields.image.clone().filter(|i| !i.is_empty()),
            can_open: has_title,
            fields,
            widget_base: AppConfig::default().widget_url,
        }
    }

    pub fn with_widget_url(mut self, widget_url: impl Into<String>) -> Self {
        self.widget_base = widget_url.into();
        self
    }

    /// Full widget URL for opening the event in a new tab, or `None` when the
    /// open action is disabled. The embedded auth flow is always suppressed.
    pub fn widget_url(&self, source_url: &str, now: DateTime<Utc>) -> Option<String> {
        if !self.can_open {
            return None;
        }
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        let params = [
            ("title", field(&self.fields.title)),
            ("img", field(&self.fields.image)),
            ("date", field(&self.fields.date)),
            ("location", field(&self.fields.location)),
            ("source", source_url.to_string()),
            ("timestamp", now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("sourceType", platform::source_type_for(source_url).to_string()),
            ("skipAuthSession", "true".to_string()),
            ("isIframe", "false".to_string()),
            ("authMode", "none".to_string()),
        ];
        match Url::parse_with_params(&self.widget_base, &params) {
            Ok(url) => Some(url.into()),
            Err(err) => {
                tracing::warn!(widget = %self.widget_base, "invalid widget url: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .expect("url")
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn empty_store_shows_placeholders() {
        let store = Store::open_in_memory().expect("store");
        let view = PopupView::load(&store);
        assert_eq!(view.status, "No event data found");
        assert_eq!(view.title, "No event title available");
        assert_eq!(view.date, "No date available");
        assert_eq!(view.location, "No location available");
        assert!(view.image.is_none());
        assert!(!view.can_open);
        assert_eq!(view.widget_url("https://lu.ma/x", Utc::now()), None);
    }

    #[test]
    fn widget_url_carries_record_and_auth_flags() {
        let store = Store::open_in_memory().expect("store");
        store
            .put_page_event(
                &PageEventFields {
                    title: Some("Sample Talk".to_string()),
                    image: Some("https://cdn.test/a.png".to_string()),
                    date: Some("2024-03-05T18:00:00Z".to_string()),
                    location: Some("Toronto".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .expect("seed");

        let view = PopupView::load(&store);
        assert_eq!(view.status, "Event data loaded");
        assert!(view.can_open);

        let url = view
            .widget_url("https://www.meetup.com/events/1/", Utc::now())
            .expect("enabled");
        assert!(url.starts_with("https://beta.popin.site/?"));
        let params = params(&url);
        let expected = [
            ("title", "Sample Talk"),
            ("img", "https://cdn.test/a.png"),
            ("location", "Toronto"),
            ("source", "https://www.meetup.com/events/1/"),
            ("sourceType", "meetup"),
            ("skipAuthSession", "true"),
            ("isIframe", "false"),
            ("authMode", "none"),
        ];
        for (key, value) in expected {
            assert!(
                params.contains(&(key.to_string(), value.to_string())),
                "missing {key}={value}"
            );
        }
        assert!(params.iter().any(|(k, _)| k == "timestamp"));
    }

    #[test]
    fn unsupported_source_is_tagged_other() {
        let view = PopupView::from_fields(PageEventFields {
            title: Some("Talk".to_string()),
            ..Default::default()
        })
        .with_widget_url("https://widget.test");
        let url = view
            .widget_url("https://example.com/page", Utc::now())
            .expect("enabled");
        assert!(params(&url).contains(&("sourceType".to_string(), "other".to_string())));
        assert!(url.starts_with("https://widget.test/"));
    }
}
