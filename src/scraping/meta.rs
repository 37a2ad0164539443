use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use super::base;
use crate::models::PartialEventRecord;

fn property(name: &str) -> Selector {
    Selector::parse(&format!(r#"meta[property="{name}"]"#)).expect("meta selector")
}

static OG_TITLE: Lazy<Selector> = Lazy::new(|| property("og:title"));
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| property("og:image"));
static OG_DESCRIPTION: Lazy<Selector> = Lazy::new(|| property("og:description"));
static OG_URL: Lazy<Selector> = Lazy::new(|| property("og:url"));
static OG_LOCALITY: Lazy<Selector> = Lazy::new(|| property("og:locality"));
static OG_REGION: Lazy<Selector> = Lazy::new(|| property("og:region"));
static OG_COUNTRY: Lazy<Selector> = Lazy::new(|| property("og:country-name"));
static START_PROPERTIES: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["og:start_time", "event:start_time", "article:published_time"]
        .into_iter()
        .map(property)
        .collect()
});
static END_PROPERTIES: Lazy<Vec<Selector>> =
    Lazy::new(|| ["og:end_time", "event:end_time"].into_iter().map(property).collect());
static LOCATION_PROPERTIES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "og:street-address",
        "og:locality",
        "og:region",
        "og:country-name",
    ]
    .into_iter()
    .map(property)
    .collect()
});
static TIME_DATETIME: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("time selector"));
static LOCATION_CLASSES: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["location", "venue", "address"]
        .into_iter()
        .map(|name| Selector::parse(&format!(r#"[class*="{name}"]"#)).expect("class selector"))
        .collect()
});

/// Structured metadata only: Open Graph / event properties, `time[datetime]`,
/// and the class-named location elements. Missing values stay `None`.
pub fn extract_meta(document: &Html) -> PartialEventRecord {
    let root = document.root_element();

    let start_date = START_PROPERTIES
        .iter()
        .find_map(|selector| base::meta_content(document, selector))
        .or_else(|| base::first_attr(&root, &TIME_DATETIME, "datetime"));
    let end_date = END_PROPERTIES
        .iter()
        .find_map(|selector| base::meta_content(document, selector));
    let location_name = LOCATION_PROPERTIES
        .iter()
        .find_map(|selector| base::meta_content(document, selector))
        .or_else(|| {
            LOCATION_CLASSES
                .iter()
                .find_map(|selector| base::first_text(&root, selector))
        });

    let record = PartialEventRecord {
        title: base::meta_content(document, &OG_TITLE),
        image: base::meta_content(document, &OG_IMAGE),
        start_date,
        end_date,
        location_name,
        city: base::meta_content(document, &OG_LOCALITY),
        province: base::meta_content(document, &OG_REGION),
        country: base::meta_content(document, &OG_COUNTRY),
        description: base::meta_content(document, &OG_DESCRIPTION),
        url: base::meta_content(document, &OG_URL),
    };
    tracing::debug!(
        title = ?record.title,
        date = ?record.start_date,
        location = ?record.location_name,
        "meta tags extracted"
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_open_graph_and_time_element() {
        let html = Html::parse_document(
            r#"<html><head>
                <meta property="og:title" content="Sample Talk">
                <meta property="og:image" content="https://images.example.com/talk.png">
                <meta property="og:description" content="Talk about things">
            </head><body>
                <time datetime="2024-03-05T18:00:00Z">March 5</time>
            </body></html>"#,
        );
        let meta = extract_meta(&html);
        assert_eq!(meta.title.as_deref(), Some("Sample Talk"));
        assert_eq!(meta.image.as_deref(), Some("https://images.example.com/talk.png"));
        assert_eq!(meta.start_date.as_deref(), Some("2024-03-05T18:00:00Z"));
        assert_eq!(meta.description.as_deref(), Some("Talk about things"));
        assert!(meta.location_name.is_none());
        assert!(meta.end_date.is_none());
    }

    #[test]
    fn start_properties_win_in_priority_order() {
        let html = Html::parse_document(
            r#"<html><head>
                <meta property="article:published_time" content="2023-01-01T00:00:00Z">
                <meta property="event:start_time" content="2024-06-01T17:00:00Z">
            </head><body><time datetime="2022-01-01">x</time></body></html>"#,
        );
        let meta = extract_meta(&html);
        assert_eq!(meta.start_date.as_deref(), Some("2024-06-01T17:00:00Z"));
    }

    #[test]
    fn location_falls_back_to_class_names() {
        let html = Html::parse_document(
            r#"<html><head><meta property="og:locality" content="Ottawa"></head>
               <body><div class="venue-name">Shaw Centre</div></body></html>"#,
        );
        let meta = extract_meta(&html);
        assert_eq!(meta.location_name.as_deref(), Some("Ottawa"));
        assert_eq!(meta.city.as_deref(), Some("Ottawa"));

        let html = Html::parse_document(
            r#"<html><body><p>x</p><div class="event-venue"> Shaw   Centre </div></body></html>"#,
        );
        assert_eq!(extract_meta(&html).location_name.as_deref(), Some("Shaw Centre"));
    }
}
