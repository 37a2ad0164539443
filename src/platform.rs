use reqwest::Url;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlatformTag {
    Luma,
    Meetup,
    Eventbrite,
    AllEvents,
}

// Markers are matched as plain substrings of the full URL, in this order.
const SIGNATURES: [(&str, PlatformTag); 4] = [
    ("lu.ma", PlatformTag::Luma),
    ("meetup.com/events/", PlatformTag::Meetup),
    ("eventbrite.ca/e/", PlatformTag::Eventbrite),
    ("allevents.in/", PlatformTag::AllEvents),
];

// Widget links are tagged by host, so any page on a platform gets its tag.
const HOSTS: [(&str, PlatformTag); 4] = [
    ("lu.ma", PlatformTag::Luma),
    ("meetup.com", PlatformTag::Meetup),
    ("eventbrite.ca", PlatformTag::Eventbrite),
    ("allevents.in", PlatformTag::AllEvents),
];

impl PlatformTag {
    pub fn source_type(&self) -> &'static str {
        match self {
            PlatformTag::Luma => "luma",
            PlatformTag::Meetup => "meetup",
            PlatformTag::Eventbrite => "eventbrite",
            PlatformTag::AllEvents => "allevents",
        }
    }
}

pub fn classify(url: &str) -> Option<PlatformTag> {
    SIGNATURES
        .iter()
        .find(|(marker, _)| url.contains(marker))
        .map(|(_, tag)| *tag)
}

pub fn is_event_page(url: &str) -> bool {
    classify(url).is_some()
}

pub fn source_type_for(url: &str) -> &'static str {
    let parsed = Url::parse(url).ok();
    let host = parsed.as_ref().and_then(Url::host_str).unwrap_or(url);
    HOSTS
        .iter()
        .find(|(marker, _)| host.contains(marker))
        .map(|(_, tag)| tag.source_type())
        .unwrap_or("other")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_supported_pages() {
        assert_eq!(classify("https://lu.ma/abc123"), Some(PlatformTag::Luma));
        assert_eq!(
            classify("https://www.meetup.com/events/301234567/"),
            Some(PlatformTag::Meetup)
        );
        assert_eq!(
            classify("https://www.eventbrite.ca/e/tech-night-tickets-1234"),
            Some(PlatformTag::Eventbrite)
        );
        assert_eq!(
            classify("https://allevents.in/toronto/demo-day/200026"),
            Some(PlatformTag::AllEvents)
        );
    }

    #[test]
    fn rejects_unqualified_paths_and_other_hosts() {
        assert_eq!(classify("https://www.meetup.com/find/"), None);
        assert_eq!(classify("https://www.eventbrite.ca/d/canada/"), None);
        assert_eq!(classify("https://allevents.in"), None);
        assert_eq!(classify("https://example.com/events/1"), None);
        // no case folding
        assert_eq!(classify("https://LU.MA/abc"), None);
        assert_eq!(source_type_for("https://example.com"), "other");
    }

    #[test]
    fn source_type_follows_the_host() {
        assert_eq!(source_type_for("https://www.meetup.com/find/"), "meetup");
        assert_eq!(source_type_for("https://www.eventbrite.ca/d/canada/"), "eventbrite");
        assert_eq!(source_type_for("https://lu.ma/abc123"), "luma");
        assert_eq!(source_type_for("allevents.in/toronto"), "allevents");
        assert_eq!(source_type_for("https://example.com/meetup.com/events/1"), "other");
    }
}
