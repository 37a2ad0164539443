//! Ordered selector table shared by container discovery and the text scans.
//!
//! Each rule is scoped to a platform (or generic) and a purpose. Resolution
//! returns the platform rules first, ordered by priority, followed by the
//! generic rules, so one function serves every lookup.

use once_cell::sync::Lazy;
use scraper::Selector;

use crate::platform::PlatformTag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    Container,
    Date,
    Location,
    Details,
}

#[derive(Debug)]
pub struct SelectorRule {
    pub platform: Option<PlatformTag>,
    pub purpose: Purpose,
    pub css: &'static str,
    pub priority: u16,
    pub selector: Selector,
}

use PlatformTag::{AllEvents, Eventbrite, Luma, Meetup};
use Purpose::{Container, Date, Details, Location};

const TABLE: &[(Option<PlatformTag>, Purpose, &str, u16)] = &[
    // Lu.ma renders with styled-jsx, so the hashed jsx-* class sits next to the semantic one.
    (Some(Luma), Container, r#"[class*="jsx-"][class*="event-theme"]"#, 10),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="event-content"]"#, 11),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="event-details"]"#, 12),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="event-info"]"#, 13),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="event-header"]"#, 14),
    (Some(Luma), Container, r#"[class*="event-theme"]"#, 20),
    (Some(Luma), Container, r#"[class*="event-content"]"#, 21),
    (Some(Luma), Container, r#"[class*="event-details"]"#, 22),
    (Some(Luma), Container, r#"[class*="event-info"]"#, 23),
    (Some(Luma), Container, r#"[class*="event-header"]"#, 24),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="content"]"#, 30),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="main"]"#, 31),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="body"]"#, 32),
    (Some(Luma), Container, r#"[class*="jsx-"][class*="container"]"#, 33),
    (Some(Meetup), Container, r#"[data-testid="event-details"]"#, 10),
    (Some(Meetup), Container, r#"[class*="event-details"]"#, 20),
    (Some(Meetup), Container, r#"[class*="event-content"]"#, 21),
    (Some(Meetup), Container, r#"[class*="event-body"]"#, 22),
    (Some(Eventbrite), Container, r#"[data-testid="event-details"]"#, 10),
    (Some(Eventbrite), Container, r#"[class*="event-details"]"#, 20),
    (Some(Eventbrite), Container, r#"[class*="event-content"]"#, 21),
    (Some(Eventbrite), Container, r#"[class*="event-body"]"#, 22),
    (Some(AllEvents), Container, r#"[class*="event-details"]"#, 20),
    (Some(AllEvents), Container, r#"[class*="event-content"]"#, 21),
    (Some(AllEvents), Container, r#"[class*="event-body"]"#, 22),
    (None, Container, r#"div[class*="event"]"#, 100),
    (None, Container, r#"div[class*="details"]"#, 101),
    (None, Container, r#"div[class*="content"]"#, 102),
    (None, Container, r#"div[class*="main"]"#, 103),
    (None, Container, r#"div[class*="body"]"#, 104),
    (None, Container, r#"div[class*="container"]"#, 105),
    (None, Container, r#"div[class*="section"]"#, 106),
    (None, Container, "article", 107),
    (None, Container, "main", 108),
    (None, Container, "section", 109),
    (Some(Luma), Date, r#"[class*="jsx-"][class*="event-date"]"#, 10),
    (Some(Luma), Date, r#"[class*="event-date"]"#, 11),
    (Some(Luma), Date, r#"[class*="jsx-"][class*="date-time"]"#, 12),
    (Some(Luma), Date, r#"[class*="date-time"]"#, 13),
    (Some(Luma), Date, r#"[class*="jsx-"][class*="event-time"]"#, 14),
    (Some(Luma), Date, r#"[class*="event-time"]"#, 15),
    (None, Date, r#"[class*="date"]"#, 100),
    (None, Date, "time[datetime]", 101),
    (None, Date, r#"[class*="time"]"#, 102),
    (None, Date, "time", 103),
    (Some(Luma), Location, r#"[class*="jsx-"][class*="event-location"]"#, 10),
    (Some(Luma), Location, r#"[class*="event-location"]"#, 11),
    (Some(Luma), Location, r#"[class*="jsx-"][class*="venue"]"#, 12),
    (Some(Luma), Location, r#"[class*="jsx-"][class*="address"]"#, 13),
    (None, Location, r#"[class*="location"]"#, 100),
    (None, Location, r#"[class*="venue"]"#, 101),
    (None, Location, r#"[class*="address"]"#, 102),
    (None, Location, r#"[class*="event-details"]"#, 103),
    (Some(Luma), Details, r#"[class*="jsx-"][class*="event-details"]"#, 10),
    (None, Details, r#"[data-testid="event-details"]"#, 100),
    (None, Details, r#"[class*="event-details"]"#, 101),
];

static RULES: Lazy<Vec<SelectorRule>> = Lazy::new(|| {
    TABLE
        .iter()
        .map(|(platform, purpose, css, priority)| SelectorRule {
            platform: *platform,
            purpose: *purpose,
            css: *css,
            priority: *priority,
            selector: Selector::parse(css).expect("selector table entry"),
        })
        .collect()
});

/// Rules for `purpose`: the platform's own entries by priority, then the
/// generic entries by priority. Table order breaks priority ties.
pub fn resolve(platform: Option<PlatformTag>, purpose: Purpose) -> Vec<&'static SelectorRule> {
    let mut specific: Vec<&SelectorRule> = RULES
        .iter()
        .filter(|rule| rule.purpose == purpose && platform.is_some() && rule.platform == platform)
        .collect();
    let mut generic: Vec<&SelectorRule> = RULES
        .iter()
        .filter(|rule| rule.purpose == purpose && rule.platform.is_none())
        .collect();
    specific.sort_by_key(|rule| rule.priority);
    generic.sort_by_key(|rule| rule.priority);
    specific.extend(generic);
    specific
}
