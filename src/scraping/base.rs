use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};

use super::PageSnapshot;

const BLOCK_TAGS: [&str; 22] = [
    "address", "article", "aside", "br", "dd", "div", "dl", "dt", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "li", "main", "nav", "p", "section", "tr",
];

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text with a line break at every block boundary, so label scans can stop at
/// the end of a visual line the way the rendered page would.
pub fn block_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_block_text(element, &mut out);
    out
}

fn push_block_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Node::Text(text) = child.value() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let is_block = BLOCK_TAGS.contains(&child_el.value().name());
            if is_block {
                out.push('\n');
            }
            push_block_text(child_el, out);
            if is_block {
                out.push('\n');
            }
        }
    }
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(inner_text)
        .find(|text| !text.is_empty())
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    first_attr(&document.root_element(), selector, "content")
}

pub fn document_title(document: &Html) -> Option<String> {
    static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("title selector"));
    first_text(&document.root_element(), &TITLE)
}

pub fn body(document: &Html) -> ElementRef<'_> {
    static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector"));
    document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element())
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

pub async fn fetch_page(url: &str) -> Result<PageSnapshot> {
    static CLIENT: Lazy<Client> = Lazy::new(|| {
        Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("event-snap/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default()
    });

    let response = CLIENT
        .get(url)
        .send()
        .await
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    let final_url = response.url().to_string();
    let html = response
        .text()
        .await
        .with_context(|| format!("unable to read response body for {url}"))?;
    Ok(PageSnapshot::new(final_url, html))
}
