//! Article-link extraction from listing-page HTML.
//!
//! Tiers 2 and 3 share this: whatever produced the HTML, links are found
//! with the same structural selector.

use crate::models::RawListingItem;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// Links inside article cards of a list.
pub const LISTING_SELECTOR: &str = "li article a[href]";

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(LISTING_SELECTOR).expect("static selector"));

/// Extract article links from `html`, resolving relative hrefs against `base`.
pub fn extract_links(html: &str, base: &str) -> Vec<RawListingItem> {
    let document = Html::parse_document(html);
    let base_url = Url::parse(base).ok();

    let mut items = Vec::new();
    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }

        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            match base_url.as_ref().and_then(|b| b.join(href).ok()) {
                Some(u) => u.to_string(),
                None => continue,
            }
        };

        let text = collapse_whitespace(&element.text().collect::<String>());
        let title = if text.is_empty() {
            element.value().attr("title").unwrap_or_default().trim().to_string()
        } else {
            text
        };

        items.push(RawListingItem {
            title,
            url,
            published: None,
        });
    }

    debug!(count = items.len(), %base, "Extracted listing links");
    items
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
