//! Syndication feed parsing (RSS 2.0, RSS 1.0/RDF, Atom and JSON Feed).

use super::FetchError;
use crate::models::RawListingItem;
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use url::Url;

/// The URL tier 1 should try for a listing page.
///
/// Listing URLs that already point at a feed are used as-is; anything else
/// gets `/feed` appended, the WordPress convention most sources follow.
pub fn feed_url(listing: &str) -> String {
    if looks_like_feed(listing) {
        listing.to_string()
    } else {
        format!("{}/feed", listing.trim_end_matches('/'))
    }
}

pub fn looks_like_feed(url: &str) -> bool {
    let lower = url.to_lowercase();
    let lower = lower.trim_end_matches('/');
    ["/feed", "/rss", ".xml", ".rss", ".atom"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Parse a feed document fetched from `url` into listing items.
///
/// # Arguments
///
/// * `url` - Where the document came from; relative entry links resolve against it
/// * `xml` - The raw document
///
/// # Returns
///
/// One item per entry that has a usable link, in feed order. An empty but
/// well-formed feed gives `Ok(vec![])`. Anything that is not a feed, or is
/// not well-formed, gives [`FetchError::Parse`].
pub fn parse_feed(url: &str, xml: &str) -> Result<Vec<RawListingItem>, FetchError> {
    let xml = scrub_html_entities(xml);
    let feed = parser::parse(xml.as_bytes()).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        reason: format!("failed to parse feed: {e}"),
    })?;

    let base = Url::parse(url).ok();
    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| listing_item(entry, base.as_ref()))
        .collect())
}

fn listing_item(entry: Entry, base: Option<&Url>) -> Option<RawListingItem> {
    let url = resolve(&entry_link(&entry.links)?.href, base)?;
    Some(RawListingItem {
        title: entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default(),
        url,
        published: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
    })
}

/// The entry's page: an `alternate` (or unqualified) link, else the first one.
fn entry_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
}

fn resolve(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(_) => base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()),
    }
}

/// Replace HTML-only entities that XML parsers reject.
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
