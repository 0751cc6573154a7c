//! Article body extraction.

use crate::fetch::listing::collapse_whitespace;
use crate::render::{Render, RenderOptions};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

static ARTICLE_PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article p").expect("static selector"));
static ALL_PARAGRAPHS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("static selector"));

/// Load `url` through `renderer` and return its body text.
///
/// # Arguments
///
/// * `renderer` - Browser session, or the plain transport behind [`Render`]
/// * `url` - The article page
/// * `opts` - Timeout and settle delay for the load
///
/// # Returns
///
/// The joined paragraph text. Every failure is logged and reported as `None`.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn extract_article<R: Render>(
    renderer: &R,
    url: &str,
    opts: RenderOptions,
) -> Option<String> {
    let html = match renderer.render(url, opts).await {
        Ok(html) => html,
        Err(e) => {
            warn!(error = %e, "Article load failed");
            return None;
        }
    };

    let text = paragraph_text(&html);
    match &text {
        Some(t) => debug!(bytes = t.len(), "Extracted article text"),
        None => warn!("Article has no paragraph text"),
    }
    text
}

/// Join paragraph texts with single spaces.
///
/// Paragraphs inside an `article` element win; pages without one fall back
/// to every paragraph in the document.
pub fn paragraph_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let mut paragraphs: Vec<String> = document
        .select(&ARTICLE_PARAGRAPHS)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = document
            .select(&ALL_PARAGRAPHS)
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .collect();
    }

    if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join(" "))
    }
}
