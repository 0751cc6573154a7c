//! The tiered fetch cascade: feed, then plain HTTP, then headless browser.

use super::feed::{feed_url, parse_feed};
use super::listing::extract_links;
use super::{FetchError, JitterRange, Tier, TierOutcome, Transport, is_blocked};
use crate::models::{RawListingItem, SourceDescriptor};
use crate::render::{Render, RenderOptions};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct CascadeConfig {
    /// Delay applied before the plain and rendered requests.
    pub jitter: JitterRange,
    pub listing_render: RenderOptions,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            jitter: JitterRange::from_millis(800, 1800),
            listing_render: RenderOptions::LISTING,
        }
    }
}

/// Runs the tiers for one source at a time. Never fails: the worst case is
/// an empty list.
#[derive(Debug)]
pub struct FetchCascade<'a, T> {
    transport: &'a T,
    config: CascadeConfig,
}

impl<'a, T: Transport> FetchCascade<'a, T> {
    pub fn new(transport: &'a T, config: CascadeConfig) -> Self {
        Self { transport, config }
    }

    /// Return the items of the first tier that finds at least one.
    ///
    /// `renderer` is `None` when no headless browser could be started, in
    /// which case tier 3 reports a resource failure.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    pub async fn fetch<R: Render>(
        &self,
        source: &SourceDescriptor,
        renderer: Option<&R>,
    ) -> Vec<RawListingItem> {
        for tier in [Tier::Feed, Tier::Plain, Tier::Rendered] {
            let outcome = self.run_tier(tier, source, renderer).await;
            match outcome {
                TierOutcome::Success(items) => {
                    info!(%tier, count = items.len(), "Tier succeeded");
                    return items;
                }
                TierOutcome::Empty => info!(%tier, "Tier found nothing; escalating"),
                TierOutcome::Blocked => warn!(%tier, "Blocked by anti-automation page; escalating"),
                TierOutcome::Error(e) => warn!(%tier, error = %e, "Tier failed; escalating"),
            }
        }

        error!(url = %source.url, "All fetch tiers failed");
        Vec::new()
    }

    pub async fn run_tier<R: Render>(
        &self,
        tier: Tier,
        source: &SourceDescriptor,
        renderer: Option<&R>,
    ) -> TierOutcome {
        match tier {
            Tier::Feed => self.feed_tier(source).await,
            Tier::Plain => self.plain_tier(source).await,
            Tier::Rendered => match renderer {
                Some(r) => self.rendered_tier(source, r).await,
                None => TierOutcome::Error(FetchError::Resource(
                    "no renderer session".to_string(),
                )),
            },
        }
    }

    /// Tier 1: syndication feed.
    pub async fn feed_tier(&self, source: &SourceDescriptor) -> TierOutcome {
        let url = feed_url(&source.url);
        debug!(%url, "Trying feed");
        match self.transport.get(&url).await {
            Ok(xml) => match parse_feed(&url, &xml) {
                Ok(items) => TierOutcome::from_items(items),
                Err(e) => TierOutcome::Error(e),
            },
            Err(e) => TierOutcome::from_error(e),
        }
    }

    /// Tier 2: plain GET of the listing page.
    pub async fn plain_tier(&self, source: &SourceDescriptor) -> TierOutcome {
        self.config.jitter.sleep().await;
        debug!(url = %source.url, "Trying plain GET");
        match self.transport.get(&source.url).await {
            Ok(html) if is_blocked(&html) => TierOutcome::Blocked,
            Ok(html) => TierOutcome::from_items(extract_links(&html, &source.url)),
            Err(e) => TierOutcome::from_error(e),
        }
    }

    /// Tier 3: headless browser, same link extraction as tier 2.
    pub async fn rendered_tier<R: Render>(
        &self,
        source: &SourceDescriptor,
        renderer: &R,
    ) -> TierOutcome {
        self.config.jitter.sleep().await;
        debug!(url = %source.url, "Trying rendered load");
        match renderer.render(&source.url, self.config.listing_render).await {
            Ok(html) => TierOutcome::from_items(extract_links(&html, &source.url)),
            Err(e) => TierOutcome::from_error(e),
        }
    }
}
