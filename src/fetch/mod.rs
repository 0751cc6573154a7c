//! Listing-page acquisition.
//!
//! A source's latest articles are discovered through a cascade of
//! increasingly expensive strategies:
//!
//! | Tier | Module | Strategy |
//! |------|--------|----------|
//! | 1 | [`feed`] | RSS / Atom feed |
//! | 2 | [`http`] + [`listing`] | plain GET with browser-like headers |
//! | 3 | [`crate::render`] + [`listing`] | headless browser |
//!
//! [`cascade::FetchCascade`] drives the tiers; each tier reports a
//! [`TierOutcome`] and escalation is a match on that value.

pub mod cascade;
pub mod feed;
pub mod http;
pub mod listing;

use crate::models::RawListingItem;
use rand::{Rng, rng};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;

/// Phrases that identify an anti-automation interstitial instead of content.
pub const BLOCK_MARKERS: &[&str] = &[
    "attention required",
    "please enable cookies",
    "sorry, you have been blocked",
];

/// True if `body` looks like an anti-automation page.
pub fn is_blocked(body: &str) -> bool {
    let lower = body.to_lowercase();
    BLOCK_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport failure for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an anti-automation page")]
    Blocked { url: String },

    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("renderer unavailable: {0}")]
    Resource(String),
}

/// Plain page retrieval. Implemented over HTTP by [`http::HttpTransport`].
pub trait Transport {
    /// GET `url` and return the response body.
    async fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// Which strategy produced a [`TierOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Feed,
    Plain,
    Rendered,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Feed => "feed",
            Tier::Plain => "plain",
            Tier::Rendered => "rendered",
        };
        f.write_str(s)
    }
}

/// Result of running a single tier.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    /// At least one item was found.
    Success(Vec<RawListingItem>),
    /// The tier ran cleanly but found nothing.
    Empty,
    /// The site answered with an anti-automation page.
    Blocked,
    /// Network, status, parse or renderer failure.
    Error(FetchError),
}

impl TierOutcome {
    /// Classify a list of items found by a tier that otherwise succeeded.
    pub fn from_items(items: Vec<RawListingItem>) -> Self {
        if items.is_empty() {
            TierOutcome::Empty
        } else {
            TierOutcome::Success(items)
        }
    }

    /// Classify a failure, keeping blocked pages distinct.
    pub fn from_error(err: FetchError) -> Self {
        match err {
            FetchError::Blocked { .. } => TierOutcome::Blocked,
            other => TierOutcome::Error(other),
        }
    }
}

/// Randomized delay range inserted before outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    pub min: Duration,
    pub max: Duration,
}

impl JitterRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// No delay at all.
    #[cfg(test)]
    pub const fn none() -> Self {
        Self::from_millis(0, 0)
    }

    /// Pick a delay inside the range.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let ms = rng().random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    pub async fn sleep(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tracing::trace!(?delay, "jitter");
            sleep(delay).await;
        }
    }
}
