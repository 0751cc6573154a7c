//! Data models shared by the acquisition pipeline and the summary step.
//!
//! - [`SourceDescriptor`]: a configured listing page and its display name
//! - [`RawListingItem`]: a link discovered on a listing page or feed
//! - [`Article`]: a deduplicated article with its extracted body text
//! - [`Summary`] / [`SummaryError`]: the two shapes an [`ExtractionOutcome`] can take

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A configured source: the page (or feed) listing its latest articles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceDescriptor {
    /// Listing page or feed URL.
    pub url: String,
    /// Human readable source name, copied onto every [`Article`].
    pub name: String,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

/// A link found by the fetch cascade. Consumed immediately by dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListingItem {
    pub title: String,
    pub url: String,
    /// Publication date as the source wrote it, if the source gave one.
    pub published: Option<String>,
}

/// An article that survived dedup and yielded body text.
///
/// The canonical key is kept in memory for the store commit but is not part
/// of the serialized batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    #[serde(skip)]
    pub key: String,
    #[serde(default)]
    pub date: String,
    pub source: String,
    pub content: String,
}

/// A model summary of one article, enriched with the article's url and date.
///
/// Only `summary` is required in the model's answer; every other field
/// tolerates being absent. Models drift from the schema, so text fields take
/// any JSON scalar and `tags` also takes a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Summary {
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub source: String,
    #[serde(deserialize_with = "lenient::text")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub topic: String,
    #[serde(default, deserialize_with = "lenient::tags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub date: String,
}

impl Summary {
    /// Attach the originating article's url/date and tidy the tag list.
    pub fn enrich(mut self, article: &Article) -> Self {
        self.url = article.url.clone();
        self.date = article.date.clone();
        self.tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unique()
            .collect();
        self
    }
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn to_text(value: Value) -> String {
        match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// A string, or any other value rendered as JSON text; `null` is empty.
    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Value::deserialize(d).map(to_text)
    }

    /// An array of values, or one comma-separated string.
    pub fn tags<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items.into_iter().map(to_text).collect(),
            Value::String(s) => s.split(',').map(str::to_string).collect(),
            Value::Null => Vec::new(),
            other => vec![to_text(other)],
        })
    }
}

/// Error record for an article whose summary could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SummaryError {
    /// 1-based position of the article in the batch.
    pub index: usize,
    pub title: String,
    pub error: String,
}

/// Exactly one of these is produced per summarized article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Summarized(Summary),
    Failed(SummaryError),
}
