//! The list of sources to scrape.
//!
//! A YAML file can replace the built-in list:
//!
//! ```yaml
//! sources:
//!   - url: https://news.artnet.com/art-world/science-technology/feed
//!     name: Artnet
//!   - url: https://techcrunch.com/category/artificial-intelligence/
//!     name: TechCrunch
//! ```

use crate::models::SourceDescriptor;
use serde::Deserialize;
use std::error::Error;
use std::path::Path;
use tracing::{info, instrument};

/// Built-in sources, in scraping order.
const DEFAULT_SOURCES: &[(&str, &str)] = &[
    ("https://news.artnet.com/art-world/science-technology/feed", "Artnet"),
    ("https://www.artnews.com/c/art-news/news/feed/", "ArtNews"),
    ("https://news.artnet.com/market", "Artnet market"),
    ("https://news.artnet.com/multimedia", "Artnet multimedia"),
    ("https://techcrunch.com/category/artificial-intelligence/", "TechCrunch"),
    ("https://fr.artprice.com/artprice-news", "Artprice"),
    ("https://fr.artprice.com/artmarketinsight", "ArtPrice ArtMarketInsight"),
    ("https://fr.cointelegraph.com/tags/nft", "Cointelegraph NFT"),
    ("https://fr.cointelegraph.com/tags/ai", "Cointelegraph AI"),
    ("https://www.dezeen.com/technology/", "Dezeen Technology"),
    ("https://www.fastcompany.com/technology", "Fastcompany Tech"),
    ("https://www.engadget.com/ai/", "Engadget AI"),
    ("https://www.engadget.com/science/robotics/", "Engadget robotics"),
];

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceDescriptor>,
}

pub fn default_sources() -> Vec<SourceDescriptor> {
    DEFAULT_SOURCES
        .iter()
        .map(|(url, name)| SourceDescriptor::new(*url, *name))
        .collect()
}

/// Parse a YAML source list. Entries with a blank URL are rejected.
pub fn parse_sources(yaml: &str) -> Result<Vec<SourceDescriptor>, Box<dyn Error>> {
    let file: SourcesFile = serde_yaml::from_str(yaml)?;
    if let Some(bad) = file.sources.iter().find(|s| s.url.trim().is_empty()) {
        return Err(format!("source {:?} has an empty url", bad.name).into());
    }
    Ok(file.sources)
}

/// Read the source list from `path`, or fall back to the built-in list.
#[instrument(level = "info", skip_all)]
pub async fn load_sources(path: Option<&Path>) -> Result<Vec<SourceDescriptor>, Box<dyn Error>> {
    let sources = match path {
        Some(p) => {
            let yaml = tokio::fs::read_to_string(p).await?;
            let sources = parse_sources(&yaml)?;
            info!(path = %p.display(), count = sources.len(), "Loaded sources file");
            sources
        }
        None => {
            let sources = default_sources();
            info!(count = sources.len(), "Using built-in sources");
            sources
        }
    };
    Ok(sources)
}
