//! Command-line interface definitions for Artwire Digest.
//!
//! Every option can be given as a flag; credentials and endpoints can also
//! come from environment variables.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the Artwire Digest application.
///
/// # Examples
///
/// ```sh
/// # Scrape the built-in sources and summarize the new articles
/// OPENAI_API_KEY=sk-... artwire_digest
///
/// # Scrape only, with a custom source list and no headless browser
/// artwire_digest --skip-summaries --no-browser --sources sources.yaml
///
/// # Re-summarize the most recent article batch without scraping
/// artwire_digest --from-latest
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Root of the dated output tree and the default seen-URL store
    #[arg(short, long, default_value = "data")]
    pub data_dir: PathBuf,

    /// YAML file with a `sources:` list of `{url, name}` entries
    #[arg(short, long)]
    pub sources: Option<PathBuf>,

    /// Seen-URL store (defaults to `<data-dir>/seen_urls.txt`)
    #[arg(long)]
    pub seen_file: Option<PathBuf>,

    /// Maximum articles extracted per source (0 for no limit)
    #[arg(short, long, default_value_t = 5)]
    pub limit: usize,

    /// HTTP(S) proxy for plain page requests
    #[arg(long, env = "SCRAPER_PROXY_URL")]
    pub proxy_url: Option<String>,

    /// Never start a headless browser
    #[arg(long)]
    pub no_browser: bool,

    /// Stop scraping after this many seconds and keep what was collected
    #[arg(long)]
    pub run_timeout_secs: Option<u64>,

    /// Only scrape; do not call the model
    #[arg(long, conflicts_with = "from_latest")]
    pub skip_summaries: bool,

    /// Skip scraping and summarize the most recent article batch
    #[arg(long)]
    pub from_latest: bool,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model used for summaries
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    /// Model calls in flight at once
    #[arg(long, default_value_t = 1)]
    pub summary_concurrency: usize,
}

impl Cli {
    pub fn seen_file(&self) -> PathBuf {
        self.seen_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("seen_urls.txt"))
    }

    pub fn per_source_limit(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn wants_summaries(&self) -> bool {
        !self.skip_summaries
    }
}
