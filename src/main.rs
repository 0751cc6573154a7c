//! # Artwire Digest
//!
//! Collects new articles from art, AI and technology sites whose structure and
//! anti-bot defenses vary from one source to the next, then asks an
//! OpenAI-compatible model for a structured summary of each one.
//!
//! ## Usage
//!
//! ```sh
//! OPENAI_API_KEY=sk-... artwire_digest -d ./data
//! ```
//!
//! ## Architecture
//!
//! 1. **Listing**: each source goes through a fetch cascade (feed, plain
//!    HTTP, headless browser) until one tier finds article links
//! 2. **Dedup**: links are canonicalized and checked against the seen-URL store
//! 3. **Extraction**: article body text is pulled from the kept links
//! 4. **Output**: a raw snapshot is kept, the articles are merged into the
//!    day's batch, then their keys are committed
//! 5. **Summaries**: each article goes to the model; a JSON object is
//!    recovered from every answer, or an error record is kept instead
//!
//! Ctrl-C stops either step after what is in progress; whatever finished is
//! still written. `--run-timeout` only bounds the scraping.

use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod canonical;
mod cli;
mod content;
mod dedup;
mod extract;
mod fetch;
mod models;
mod outputs;
mod pipeline;
mod render;
mod shutdown;
mod sources;
mod summarize;
mod utils;

use api::{ChatClient, ChatConfig};
use cli::Cli;
use dedup::DedupStore;
use fetch::http::{HttpConfig, HttpTransport};
use models::Article;
use outputs::json;
use pipeline::{Pipeline, PipelineConfig};
use render::ChromeLauncher;
use shutdown::Shutdown;
use summarize::{SummarizeConfig, summarize_articles};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("artwire_digest starting up");

    let args = Cli::parse();
    debug!(data_dir = %args.data_dir.display(), sources = ?args.sources, "Parsed CLI arguments");

    // Missing credentials are fatal before any network work
    let api_key = if args.wants_summaries() {
        match args.openai_api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => Some(k.to_string()),
            None => {
                error!("OPENAI_API_KEY is not set (pass --openai-api-key or use --skip-summaries)");
                return Err("missing OpenAI API key".into());
            }
        }
    } else {
        None
    };

    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let now = Local::now().naive_local();
    let today = now.date();
    let shutdown = Shutdown::install();

    let (batch_date, articles) = if args.from_latest {
        match json::load_latest_articles(&args.data_dir, today).await? {
            Some(found) => found,
            None => {
                warn!("No article batch to summarize");
                return Ok(());
            }
        }
    } else {
        (today, acquire(&args, now, &shutdown).await?)
    };

    if let Some(api_key) = api_key {
        if articles.is_empty() {
            info!("No new articles; skipping summaries");
        } else if shutdown.is_triggered() {
            warn!(articles = articles.len(), "Interrupted; skipping summaries");
        } else {
            summarize_batch(&args, api_key, batch_date, &articles, &shutdown).await?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Scrape every source, write the article batch, then commit its keys.
///
/// # Returns
///
/// The articles this run extracted, which are the ones to summarize.
#[instrument(level = "info", skip_all)]
async fn acquire(
    args: &Cli,
    now: NaiveDateTime,
    shutdown: &Shutdown,
) -> Result<Vec<Article>, Box<dyn Error>> {
    let sources = sources::load_sources(args.sources.as_deref()).await?;

    let seen_file = args.seen_file();
    let mut store = DedupStore::load(&seen_file).await?;
    info!(path = %seen_file.display(), known = store.len(), "Dedup store ready");

    let http_config = HttpConfig {
        proxy_url: args.proxy_url.clone(),
        ..HttpConfig::default()
    };
    if http_config.proxy_url.is_some() {
        info!("Routing plain requests through proxy");
    }
    let transport = HttpTransport::new(&http_config)?;
    let launcher = ChromeLauncher::new(http_config.user_agent.clone(), !args.no_browser);

    let config = PipelineConfig {
        per_source_limit: args.per_source_limit(),
        ..PipelineConfig::default()
    };
    let shutdown = shutdown.with_timeout(args.run_timeout());

    let mut pipeline = Pipeline::new(transport, launcher, &mut store, config);
    let report = pipeline.run(&sources, &shutdown).await;

    for s in &report.sources {
        if s.listed == 0 {
            warn!(source = %s.name, "Source produced no listing items");
        }
    }
    if report.aborted {
        warn!(articles = report.articles.len(), "Run interrupted; keeping completed articles");
    }

    // keys are committed only once the batch is safely on disk
    if let Some(path) = json::write_raw_snapshot(&args.data_dir, now, &report.articles).await? {
        debug!(path = %path.display(), "Raw snapshot kept");
    }
    json::write_articles(&args.data_dir, now.date(), &report.articles).await?;
    pipeline.commit(&report.articles).await?;

    Ok(report.articles)
}

/// Summarize `articles` and write the summary and error files.
#[instrument(level = "info", skip_all, fields(count = articles.len(), %date))]
async fn summarize_batch(
    args: &Cli,
    api_key: String,
    date: NaiveDate,
    articles: &[Article],
    shutdown: &Shutdown,
) -> Result<(), Box<dyn Error>> {
    let client = ChatClient::new(ChatConfig::new(&args.api_base, api_key, &args.model))?;
    info!(?client, "Chat client ready");

    let config = SummarizeConfig {
        concurrency: args.summary_concurrency.max(1),
        ..SummarizeConfig::default()
    };
    let batch = summarize_articles(&client, articles, config, shutdown).await;

    match json::write_summaries(&args.data_dir, date, &batch).await {
        Ok(paths) => info!(files = paths.len(), "Summary output written"),
        Err(e) => {
            error!(error = %e, "Failed to write summaries");
            return Err(e);
        }
    }

    if batch.skipped > 0 {
        warn!(
            skipped = batch.skipped,
            "Interrupted; run again with --from-latest to summarize the rest"
        );
    }
    if !batch.errors.is_empty() {
        warn!(
            failed = batch.errors.len(),
            dir = %args.data_dir.join(outputs::TREATED_DIR).display(),
            "Some articles could not be summarized; see errors.json"
        );
    }
    Ok(())
}
