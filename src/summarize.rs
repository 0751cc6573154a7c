//! Per-article summarization: prompt, model call, structured-block recovery.
//!
//! Every article yields exactly one [`ExtractionOutcome`]. A failed model
//! call or an unrecoverable answer becomes a [`SummaryError`] and the loop
//! moves on to the next article. A shutdown ends the loop early: finished
//! outcomes are kept, calls in flight are dropped, and the articles left
//! over are counted in [`SummaryBatch::skipped`].

use crate::api::{AskAsync, ask_with_backoff};
use crate::extract::parse_block;
use crate::models::{Article, ExtractionOutcome, Summary, SummaryError};
use crate::shutdown::Shutdown;
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct SummarizeConfig {
    /// Pause after each model call.
    pub pause: Duration,
    /// Model calls in flight at once. Output order is kept regardless.
    pub concurrency: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(1),
            concurrency: 1,
        }
    }
}

/// Summaries and error records of one batch, in article order.
#[derive(Debug, Default)]
pub struct SummaryBatch {
    pub summaries: Vec<Summary>,
    pub errors: Vec<SummaryError>,
    /// Articles never summarized because the run was interrupted.
    pub skipped: usize,
}

impl FromIterator<ExtractionOutcome> for SummaryBatch {
    fn from_iter<I: IntoIterator<Item = ExtractionOutcome>>(iter: I) -> Self {
        let mut batch = SummaryBatch::default();
        for outcome in iter {
            match outcome {
                ExtractionOutcome::Summarized(s) => batch.summaries.push(s),
                ExtractionOutcome::Failed(e) => batch.errors.push(e),
            }
        }
        batch
    }
}

/// Prompt asking for a strict JSON summary of `article`.
pub fn build_prompt(article: &Article) -> String {
    let title = if article.title.is_empty() { "Untitled" } else { &article.title };
    let source = if article.source.is_empty() { "Unknown" } else { &article.source };

    format!(
        r#"You are an assistant specialized in summarizing English news articles about AI, art, and technology.
Do not invent or add facts that are not explicitly in the article.
If the text is in another language, translate it correctly in English.

Summarize the following article in two or three short paragraphs.
Keep it factual, concise, and neutral (journalistic tone).
Return your answer as VALID JSON ONLY (no markdown, no extra text, no backticks).
Use exactly this schema and keys:
{{
  "title": "...",
  "source": "...",
  "summary": "...",
  "topic": "...",
  "tags": ["...", "...", "..."]
}}

ARTICLE:
Title: {title}
Source: {source}
Content: {content}"#,
        content = article.content
    )
}

/// Turn one raw model answer into an outcome for the article at `index` (1-based).
pub fn outcome_from_raw(index: usize, article: &Article, raw: &str) -> ExtractionOutcome {
    match parse_block::<Summary>(raw) {
        Ok(summary) => ExtractionOutcome::Summarized(summary.enrich(article)),
        Err(e) => {
            warn!(
                index,
                error = %e,
                response_preview = %truncate_for_log(raw, 300),
                "Could not recover a summary from model output"
            );
            ExtractionOutcome::Failed(SummaryError {
                index,
                title: article.title.clone(),
                error: e.to_string(),
            })
        }
    }
}

/// Summarize every article of `articles` through `asker`.
///
/// # Arguments
///
/// * `asker` - Model client; each call goes through [`ask_with_backoff`]
/// * `articles` - The batch, summarized in order
/// * `config` - Pause and concurrency settings
/// * `shutdown` - Stops the loop; outcomes already produced are kept
///
/// # Returns
///
/// Summaries and error records in article order, plus the number of
/// articles skipped by an interruption.
#[instrument(level = "info", skip_all, fields(count = articles.len()))]
pub async fn summarize_articles<A>(
    asker: &A,
    articles: &[Article],
    config: SummarizeConfig,
    shutdown: &Shutdown,
) -> SummaryBatch
where
    A: AskAsync<Response = String> + fmt::Debug,
{
    let total = articles.len();
    let outcomes: Vec<ExtractionOutcome> = stream::iter(articles.iter().enumerate())
        .map(|(i, article)| async move {
            let index = i + 1;
            let title = truncate_for_log(&article.title, 80);
            info!(index, total, %title, "Summarizing article");

            let prompt = build_prompt(article);
            let outcome = match ask_with_backoff(asker, &prompt).await {
                Ok(raw) => outcome_from_raw(index, article, &raw),
                Err(e) => ExtractionOutcome::Failed(SummaryError {
                    index,
                    title: article.title.clone(),
                    error: e.to_string(),
                }),
            };

            if !config.pause.is_zero() {
                sleep(config.pause).await;
            }
            outcome
        })
        .buffered(config.concurrency.max(1))
        .take_until(shutdown.triggered())
        .collect()
        .await;

    let done = outcomes.len();
    let mut batch: SummaryBatch = outcomes.into_iter().collect();
    batch.skipped = total - done;
    if batch.skipped > 0 {
        warn!(done, skipped = batch.skipped, "Summarization interrupted");
    }
    info!(
        total,
        summarized = batch.summaries.len(),
        failed = batch.errors.len(),
        "Summarization finished"
    );
    batch
}
