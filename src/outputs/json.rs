//! JSON batch files: raw snapshots, the day's article batch and the
//! summary/error arrays.
//!
//! Several runs on the same day add to the same files: new articles are
//! merged into the day's batch instead of replacing it, so keys committed by
//! an earlier run always point at an article that is still on disk.

use super::{PROCESSED_DIR, RAW_DIR, TREATED_DIR, dated_dir, parse_date_dir, snapshot_path};
use crate::canonical::canonicalize;
use crate::models::{Article, Summary};
use crate::summarize::SummaryBatch;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

const ARTICLES_FILE: &str = "articles.json";
const SUMMARIES_FILE: &str = "summaries.json";
const ERRORS_FILE: &str = "errors.json";
const LATEST_FILE: &str = "latest.json";

async fn write_json(path: &Path, json: &str) -> Result<(), Box<dyn Error>> {
    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create output dir");
            return Err(e.into());
        }
    }
    fs::write(path, json).await?;
    info!(path = %path.display(), "Wrote JSON file");
    Ok(())
}

async fn write_pretty<T: Serialize + ?Sized>(
    dir: &Path,
    file: &str,
    value: &T,
) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.join(file);
    write_json(&path, &serde_json::to_string_pretty(value)?).await?;
    Ok(path)
}

/// Read a JSON array. A missing file is `Ok(None)`.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>, Box<dyn Error>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Keep a copy of this run's articles under `raw/`.
///
/// # Arguments
///
/// * `data_dir` - Output root
/// * `at` - Local time of the run; names the dated directory and the file
/// * `articles` - What this run extracted, before any merging
///
/// # Returns
///
/// The snapshot path, or `None` when nothing was written: the run found no
/// articles, or produced exactly the content of `raw/latest.json`.
#[instrument(level = "info", skip_all, fields(count = articles.len()))]
pub async fn write_raw_snapshot(
    data_dir: &Path,
    at: NaiveDateTime,
    articles: &[Article],
) -> Result<Option<PathBuf>, Box<dyn Error>> {
    if articles.is_empty() {
        debug!("Nothing new; no raw snapshot");
        return Ok(None);
    }

    let json = serde_json::to_string_pretty(articles)?;
    let latest = data_dir.join(RAW_DIR).join(LATEST_FILE);
    match fs::read_to_string(&latest).await {
        Ok(previous) if previous == json => {
            info!(path = %latest.display(), "Snapshot unchanged; skipping");
            return Ok(None);
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let path = snapshot_path(data_dir, at);
    write_json(&path, &json).await?;
    write_json(&latest, &json).await?;
    Ok(Some(path))
}

/// Merge `articles` into `<data_dir>/processed/<date>/articles.json`.
///
/// Articles whose canonical URL is already in the day's batch are left out,
/// existing entries keep their order, and a run with nothing new leaves the
/// file untouched.
#[instrument(level = "info", skip_all, fields(count = articles.len(), %date))]
pub async fn write_articles(
    data_dir: &Path,
    date: NaiveDate,
    articles: &[Article],
) -> Result<PathBuf, Box<dyn Error>> {
    let dir = dated_dir(data_dir, PROCESSED_DIR, date);
    let path = dir.join(ARTICLES_FILE);

    let Some(mut batch) = read_json::<Article>(&path).await? else {
        return write_pretty(&dir, ARTICLES_FILE, articles).await;
    };

    let mut known: HashSet<String> = batch.iter().map(|a| canonicalize(&a.url)).collect();
    let before = batch.len();
    batch.extend(
        articles
            .iter()
            .filter(|a| known.insert(canonicalize(&a.url)))
            .cloned(),
    );

    let added = batch.len() - before;
    if added == 0 {
        info!(path = %path.display(), existing = before, "No new articles for this date");
        return Ok(path);
    }
    info!(existing = before, added, "Merging into the day's batch");
    write_pretty(&dir, ARTICLES_FILE, &batch).await
}

/// Write summaries and errors under `<data_dir>/treated/<date>/`.
///
/// Summaries are merged into the day's file by article URL, a newer summary
/// replacing an older one. `errors.json` describes the latest run only: it is
/// written when some summaries failed and removed otherwise.
///
/// # Returns
///
/// The paths written.
#[instrument(
    level = "info",
    skip_all,
    fields(summaries = batch.summaries.len(), errors = batch.errors.len())
)]
pub async fn write_summaries(
    data_dir: &Path,
    date: NaiveDate,
    batch: &SummaryBatch,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let dir = dated_dir(data_dir, TREATED_DIR, date);

    let mut merged: Vec<Summary> = read_json(&dir.join(SUMMARIES_FILE)).await?.unwrap_or_default();
    for summary in &batch.summaries {
        match merged.iter_mut().find(|s| s.url == summary.url) {
            Some(existing) => *existing = summary.clone(),
            None => merged.push(summary.clone()),
        }
    }
    let mut written = vec![write_pretty(&dir, SUMMARIES_FILE, &merged).await?];

    let errors_path = dir.join(ERRORS_FILE);
    if !batch.errors.is_empty() {
        written.push(write_pretty(&dir, ERRORS_FILE, &batch.errors).await?);
    } else if fs::try_exists(&errors_path).await? {
        fs::remove_file(&errors_path).await?;
        debug!(path = %errors_path.display(), "Removed stale errors file");
    }
    Ok(written)
}

/// Find the batch to summarize: today's if it has articles, otherwise the
/// most recent dated batch that does. Directories whose name is not a date
/// and batches that fail to parse are skipped.
#[instrument(level = "info", skip_all, fields(%today))]
pub async fn load_latest_articles(
    data_dir: &Path,
    today: NaiveDate,
) -> Result<Option<(NaiveDate, Vec<Article>)>, Box<dyn Error>> {
    let root = data_dir.join(PROCESSED_DIR);

    let mut dates = Vec::new();
    let mut entries = match fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(root = %root.display(), "No processed batches yet");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(date) = entry.file_name().to_str().and_then(parse_date_dir) {
            dates.push(date);
        }
    }

    // today first, then newest to oldest
    dates.sort_by(|a, b| (*b == today).cmp(&(*a == today)).then(b.cmp(a)));

    for date in dates {
        let path = dated_dir(data_dir, PROCESSED_DIR, date).join(ARTICLES_FILE);
        match read_json::<Article>(&path).await {
            Ok(Some(articles)) if !articles.is_empty() => {
                info!(path = %path.display(), count = articles.len(), "Using article batch");
                return Ok(Some((date, articles)));
            }
            Ok(_) => debug!(path = %path.display(), "Empty or missing batch"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable batch; skipping")
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SummaryError;

    fn date(d: u32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn at(h: u32, min: u32) -> NaiveDateTime {
        date(6, 5).and_hms_opt(h, min, 0).unwrap()
    }

    fn article(title: &str) -> Article {
        Article {
            title: title.to_string(),
            url: format!("https://site.test/{title}"),
            key: format!("https://site.test/{title}"),
            date: String::new(),
            source: "Site".to_string(),
            content: "Body".to_string(),
        }
    }

    fn summary(url: &str, text: &str) -> Summary {
        Summary {
            title: "T".into(),
            source: "S".into(),
            summary: text.into(),
            topic: String::new(),
            tags: vec![],
            url: url.into(),
            date: String::new(),
        }
    }

    fn read_titles(path: &Path) -> Vec<String> {
        let articles: Vec<Article> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        articles.into_iter().map(|a| a.title).collect()
    }

    #[tokio::test]
    async fn test_write_articles_layout_and_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_articles(dir.path(), date(6, 5), &[article("a")]).await.unwrap();

        assert_eq!(path, dir.path().join("processed/06-05-2025/articles.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        let obj = v[0].as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["content", "date", "source", "title", "url"]);
    }

    #[tokio::test]
    async fn test_second_run_same_day_merges_into_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_articles(dir.path(), date(6, 5), &[article("a")]).await.unwrap();

        // nothing new: the first run's batch survives
        write_articles(dir.path(), date(6, 5), &[]).await.unwrap();
        assert_eq!(read_titles(&path), vec!["a"]);

        // a tracking variant of "a" is not added twice
        let mut again = article("a");
        again.url = "https://site.test/a/?utm_source=x".to_string();
        write_articles(dir.path(), date(6, 5), &[again, article("b")]).await.unwrap();
        assert_eq!(read_titles(&path), vec!["a", "b"]);

        let (d, articles) = load_latest_articles(dir.path(), date(6, 5)).await.unwrap().unwrap();
        assert_eq!(d, date(6, 5));
        assert_eq!(articles.len(), 2);
    }

    #[tokio::test]
    async fn test_raw_snapshot_and_latest_copy() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_raw_snapshot(dir.path(), at(9, 30), &[article("a")]).await.unwrap();
        let first = first.unwrap();
        assert_eq!(first, dir.path().join("raw/06-05-2025/articles_09h30min00s.json"));
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            std::fs::read_to_string(dir.path().join("raw/latest.json")).unwrap()
        );

        // identical content is not snapshotted again
        let same = write_raw_snapshot(dir.path(), at(10, 0), &[article("a")]).await.unwrap();
        assert!(same.is_none());
        assert!(!dir.path().join("raw/06-05-2025/articles_10h00min00s.json").exists());

        // an empty run writes nothing and keeps latest.json
        assert!(write_raw_snapshot(dir.path(), at(10, 30), &[]).await.unwrap().is_none());

        let other = write_raw_snapshot(dir.path(), at(11, 0), &[article("b")]).await.unwrap();
        assert!(other.is_some());
        assert_eq!(read_titles(&dir.path().join("raw/latest.json")), vec!["b"]);
        assert_eq!(read_titles(&first), vec!["a"]);
    }

    #[tokio::test]
    async fn test_errors_file_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let clean = SummaryBatch {
            summaries: vec![summary("u", "Sum")],
            ..SummaryBatch::default()
        };
        let written = write_summaries(dir.path(), date(6, 5), &clean).await.unwrap();
        assert_eq!(written.len(), 1);
        assert!(!dir.path().join("treated/06-05-2025/errors.json").exists());

        let failed = SummaryBatch {
            errors: vec![SummaryError {
                index: 1,
                title: "T".into(),
                error: "boom".into(),
            }],
            ..SummaryBatch::default()
        };
        let written = write_summaries(dir.path(), date(7, 5), &failed).await.unwrap();
        assert_eq!(written.len(), 2);
        let treated = dir.path().join("treated/07-05-2025");
        let errors = std::fs::read_to_string(treated.join("errors.json")).unwrap();
        assert!(errors.contains("\"index\": 1"));
        let summaries = std::fs::read_to_string(treated.join("summaries.json")).unwrap();
        assert_eq!(summaries.trim(), "[]");
    }

    #[tokio::test]
    async fn test_summaries_merge_by_url_and_stale_errors_go() {
        let dir = tempfile::tempdir().unwrap();
        let first = SummaryBatch {
            summaries: vec![summary("https://a", "old")],
            errors: vec![SummaryError {
                index: 2,
                title: "B".into(),
                error: "no JSON object found".into(),
            }],
            skipped: 0,
        };
        write_summaries(dir.path(), date(6, 5), &first).await.unwrap();

        let second = SummaryBatch {
            summaries: vec![summary("https://b", "fresh"), summary("https://a", "new")],
            ..SummaryBatch::default()
        };
        write_summaries(dir.path(), date(6, 5), &second).await.unwrap();

        let treated = dir.path().join("treated/06-05-2025");
        let merged: Vec<Summary> =
            serde_json::from_str(&std::fs::read_to_string(treated.join("summaries.json")).unwrap())
                .unwrap();
        let pairs: Vec<(&str, &str)> =
            merged.iter().map(|s| (s.url.as_str(), s.summary.as_str())).collect();
        assert_eq!(pairs, vec![("https://a", "new"), ("https://b", "fresh")]);
        assert!(!treated.join("errors.json").exists());
    }

    #[tokio::test]
    async fn test_latest_prefers_today_then_newest_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_articles(dir.path(), date(1, 5), &[article("old")]).await.unwrap();
        write_articles(dir.path(), date(3, 5), &[article("newer")]).await.unwrap();
        write_articles(dir.path(), date(20, 4), &[article("oldest")]).await.unwrap();
        write_articles(dir.path(), date(9, 5), &[]).await.unwrap();
        std::fs::create_dir_all(dir.path().join("processed/not-a-date")).unwrap();

        // today (9 May) is empty: newest non-empty wins, compared as dates
        let (d, articles) = load_latest_articles(dir.path(), date(9, 5)).await.unwrap().unwrap();
        assert_eq!(d, date(3, 5));
        assert_eq!(articles[0].title, "newer");

        // today present and non-empty
        let (d, _) = load_latest_articles(dir.path(), date(1, 5)).await.unwrap().unwrap();
        assert_eq!(d, date(1, 5));
    }

    #[tokio::test]
    async fn test_latest_without_batches_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_latest_articles(dir.path(), date(1, 1)).await.unwrap().is_none());
    }
}
