//! Orchestration of one acquisition run.
//!
//! Sources are processed one at a time, and articles one at a time within a
//! source:
//!
//! 1. the fetch cascade lists the source's latest links
//! 2. each link is canonicalized and dropped if the store, this run, or this
//!    listing has already seen it
//! 3. kept links are loaded and their body text extracted, up to the
//!    per-source limit
//!
//! A headless browser is started lazily for a source (only when a tier or an
//! article needs one) and is closed when the source is done. Keys reach the
//! [`DedupStore`] only through [`Pipeline::commit`], which the caller invokes
//! after the article batch has been written.

use crate::canonical::canonicalize;
use crate::content::extract_article;
use crate::dedup::DedupStore;
use crate::fetch::cascade::{CascadeConfig, FetchCascade};
use crate::fetch::{JitterRange, Transport};
use crate::models::{Article, RawListingItem, SourceDescriptor};
use crate::render::{LazySession, Launch, PlainPages, RenderOptions, WithFallback};
use crate::shutdown::Shutdown;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Maximum articles extracted per source. `None` means no cap.
    pub per_source_limit: Option<usize>,
    /// Delay before every article load, the first one included: the listing
    /// request to the same host comes right before it.
    pub article_jitter: JitterRange,
    pub article_render: RenderOptions,
    pub cascade: CascadeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            per_source_limit: Some(5),
            article_jitter: JitterRange::from_millis(600, 1200),
            article_render: RenderOptions::ARTICLE,
            cascade: CascadeConfig::default(),
        }
    }
}

/// Counts for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub name: String,
    /// Links returned by the cascade.
    pub listed: usize,
    /// Links left after dedup.
    pub kept: usize,
    /// Articles with body text.
    pub extracted: usize,
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub articles: Vec<Article>,
    pub sources: Vec<SourceReport>,
    /// The run was interrupted before every source was processed.
    pub aborted: bool,
}

pub struct Pipeline<'a, T, L> {
    transport: T,
    launcher: L,
    store: &'a mut DedupStore,
    config: PipelineConfig,
}

impl<'a, T: Transport, L: Launch> Pipeline<'a, T, L> {
    pub fn new(
        transport: T,
        launcher: L,
        store: &'a mut DedupStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transport,
            launcher,
            store,
            config,
        }
    }

    /// Process every source in order.
    ///
    /// # Arguments
    ///
    /// * `sources` - Listing pages, processed one at a time
    /// * `shutdown` - Checked between sources and raced against every load
    ///
    /// # Returns
    ///
    /// The extracted articles with per-source counts. Never fails: a source
    /// that yields nothing simply contributes no articles. Nothing is
    /// committed here; see [`Pipeline::commit`].
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run(&self, sources: &[SourceDescriptor], shutdown: &Shutdown) -> RunReport {
        let mut report = RunReport::default();
        let mut run_seen: HashSet<String> = HashSet::new();

        for source in sources {
            if shutdown.is_triggered() {
                report.aborted = true;
                break;
            }

            let (source_report, articles, aborted) =
                self.process_source(source, &mut run_seen, shutdown).await;
            info!(
                source = %source_report.name,
                listed = source_report.listed,
                kept = source_report.kept,
                extracted = source_report.extracted,
                "Source done"
            );
            report.sources.push(source_report);
            report.articles.extend(articles);

            if aborted {
                report.aborted = true;
                break;
            }
        }

        info!(
            articles = report.articles.len(),
            aborted = report.aborted,
            "Acquisition finished"
        );
        report
    }

    /// Append the keys of `articles` to the store.
    pub async fn commit(&mut self, articles: &[Article]) -> std::io::Result<usize> {
        let keys: Vec<&str> = articles.iter().map(|a| a.key.as_str()).collect();
        let written = self.store.commit(&keys).await?;
        info!(written, path = %self.store.path().display(), "Committed new keys");
        Ok(written)
    }

    /// Run one source. The renderer session lives for exactly this call.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    async fn process_source(
        &self,
        source: &SourceDescriptor,
        run_seen: &mut HashSet<String>,
        shutdown: &Shutdown,
    ) -> (SourceReport, Vec<Article>, bool) {
        let mut report = SourceReport {
            name: source.name.clone(),
            listed: 0,
            kept: 0,
            extracted: 0,
        };
        let mut articles = Vec::new();

        let session = LazySession::new(&self.launcher);
        let cascade = FetchCascade::new(&self.transport, self.config.cascade);

        let items = tokio::select! {
            biased;
            _ = shutdown.triggered() => return (report, articles, true),
            items = cascade.fetch(source, Some(&session)) => items,
        };
        report.listed = items.len();

        let candidates = self.filter_new(items, run_seen);
        report.kept = candidates.len();

        let pages = WithFallback::new(&session, PlainPages(&self.transport));
        let mut aborted = false;
        for (key, item) in candidates {
            if self.config.per_source_limit.is_some_and(|cap| articles.len() >= cap) {
                debug!(cap = ?self.config.per_source_limit, "Per-source limit reached");
                break;
            }

            // jitter runs whatever the previous load did, so failures do not burst
            let load = async {
                self.config.article_jitter.sleep().await;
                extract_article(&pages, &item.url, self.config.article_render).await
            };
            let content = tokio::select! {
                biased;
                _ = shutdown.triggered() => { aborted = true; break; }
                content = load => content,
            };

            // failed extractions stay out of run_seen so another source may still produce them
            let Some(content) = content else { continue };
            run_seen.insert(key.clone());
            articles.push(Article {
                title: item.title.trim().to_string(),
                url: item.url,
                key,
                date: item.published.unwrap_or_default(),
                source: source.name.clone(),
                content,
            });
        }

        if session.is_launched() {
            debug!("Releasing headless browser");
        }
        report.extracted = articles.len();
        (report, articles, aborted)
    }

    /// Drop items whose key is empty, already stored, already produced in
    /// this run, or repeated within this listing.
    fn filter_new(
        &self,
        items: Vec<RawListingItem>,
        run_seen: &HashSet<String>,
    ) -> Vec<(String, RawListingItem)> {
        let mut in_listing = HashSet::new();
        let mut out = Vec::new();
        for item in items {
            let key = canonicalize(&item.url);
            if key.is_empty() {
                warn!(url = %item.url, "Skipping item without a usable URL");
                continue;
            }
            if self.store.contains(&key) || run_seen.contains(&key) {
                debug!(%key, "Already processed");
                continue;
            }
            if !in_listing.insert(key.clone()) {
                debug!(%key, "Duplicate within listing");
                continue;
            }
            out.push((key, item));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::fetch::cascade::tests::{FakeRenderer, FakeTransport, quiet};
    use crate::render::Render;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};
    use tokio::sync::watch;

    /// Hands out clones of one fake renderer, or fails every launch.
    #[derive(Debug, Default)]
    struct FakeLauncher {
        renderer: Option<FakeRenderer>,
        launches: Cell<usize>,
    }

    impl FakeLauncher {
        fn with(renderer: FakeRenderer) -> Self {
            Self {
                renderer: Some(renderer),
                launches: Cell::new(0),
            }
        }
    }

    impl Launch for FakeLauncher {
        type Session = FakeRenderer;

        async fn launch(&self) -> Result<FakeRenderer, FetchError> {
            self.launches.set(self.launches.get() + 1);
            self.renderer
                .clone()
                .ok_or_else(|| FetchError::Resource("no browser here".to_string()))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            per_source_limit: Some(5),
            article_jitter: JitterRange::none(),
            article_render: RenderOptions::ARTICLE,
            cascade: quiet(),
        }
    }

    fn feed(links: &[&str]) -> String {
        let items: String = links
            .iter()
            .enumerate()
            .map(|(i, l)| {
                format!(
                    "<item><title>Item {i}</title><link>{l}</link>\
                     <pubDate>Tue, 06 May 2025 10:00:00 GMT</pubDate></item>"
                )
            })
            .collect();
        format!(r#"<rss version="2.0"><channel><title>Feed</title>{items}</channel></rss>"#)
    }

    const BODY: &str = "<article><p>Body text.</p></article>";

    fn store() -> (tempfile::TempDir, DedupStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::empty(dir.path().join("seen.txt"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_tracking_and_slash_variants_yield_one_article() {
        let renderer = FakeRenderer::default()
            .with("https://x.com/a?utm_source=y", BODY)
            .with("https://x.com/a/", BODY);
        let transport = FakeTransport::default().with(
            "https://x.com/news/feed",
            Ok(&feed(&["https://x.com/a?utm_source=y", "https://x.com/a/"])),
        );
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();

        let pipeline = Pipeline::new(transport, FakeLauncher::with(renderer), &mut store, config());
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com/news", "X")], &shutdown)
            .await;

        assert_eq!(report.articles.len(), 1);
        let a = &report.articles[0];
        assert_eq!(a.key, "https://x.com/a");
        assert_eq!(a.url, "https://x.com/a?utm_source=y");
        assert_eq!(a.source, "X");
        assert_eq!(a.date, "2025-05-06T10:00:00+00:00");
        assert_eq!(a.content, "Body text.");
        assert_eq!(report.sources[0].listed, 2);
        assert_eq!(report.sources[0].kept, 1);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_stop_others() {
        let renderer = FakeRenderer::default().with("https://good.test/a", BODY);
        let transport = FakeTransport::default()
            .with("https://good.test/feed", Ok(&feed(&["https://good.test/a"])));
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();

        let sources = [
            SourceDescriptor::new("https://bad.test", "Bad"),
            SourceDescriptor::new("https://good.test", "Good"),
        ];
        let pipeline = Pipeline::new(transport, FakeLauncher::with(renderer), &mut store, config());
        let report = pipeline.run(&sources, &shutdown).await;

        assert!(!report.aborted);
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.sources[0].extracted, 0);
        assert_eq!(report.articles.len(), 1);
        assert_eq!(report.articles[0].source, "Good");
    }

    #[tokio::test]
    async fn test_stored_keys_are_excluded_and_not_recommitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.txt");
        tokio::fs::write(&path, "https://x.com/old\n").await.unwrap();
        let mut store = DedupStore::load(&path).await.unwrap();

        let renderer = FakeRenderer::default()
            .with("https://x.com/old", BODY)
            .with("https://x.com/new", BODY);
        let transport = FakeTransport::default().with(
            "https://x.com/feed",
            Ok(&feed(&["https://x.com/old/?ref=home", "https://x.com/new"])),
        );
        let (_tx, shutdown) = Shutdown::manual();

        let launcher = FakeLauncher::with(renderer);
        let mut pipeline = Pipeline::new(transport, launcher, &mut store, config());
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;
        assert_eq!(report.articles.len(), 1);
        assert_eq!(report.articles[0].key, "https://x.com/new");

        assert_eq!(pipeline.commit(&report.articles).await.unwrap(), 1);
        assert_eq!(pipeline.commit(&report.articles).await.unwrap(), 0);

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "https://x.com/old\nhttps://x.com/new\n");
    }

    #[tokio::test]
    async fn test_per_source_limit_counts_successes() {
        let renderer = FakeRenderer::default()
            .with("https://x.com/2", BODY)
            .with("https://x.com/3", BODY)
            .with("https://x.com/4", BODY);
        let transport = FakeTransport::default().with(
            "https://x.com/feed",
            Ok(&feed(&[
                "https://x.com/1",
                "https://x.com/2",
                "https://x.com/3",
                "https://x.com/4",
            ])),
        );
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();
        let mut cfg = config();
        cfg.per_source_limit = Some(2);

        let launcher = FakeLauncher::with(renderer.clone());
        let pipeline = Pipeline::new(transport, launcher, &mut store, cfg);
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;

        // /1 has no page and is skipped without counting against the cap
        let urls: Vec<&str> = report.articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.com/2", "https://x.com/3"]);
        assert_eq!(renderer.calls.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_launch_failure_falls_back_to_plain_transport() {
        let transport = FakeTransport::default()
            .with("https://x.com/feed", Ok(&feed(&["https://x.com/a"])))
            .with("https://x.com/a", Ok("<p>Fetched without a browser.</p>"));
        let launcher = FakeLauncher::default();
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();

        let pipeline = Pipeline::new(transport, launcher, &mut store, config());
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;

        assert_eq!(report.articles.len(), 1);
        assert_eq!(report.articles[0].content, "Fetched without a browser.");
        assert_eq!(pipeline.launcher.launches.get(), 1);
    }

    #[tokio::test]
    async fn test_browser_launched_on_demand_per_source() {
        let transport = FakeTransport::default()
            .with("https://x.com/feed", Ok(&feed(&["https://x.com/a"])));
        let launcher = FakeLauncher::with(FakeRenderer::default().with("https://x.com/a", BODY));
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();

        let pipeline = Pipeline::new(transport, launcher, &mut store, config());
        let sources = [
            SourceDescriptor::new("https://x.com", "X"),
            SourceDescriptor::new("https://empty.test", "Empty"),
        ];
        let report = pipeline.run(&sources, &shutdown).await;

        assert_eq!(report.articles.len(), 1);
        // one launch for X's article, one for Empty's tier 3
        assert_eq!(pipeline.launcher.launches.get(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_source() {
        let transport = FakeTransport::default()
            .with("https://x.com/feed", Ok(&feed(&["https://x.com/a"])));
        let launcher = FakeLauncher::with(FakeRenderer::default().with("https://x.com/a", BODY));
        let (_dir, mut store) = store();
        let (tx, shutdown) = Shutdown::manual();
        tx.send(true).unwrap();

        let pipeline = Pipeline::new(transport, launcher, &mut store, config());
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;

        assert!(report.aborted);
        assert!(report.articles.is_empty());
        assert_eq!(pipeline.launcher.launches.get(), 0);
    }

    #[tokio::test]
    async fn test_same_article_across_sources_is_kept_once() {
        let renderer = FakeRenderer::default().with("https://x.com/a", BODY);
        let transport = FakeTransport::default()
            .with("https://one.test/feed", Ok(&feed(&["https://x.com/a"])))
            .with("https://two.test/feed", Ok(&feed(&["https://x.com/a#comments"])));
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();

        let sources = [
            SourceDescriptor::new("https://one.test", "One"),
            SourceDescriptor::new("https://two.test", "Two"),
        ];
        let pipeline = Pipeline::new(transport, FakeLauncher::with(renderer), &mut store, config());
        let report = pipeline.run(&sources, &shutdown).await;

        assert_eq!(report.articles.len(), 1);
        assert_eq!(report.sources[1].kept, 0);
    }

    /// Serves pages like [`FakeRenderer`], and fires the shutdown once
    /// `trip_after` pages have been served. Counts its own drops.
    #[derive(Debug, Clone)]
    struct TripRenderer {
        inner: FakeRenderer,
        trip_after: usize,
        tx: Rc<watch::Sender<bool>>,
        drops: Rc<Cell<usize>>,
    }

    impl Render for TripRenderer {
        async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError> {
            let page = self.inner.render(url, opts).await;
            if self.inner.calls.borrow().len() >= self.trip_after {
                let _ = self.tx.send(true);
            }
            page
        }
    }

    impl Drop for TripRenderer {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[derive(Debug)]
    struct TripLauncher(TripRenderer);

    impl Launch for TripLauncher {
        type Session = TripRenderer;

        async fn launch(&self) -> Result<TripRenderer, FetchError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_shutdown_mid_source_keeps_completed_articles() {
        let transport = FakeTransport::default().with(
            "https://x.com/feed",
            Ok(&feed(&["https://x.com/1", "https://x.com/2", "https://x.com/3"])),
        );
        let (tx, shutdown) = Shutdown::manual();
        let inner = FakeRenderer::default()
            .with("https://x.com/1", BODY)
            .with("https://x.com/2", BODY)
            .with("https://x.com/3", BODY);
        let drops = Rc::new(Cell::new(0));
        let launcher = TripLauncher(TripRenderer {
            inner: inner.clone(),
            trip_after: 1,
            tx: Rc::new(tx),
            drops: Rc::clone(&drops),
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.txt");
        let mut store = DedupStore::empty(&path);
        let mut pipeline = Pipeline::new(transport, launcher, &mut store, config());
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;

        assert!(report.aborted);
        let urls: Vec<&str> = report.articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.com/1"]);
        assert_eq!(*inner.calls.borrow(), vec!["https://x.com/1"]);
        // the per-source session is gone; only the launcher's template is alive
        assert_eq!(drops.get(), 1);

        pipeline.commit(&report.articles).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "https://x.com/1\n");
    }

    #[tokio::test]
    async fn test_jitter_precedes_every_article_load() {
        // four links, none of which loads
        let links = ["https://x.com/1", "https://x.com/2", "https://x.com/3", "https://x.com/4"];
        let transport = FakeTransport::default().with("https://x.com/feed", Ok(&feed(&links)));
        let (_dir, mut store) = store();
        let (_tx, shutdown) = Shutdown::manual();
        let mut cfg = config();
        cfg.article_jitter = JitterRange::from_millis(50, 50);

        let pipeline = Pipeline::new(transport, FakeLauncher::default(), &mut store, cfg);
        let t0 = Instant::now();
        let report = pipeline
            .run(&[SourceDescriptor::new("https://x.com", "X")], &shutdown)
            .await;

        assert!(report.articles.is_empty());
        assert_eq!(report.sources[0].kept, 4);
        assert!(t0.elapsed() >= Duration::from_millis(200), "elapsed {:?}", t0.elapsed());
    }
}
