//! Headless-browser rendering behind a small capability interface.
//!
//! The fetch cascade (tier 3) and the content extractor only depend on
//! [`Render`]. A session is obtained from a [`Launch`] implementation once
//! per source and is released when it is dropped, which covers early
//! returns, errors and cancelled futures alike.
//!
//! The concrete implementation drives Chrome through `headless_chrome` and is
//! compiled with the `chrome` feature (on by default). Without it,
//! [`ChromeLauncher::launch`] always reports the renderer as unavailable.

use crate::fetch::{FetchError, Transport};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long a single page load may take and how long to let scripts settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub timeout: Duration,
    pub settle: Duration,
}

impl RenderOptions {
    /// Listing pages: JS-heavy, so a long timeout and no extra settle.
    pub const LISTING: RenderOptions = RenderOptions {
        timeout: Duration::from_secs(60),
        settle: Duration::ZERO,
    };

    /// Article pages.
    pub const ARTICLE: RenderOptions = RenderOptions {
        timeout: Duration::from_secs(20),
        settle: Duration::from_secs(2),
    };
}

/// An open renderer session.
pub trait Render {
    /// Load `url` and return the resulting HTML.
    async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError>;
}

/// Something that can open a renderer session.
pub trait Launch {
    type Session: Render;

    async fn launch(&self) -> Result<Self::Session, FetchError>;
}

/// A session launched on first use and released when this value is dropped.
///
/// A failed launch is remembered, so a missing browser costs one attempt per
/// source instead of one per page.
pub struct LazySession<'a, L: Launch> {
    launcher: &'a L,
    cell: OnceCell<Result<L::Session, FetchError>>,
}

impl<'a, L: Launch> LazySession<'a, L> {
    pub fn new(launcher: &'a L) -> Self {
        Self {
            launcher,
            cell: OnceCell::new(),
        }
    }

    /// Whether a browser was actually started.
    pub fn is_launched(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }
}

impl<L: Launch> Render for LazySession<'_, L> {
    async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError> {
        let session = self
            .cell
            .get_or_init(|| async {
                let launched = self.launcher.launch().await;
                if let Err(e) = &launched {
                    warn!(error = %e, "Headless browser unavailable");
                }
                launched
            })
            .await;
        match session {
            Ok(s) => s.render(url, opts).await,
            Err(e) => Err(e.clone()),
        }
    }
}

/// Try `primary`; if it reports the renderer itself as unavailable, load the
/// page through `fallback` instead. Page-level failures are not retried.
#[derive(Debug)]
pub struct WithFallback<A, B> {
    primary: A,
    fallback: B,
}

impl<A: Render, B: Render> WithFallback<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A: Render, B: Render> Render for WithFallback<A, B> {
    async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError> {
        match self.primary.render(url, opts).await {
            Err(FetchError::Resource(reason)) => {
                debug!(%url, %reason, "Loading page without a browser");
                self.fallback.render(url, opts).await
            }
            other => other,
        }
    }
}

impl<R: Render> Render for &R {
    async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError> {
        (**self).render(url, opts).await
    }
}

/// Deadline bookkeeping for a session whose page loads run on another thread.
///
/// A load that overruns its deadline cannot be stopped and keeps driving the
/// tab, so the session refuses every later page with a [`FetchError::Resource`].
/// [`WithFallback`] then sends those pages to the plain transport.
#[derive(Debug, Default)]
#[cfg_attr(not(feature = "chrome"), allow(dead_code))]
pub struct TabGuard {
    abandoned: AtomicBool,
}

#[cfg_attr(not(feature = "chrome"), allow(dead_code))]
impl TabGuard {
    /// Fails once a previous load overran its deadline.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(FetchError::Resource(
                "tab abandoned after a timed-out load".to_string(),
            ));
        }
        Ok(())
    }

    /// Await `load` for at most `limit`. On overrun the page fails as a
    /// transport error and the tab is marked abandoned.
    pub async fn bounded<T>(
        &self,
        url: &str,
        limit: Duration,
        load: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        match timeout(limit, load).await {
            Ok(result) => result,
            Err(_) => {
                self.abandoned.store(true, Ordering::Release);
                warn!(%url, ?limit, "Page load overran its deadline; abandoning the tab");
                Err(FetchError::Transport {
                    url: url.to_string(),
                    reason: format!("render timed out after {limit:?}"),
                })
            }
        }
    }
}

/// Loads pages through a plain [`Transport`]: no scripts run.
#[derive(Debug)]
pub struct PlainPages<'a, T>(pub &'a T);

impl<T: Transport> Render for PlainPages<'_, T> {
    async fn render(&self, url: &str, _opts: RenderOptions) -> Result<String, FetchError> {
        self.0.get(url).await
    }
}

/// Launches headless Chrome sessions.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub user_agent: String,
    pub enabled: bool,
}

impl ChromeLauncher {
    pub fn new(user_agent: impl Into<String>, enabled: bool) -> Self {
        Self {
            user_agent: user_agent.into(),
            enabled,
        }
    }
}

#[cfg(feature = "chrome")]
mod chrome {
    use super::{ChromeLauncher, Launch, Render, RenderOptions, TabGuard};
    use crate::fetch::FetchError;
    use headless_chrome::{Browser, LaunchOptions, Tab};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::task::spawn_blocking;
    use tokio::time::sleep;
    use tracing::{debug, info, instrument};

    /// A running Chrome with one tab. The process is killed on drop.
    pub struct ChromeSession {
        // field order matters: the tab goes before the browser that owns it
        tab: Arc<Tab>,
        guard: TabGuard,
        _browser: Browser,
    }

    impl std::fmt::Debug for ChromeSession {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ChromeSession").finish_non_exhaustive()
        }
    }

    impl Drop for ChromeSession {
        fn drop(&mut self) {
            debug!("Closing headless browser session");
        }
    }

    fn resource(e: impl std::fmt::Display) -> FetchError {
        FetchError::Resource(e.to_string())
    }

    impl Launch for ChromeLauncher {
        type Session = ChromeSession;

        #[instrument(level = "info", skip_all)]
        async fn launch(&self) -> Result<ChromeSession, FetchError> {
            if !self.enabled {
                return Err(FetchError::Resource("headless browser disabled".to_string()));
            }
            let user_agent = self.user_agent.clone();
            let t0 = Instant::now();

            let session = spawn_blocking(move || -> Result<ChromeSession, FetchError> {
                let options = LaunchOptions::default_builder()
                    .headless(true)
                    .idle_browser_timeout(Duration::from_secs(120))
                    .build()
                    .map_err(resource)?;
                let browser = Browser::new(options).map_err(resource)?;
                let tab = browser.new_tab().map_err(resource)?;
                tab.set_user_agent(&user_agent, None, None).map_err(resource)?;
                Ok(ChromeSession {
                    tab,
                    guard: TabGuard::default(),
                    _browser: browser,
                })
            })
            .await
            .map_err(resource)??;

            info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Headless browser started");
            Ok(session)
        }
    }

    impl Render for ChromeSession {
        #[instrument(level = "debug", skip_all, fields(%url))]
        async fn render(&self, url: &str, opts: RenderOptions) -> Result<String, FetchError> {
            self.guard.check()?;

            let tab = Arc::clone(&self.tab);
            let target = url.to_string();
            let navigate = spawn_blocking(move || -> Result<(), FetchError> {
                tab.set_default_timeout(opts.timeout);
                tab.navigate_to(&target).map_err(resource)?;
                tab.wait_until_navigated().map_err(resource)?;
                Ok(())
            });

            // the blocking call has its own timeout; this one bounds the thread hand-off too
            let limit = opts.timeout + Duration::from_secs(5);
            self.guard
                .bounded(url, limit, async move { navigate.await.map_err(resource)? })
                .await?;

            if !opts.settle.is_zero() {
                sleep(opts.settle).await;
            }

            let tab = Arc::clone(&self.tab);
            spawn_blocking(move || tab.get_content().map_err(resource))
                .await
                .map_err(resource)?
        }
    }
}

#[cfg(not(feature = "chrome"))]
impl Launch for ChromeLauncher {
    type Session = Unavailable;

    async fn launch(&self) -> Result<Unavailable, FetchError> {
        Err(FetchError::Resource(
            "built without the `chrome` feature".to_string(),
        ))
    }
}

/// Placeholder session type when no browser backend is compiled in.
#[cfg(not(feature = "chrome"))]
#[derive(Debug)]
pub enum Unavailable {}

#[cfg(not(feature = "chrome"))]
impl Render for Unavailable {
    async fn render(&self, _url: &str, _opts: RenderOptions) -> Result<String, FetchError> {
        match *self {}
    }
}
