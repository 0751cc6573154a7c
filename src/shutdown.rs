//! Run-level cancellation: Ctrl-C, or a deadline on the acquisition step.
//!
//! One handle from [`Shutdown::install`] covers the whole process. The
//! acquisition step gets a child from [`Shutdown::with_timeout`], so its
//! deadline stops scraping without cutting the summaries short, while Ctrl-C
//! stops both.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, warn};

/// Cloneable handle that resolves once the run should stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Fire on the first Ctrl-C. A second Ctrl-C exits the process at once.
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted; stopping after the current step (Ctrl-C again to quit now)");
            let _ = tx.send(true);

            if tokio::signal::ctrl_c().await.is_ok() {
                error!("Interrupted twice; exiting");
                std::process::exit(130);
            }
        });
        Self { rx }
    }

    /// A handle that fires with this one, or after `timeout` if one is given.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Deadline counted from now; `None` just clones the handle
    ///
    /// # Returns
    ///
    /// The child handle. Firing it never fires the parent.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        let Some(timeout) = timeout else {
            return self.clone();
        };
        let (tx, rx) = watch::channel(self.is_triggered());
        let parent = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.triggered() => {}
                _ = tokio::time::sleep(timeout) => warn!(?timeout, "Run timeout reached; stopping"),
            }
            let _ = tx.send(true);
        });
        Self { rx }
    }

    /// A handle fired only through the returned sender.
    #[cfg(test)]
    pub fn manual() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once triggered. Never resolves if the trigger side is gone.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
