//! Persistent set of canonical keys already turned into articles.
//!
//! The store is a plain text file, one canonical URL per line. It is read
//! once when the run starts and appended to once when the run ends; it is
//! never rewritten.
//!
//! # Single writer
//!
//! Nothing locks the file. Running two pipelines against the same store at
//! the same time is unsupported and may interleave or duplicate lines.

use crate::canonical::canonicalize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    seen: HashSet<String>,
    /// The file exists and its last byte is not a newline.
    needs_newline: bool,
}

impl DedupStore {
    /// Load every key from `path`. A missing file is an empty store.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = match fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No dedup store yet; starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(e),
        };

        // keys are re-canonicalized so hand-edited lines still match
        let seen: HashSet<String> = text
            .lines()
            .map(canonicalize)
            .filter(|k| !k.is_empty())
            .collect();
        let needs_newline = !text.is_empty() && !text.ends_with('\n');

        info!(count = seen.len(), "Loaded dedup store");
        Ok(Self {
            path,
            seen,
            needs_newline,
        })
    }

    /// A store with no keys that will be created at `path` on first commit.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: HashSet::new(),
            needs_newline: false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `keys` to the file in arrival order.
    ///
    /// Keys already in the store, empty keys, and repeats within `keys` are
    /// skipped, so each key is written at most once. Returns the number of
    /// lines appended.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn commit<S: AsRef<str>>(&mut self, keys: &[S]) -> std::io::Result<usize> {
        let mut fresh = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if key.is_empty() || self.seen.contains(key) {
                continue;
            }
            self.seen.insert(key.to_string());
            fresh.push(key.to_string());
        }

        if fresh.is_empty() {
            debug!("Nothing new to commit");
            return Ok(0);
        }

        let mut buf = String::new();
        if self.needs_newline {
            buf.push('\n');
        }
        for key in &fresh {
            buf.push_str(key);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        self.needs_newline = false;

        info!(count = fresh.len(), total = self.seen.len(), "Committed keys");
        Ok(fresh.len())
    }
}
