//! On-disk output layout.
//!
//! # Output Structure
//!
//! ```text
//! data_dir/
//! ├── seen_urls.txt              # dedup store (one canonical URL per line)
//! ├── raw/
//! │   ├── latest.json            # copy of the newest snapshot
//! │   └── 06-05-2025/
//! │       └── articles_09h30min05s.json  # one per run that found something new
//! ├── processed/
//! │   └── 06-05-2025/
//! │       └── articles.json      # every article of the day, runs merged
//! └── treated/
//!     └── 06-05-2025/
//!         ├── summaries.json
//!         └── errors.json        # failures of the latest summary run, if any
//! ```

pub mod json;

use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};

/// Directory name format of a dated batch (`DD-MM-YYYY`).
pub const DATE_DIR_FORMAT: &str = "%d-%m-%Y";

/// File name suffix of a raw snapshot (`HHhMMminSSs`).
pub const SNAPSHOT_TIME_FORMAT: &str = "%Hh%Mmin%Ss";

pub const RAW_DIR: &str = "raw";
pub const PROCESSED_DIR: &str = "processed";
pub const TREATED_DIR: &str = "treated";

/// `<data_dir>/<stage>/<DD-MM-YYYY>`
pub fn dated_dir(data_dir: &Path, stage: &str, date: NaiveDate) -> PathBuf {
    data_dir
        .join(stage)
        .join(date.format(DATE_DIR_FORMAT).to_string())
}

/// `<data_dir>/raw/<DD-MM-YYYY>/articles_<HHhMMminSSs>.json`
pub fn snapshot_path(data_dir: &Path, at: NaiveDateTime) -> PathBuf {
    dated_dir(data_dir, RAW_DIR, at.date())
        .join(format!("articles_{}.json", at.format(SNAPSHOT_TIME_FORMAT)))
}

/// Parse a dated directory name back into a date.
pub fn parse_date_dir(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, DATE_DIR_FORMAT).ok()
}
