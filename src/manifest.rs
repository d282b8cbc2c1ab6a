use crate::TrawlError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which slice of the candidate set a run operates on. A single tagged value
/// rather than independent flags, so combinations like fresh + retry_failed
/// cannot be expressed.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Everything not yet resolved: ids missing from the canonical store plus
    /// ids still carried in the unresolved index.
    All,
    /// Strictly the ids with no successful payload in the canonical store.
    OnlyMissing,
    /// Exactly the unresolved index as of run start.
    RetryFailed,
    /// The full input list, ignoring both stores.
    Fresh,
}

/// Run-scoped configuration. Saved next to the run's partial stores so a
/// finished run can be inspected and reproduced.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub mode: SelectionMode,
    pub shard_count: usize,
    pub thread_count: usize,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

impl RunManifest {
    pub fn new(run_id: &str, mode: SelectionMode, shard_count: usize, thread_count: usize) -> Self {
        RunManifest {
            run_id: run_id.to_string(),
            mode,
            shard_count: shard_count.max(1),
            thread_count: thread_count.max(1),
            limit: None,
            dry_run: false,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), TrawlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrawlError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
