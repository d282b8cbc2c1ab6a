use crate::fetch_worker::FetchWorker;
use crate::manifest::{RunManifest, SelectionMode};
use crate::merger::merge;
use crate::partitioner::partition;
use crate::rate_limiter::RateLimiter;
use crate::register::{DateRange, FetchFailure, ListingPage, RegisterClientLike};
use crate::store::{CanonicalStore, UnresolvedIndex};
use crate::TrawlError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Progress of a backfill run, rewritten after every batch and polled by
/// external observers. Completion is `processed_count == total_count`.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Progress {
    pub processed_count: usize,
    pub total_count: usize,
}

impl Progress {
    pub fn save(&self, path: &Path) -> Result<(), TrawlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Option<Self>, TrawlError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn is_complete(&self) -> bool {
        self.total_count > 0 && self.processed_count >= self.total_count
    }
}

/// Resumable, date-ranged re-walk of the register's listing endpoint. Pages
/// through `[start, end]`, feeding each page as a batch through the
/// partitioner, the fetch worker, and the merger. Interrupting and
/// re-invoking with the same range is safe: merged ids upsert again (or are
/// skipped by the selection mode) and the canonical store converges on the
/// same content, even though the progress counter restarts.
pub struct BackfillController {
    client: Arc<dyn RegisterClientLike>,
    limiter: Arc<RateLimiter>,
    worker: FetchWorker,
    progress_path: PathBuf,
    mode: SelectionMode,
    thread_count: usize,
    retry_attempts: usize,
    retry_base_delay: Duration,
}

impl BackfillController {
    pub fn new(
        client: Arc<dyn RegisterClientLike>,
        limiter: Arc<RateLimiter>,
        progress_path: &Path,
    ) -> Self {
        let worker = FetchWorker::new(client.clone(), limiter.clone());
        BackfillController {
            client,
            limiter,
            worker,
            progress_path: progress_path.to_path_buf(),
            mode: SelectionMode::All,
            thread_count: 10,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count.max(1);
        self
    }

    pub fn with_retry(mut self, attempts: usize, base_delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_base_delay = base_delay;
        self.worker = FetchWorker::new(self.client.clone(), self.limiter.clone())
            .with_retry(attempts, base_delay);
        self
    }

    pub fn backfill(
        &self,
        range: &DateRange,
        canonical: &mut CanonicalStore,
        unresolved: &mut UnresolvedIndex,
    ) -> Result<Progress, TrawlError> {
        let base_run_id = format!(
            "backfill-{}-{}",
            range.start.format("%Y%m%d"),
            range.end.format("%Y%m%d")
        );
        info!(run_id = %base_run_id, "starting backfill");

        let mut progress = Progress { processed_count: 0, total_count: 0 };
        let mut page_token: Option<String> = None;
        let mut batch_index = 0usize;

        loop {
            let page = self.list_page(range, page_token.as_deref())?;

            if batch_index == 0 {
                progress.total_count = page.total_count;
                progress.save(&self.progress_path)?;
            }

            // One batch == one page; each batch gets its own deterministic
            // run id so a re-walk reuses the same ids and attempt counters
            // do not double-count.
            let manifest = RunManifest::new(
                &format!("{}-batch-{:04}", base_run_id, batch_index),
                self.mode,
                1,
                self.thread_count,
            );
            let shards = partition(&page.items, &manifest, canonical, unresolved);
            for shard in &shards {
                let partial = self.worker.run(shard, &manifest)?;
                merge(&[partial], canonical, unresolved)?;
            }
            canonical.save()?;
            unresolved.save()?;

            progress.processed_count += page.items.len();
            progress.save(&self.progress_path)?;
            info!(
                batch = batch_index,
                processed = progress.processed_count,
                total = progress.total_count,
                "backfill batch merged"
            );

            batch_index += 1;
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(progress)
    }

    /// Listing calls draw from the same budget as entity fetches and retry
    /// transient failures the same way.
    fn list_page(
        &self,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<ListingPage, TrawlError> {
        let mut attempt = 1;
        loop {
            self.limiter.acquire()?;
            match self.client.list(range, page_token) {
                Ok(page) => return Ok(page),
                Err(FetchFailure::Auth(m)) => return Err(TrawlError::Auth(m)),
                Err(FetchFailure::BadRequest(m)) => return Err(TrawlError::Http(m)),
                Err(failure) => {
                    if attempt < self.retry_attempts {
                        warn!(attempt, "listing call failed: {}; backing off", failure);
                        std::thread::sleep(self.retry_base_delay * 2u32.saturating_pow(attempt as u32 - 1));
                        attempt += 1;
                    } else {
                        return Err(TrawlError::Http(failure.to_string()));
                    }
                }
            }
        }
    }
}
