use crate::TrawlError;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Rolling-window call budget for one worker process.
///
/// Every acquisition is appended to an on-disk ledger so a restarted process
/// inherits the budget it already spent instead of starting from a full
/// window. The ledger is pruned of entries older than the window on every
/// access.
///
/// When a run spans several shard processes there is no cross-process
/// coordination: each process gets `per_shard(global, shards)` calls. Shards
/// started at different times can drift relative to each other, so the
/// aggregate is a best-effort bound, not a guarantee.
pub struct RateLimiter {
    max_calls: usize,
    call_buffer: usize,
    window_seconds: u64,
    ledger_path: PathBuf,
    ledger: Mutex<VecDeque<f64>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window_seconds: u64, ledger_path: &Path) -> Result<Self, TrawlError> {
        let ledger = load_ledger(ledger_path);
        Ok(RateLimiter {
            max_calls,
            call_buffer: 0,
            window_seconds,
            ledger_path: ledger_path.to_path_buf(),
            ledger: Mutex::new(ledger),
        })
    }

    /// Reserve headroom below the provider's hard limit so bursts near the
    /// window boundary cannot breach it.
    pub fn with_call_buffer(mut self, call_buffer: usize) -> Self {
        self.call_buffer = call_buffer;
        self
    }

    /// Static budget division across `shards` concurrently running processes.
    pub fn per_shard(global_max: usize, shards: usize) -> usize {
        (global_max / shards.max(1)).max(1)
    }

    fn effective_max(&self) -> usize {
        self.max_calls.saturating_sub(self.call_buffer).max(1)
    }

    /// Block until a call may legally be made within the window, then record
    /// it and persist the ledger.
    pub fn acquire(&self) -> Result<(), TrawlError> {
        loop {
            let wait = {
                let mut ledger = self.ledger.lock().unwrap();
                let now = epoch_seconds();
                prune(&mut ledger, now, self.window_seconds);

                if ledger.len() < self.effective_max() {
                    ledger.push_back(now);
                    self.persist(&ledger)?;
                    return Ok(());
                }

                let oldest = *ledger.front().unwrap();
                let until_free = self.window_seconds as f64 - (now - oldest);
                Duration::from_secs_f64(until_free.max(0.01))
            };
            std::thread::sleep(wait);
        }
    }

    /// Record a call without any blocking. Used to count retried HTTP
    /// interactions that already waited elsewhere.
    pub fn record(&self) -> Result<(), TrawlError> {
        let mut ledger = self.ledger.lock().unwrap();
        let now = epoch_seconds();
        prune(&mut ledger, now, self.window_seconds);
        ledger.push_back(now);
        self.persist(&ledger)
    }

    /// How many more calls are free right now, after the buffer.
    pub fn remaining(&self) -> usize {
        let mut ledger = self.ledger.lock().unwrap();
        prune(&mut ledger, epoch_seconds(), self.window_seconds);
        self.effective_max().saturating_sub(ledger.len())
    }

    fn persist(&self, ledger: &VecDeque<f64>) -> Result<(), TrawlError> {
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let timestamps: Vec<f64> = ledger.iter().copied().collect();
        fs::write(&self.ledger_path, serde_json::to_string(&timestamps)?)?;
        Ok(())
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn prune(ledger: &mut VecDeque<f64>, now: f64, window_seconds: u64) {
    let cutoff = now - window_seconds as f64;
    while ledger.front().is_some_and(|&t| t < cutoff) {
        ledger.pop_front();
    }
}

fn load_ledger(path: &Path) -> VecDeque<f64> {
    if !path.exists() {
        return VecDeque::new();
    }
    match fs::read_to_string(path).map_err(TrawlError::Io).and_then(|raw| {
        serde_json::from_str::<Vec<f64>>(&raw).map_err(TrawlError::Json)
    }) {
        Ok(timestamps) => timestamps.into(),
        Err(e) => {
            warn!("could not read rate ledger {}: {}; starting empty", path.display(), e);
            VecDeque::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_acquire_under_budget_does_not_block() {
        let temp_dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(10, 60, &temp_dir.path().join("ledger.json")).unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(limiter.remaining(), 5);
    }

    #[test]
    fn test_acquire_blocks_until_window_frees() {
        let temp_dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(2, 1, &temp_dir.path().join("ledger.json")).unwrap();

        let start = Instant::now();
        limiter.acquire().unwrap();
        limiter.acquire().unwrap();
        // Third call must wait for the first timestamp to leave the 1s window.
        limiter.acquire().unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(900),
            "third acquire should have slept, elapsed {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn test_restart_inherits_spent_budget() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("ledger.json");

        {
            let limiter = RateLimiter::new(10, 60, &ledger_path).unwrap();
            limiter.acquire().unwrap();
            limiter.acquire().unwrap();
            limiter.acquire().unwrap();
        }

        // A fresh process sees the three calls already made.
        let limiter = RateLimiter::new(10, 60, &ledger_path).unwrap();
        assert_eq!(limiter.remaining(), 7);
    }

    #[test]
    fn test_corrupt_ledger_starts_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ledger_path = temp_dir.path().join("ledger.json");
        fs::write(&ledger_path, "not json").unwrap();

        let limiter = RateLimiter::new(10, 60, &ledger_path).unwrap();
        assert_eq!(limiter.remaining(), 10);
    }

    #[test]
    fn test_call_buffer_reserves_headroom() {
        let temp_dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(100, 60, &temp_dir.path().join("ledger.json"))
            .unwrap()
            .with_call_buffer(40);
        assert_eq!(limiter.remaining(), 60);
    }

    #[test]
    fn test_record_counts_without_blocking() {
        let temp_dir = tempfile::tempdir().unwrap();
        let limiter = RateLimiter::new(10, 60, &temp_dir.path().join("ledger.json")).unwrap();

        limiter.record().unwrap();
        limiter.record().unwrap();
        assert_eq!(limiter.remaining(), 8);
    }

    #[test]
    fn test_per_shard_division() {
        assert_eq!(RateLimiter::per_shard(600, 4), 150);
        assert_eq!(RateLimiter::per_shard(600, 7), 85);
        assert_eq!(RateLimiter::per_shard(3, 10), 1);
        assert_eq!(RateLimiter::per_shard(600, 0), 600);
    }
}
