use crate::manifest::RunManifest;
use crate::partial_store::PartialStore;
use crate::rate_limiter::RateLimiter;
use crate::register::{FetchFailure, FetchReply, RegisterClientLike};
use crate::work_item::{ErrorKind, FetchOutcome, Shard};
use crate::TrawlError;
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Consumes one shard: fetches every WorkItem under the rate limiter with up
/// to `thread_count` requests in flight, classifies each outcome, and returns
/// the shard's PartialStore.
///
/// Outcomes are independent: one item failing never blocks or skips another.
/// The single exception is an authentication failure, which aborts the whole
/// shard since no further call can succeed without credentials.
pub struct FetchWorker {
    client: Arc<dyn RegisterClientLike>,
    limiter: Arc<RateLimiter>,
    retry_attempts: usize,
    retry_base_delay: Duration,
}

impl FetchWorker {
    pub fn new(client: Arc<dyn RegisterClientLike>, limiter: Arc<RateLimiter>) -> Self {
        FetchWorker {
            client,
            limiter,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, attempts: usize, base_delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    pub fn run(&self, shard: &Shard, manifest: &RunManifest) -> Result<PartialStore, TrawlError> {
        let mut partial = PartialStore::new(&shard.run_id, shard.index, shard.total);

        if manifest.dry_run {
            for item in &shard.items {
                partial.insert(&item.id, FetchOutcome::WouldFetch);
            }
            info!(
                shard = shard.index,
                items = partial.len(),
                "dry run: recorded would-fetch outcomes"
            );
            return Ok(partial);
        }

        let thread_count = manifest.thread_count.min(shard.len()).max(1);
        let (work_tx, work_rx) = unbounded::<crate::work_item::WorkItem>();
        let (result_tx, result_rx) = unbounded::<(String, FetchOutcome)>();
        let abort = AtomicBool::new(false);
        let fatal_auth: Mutex<Option<String>> = Mutex::new(None);

        for item in &shard.items {
            // Receiver outlives the senders; this cannot fail.
            work_tx.send(item.clone()).unwrap();
        }
        drop(work_tx);

        std::thread::scope(|scope| {
            for _ in 0..thread_count {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                let fatal_auth = &fatal_auth;
                scope.spawn(move || {
                    while let Ok(item) = work_rx.recv() {
                        if abort.load(Ordering::SeqCst) {
                            continue;
                        }
                        let (outcome, auth_failure) = self.fetch_with_retry(&item.id);
                        if let Some(message) = auth_failure {
                            abort.store(true, Ordering::SeqCst);
                            *fatal_auth.lock().unwrap() = Some(message);
                        }
                        let _ = result_tx.send((item.id, outcome));
                    }
                });
            }
            drop(result_tx);

            for (id, outcome) in result_rx {
                partial.insert(&id, outcome);
            }
        });

        if let Some(message) = fatal_auth.into_inner().unwrap() {
            return Err(TrawlError::Auth(message));
        }

        let successes = partial.iter().filter(|(_, o)| o.is_success()).count();
        let empties = partial
            .iter()
            .filter(|(_, o)| matches!(o, FetchOutcome::Empty))
            .count();
        info!(
            shard = shard.index,
            items = partial.len(),
            successes,
            empties,
            errors = partial.len() - successes - empties,
            "shard fetch complete"
        );

        Ok(partial)
    }

    /// One item, bounded attempts. Returns the recorded outcome plus the
    /// auth-failure message when the whole shard must stop.
    fn fetch_with_retry(&self, id: &str) -> (FetchOutcome, Option<String>) {
        let mut attempt = 1;
        loop {
            if let Err(e) = self.limiter.acquire() {
                // Ledger persistence failed; record rather than sink the shard.
                return (
                    FetchOutcome::Error {
                        kind: ErrorKind::Transient,
                        message: format!("rate ledger: {}", e),
                    },
                    None,
                );
            }

            match self.client.fetch(id) {
                Ok(FetchReply::Payload(payload)) => {
                    return (FetchOutcome::Success { payload }, None);
                }
                Ok(FetchReply::NotFound) => return (FetchOutcome::Empty, None),
                Err(FetchFailure::Transient(message)) => {
                    if attempt < self.retry_attempts {
                        warn!(id, attempt, "transient failure: {}; backing off", message);
                        std::thread::sleep(self.backoff(attempt));
                        attempt += 1;
                    } else {
                        return (
                            FetchOutcome::Error {
                                kind: ErrorKind::Transient,
                                message,
                            },
                            None,
                        );
                    }
                }
                Err(FetchFailure::RateLimited { retry_after_secs }) => {
                    // The limiter should make this unreachable; seeing it
                    // means the configured budget exceeds the provider's.
                    warn!(
                        id,
                        retry_after_secs,
                        "provider rate limit hit despite local budget; check TRAWL_RATE_LIMIT"
                    );
                    std::thread::sleep(Duration::from_secs(retry_after_secs));
                    if attempt < self.retry_attempts {
                        attempt += 1;
                    } else {
                        return (
                            FetchOutcome::Error {
                                kind: ErrorKind::Transient,
                                message: "rate limited".to_string(),
                            },
                            None,
                        );
                    }
                }
                Err(FetchFailure::Auth(message)) => {
                    return (
                        FetchOutcome::Error {
                            kind: ErrorKind::Fatal,
                            message: message.clone(),
                        },
                        Some(message),
                    );
                }
                Err(FetchFailure::BadRequest(message)) => {
                    return (
                        FetchOutcome::Error {
                            kind: ErrorKind::Fatal,
                            message,
                        },
                        None,
                    );
                }
            }
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt.saturating_sub(1) as u32)
    }
}
