use crate::partial_store::PartialStore;
use crate::store::{CanonicalStore, UnresolvedIndex, UnresolvedKind};
use crate::work_item::FetchOutcome;
use crate::TrawlError;
use itertools::Itertools;
use tracing::info;

#[derive(PartialEq, Eq, Debug, Default, Clone)]
pub struct MergeReport {
    pub successes: usize,
    pub empties: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Fold a run's PartialStores into the canonical store and unresolved index.
///
/// The per-id operation is a pure upsert, so merging is idempotent and
/// order-independent: the same artifacts can arrive more than once (a
/// partially copied run directory, a re-run merge) without changing the
/// result. A duplicate shard artifact is dropped; a duplicate id across two
/// different shards is a partitioning bug and aborts the merge before any
/// mutation, so the stores are never left partially merged.
pub fn merge(
    partials: &[PartialStore],
    canonical: &mut CanonicalStore,
    unresolved: &mut UnresolvedIndex,
) -> Result<MergeReport, TrawlError> {
    if partials.is_empty() {
        return Ok(MergeReport::default());
    }

    let run_id = &partials[0].run_id;
    if let Some(stray) = partials.iter().find(|p| &p.run_id != run_id) {
        return Err(TrawlError::Store(format!(
            "cannot merge across runs: found artifacts for both {} and {}",
            run_id, stray.run_id
        )));
    }

    // At-least-once artifact delivery: the same shard artifact may appear
    // twice. Keep the first copy of each shard index.
    let unique: Vec<&PartialStore> = partials
        .iter()
        .unique_by(|p| p.shard_index)
        .collect();

    if let Some(id) = unique
        .iter()
        .flat_map(|p| p.iter().map(|(id, _)| id))
        .duplicates()
        .next()
    {
        return Err(TrawlError::MergeConflict { id: id.clone() });
    }

    let mut report = MergeReport::default();
    for partial in unique {
        for (id, outcome) in partial.iter() {
            match outcome {
                FetchOutcome::Success { payload } => {
                    let value = serde_json::from_str(payload)
                        .unwrap_or_else(|_| serde_json::Value::String(payload.clone()));
                    canonical.upsert(id, value);
                    unresolved.resolve(id);
                    report.successes += 1;
                }
                FetchOutcome::Empty => {
                    unresolved.record_failure(id, UnresolvedKind::Empty, None, run_id);
                    report.empties += 1;
                }
                FetchOutcome::Error { message, .. } => {
                    unresolved.record_failure(id, UnresolvedKind::Error, Some(message), run_id);
                    report.errors += 1;
                }
                FetchOutcome::WouldFetch => {
                    report.skipped += 1;
                }
            }
        }
    }

    info!(
        run_id = %run_id,
        successes = report.successes,
        empties = report.empties,
        errors = report.errors,
        skipped = report.skipped,
        canonical = canonical.len(),
        unresolved = unresolved.len(),
        "merge complete"
    );
    Ok(report)
}
