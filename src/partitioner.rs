use crate::manifest::{RunManifest, SelectionMode};
use crate::store::{CanonicalStore, UnresolvedIndex};
use crate::work_item::{Shard, WorkItem};
use rustc_hash::FxHashSet;
use tracing::info;

/// Filter the candidate list down to the set the manifest's selection mode
/// asks for, preserving input order and dropping duplicate ids.
pub fn select_candidates(
    candidates: &[WorkItem],
    mode: SelectionMode,
    canonical: &CanonicalStore,
    unresolved: &UnresolvedIndex,
) -> Vec<WorkItem> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    candidates
        .iter()
        .filter(|item| seen.insert(item.id.as_str()))
        .filter(|item| match mode {
            SelectionMode::Fresh => true,
            SelectionMode::All => !canonical.contains(&item.id) || unresolved.contains(&item.id),
            SelectionMode::OnlyMissing => !canonical.contains(&item.id),
            SelectionMode::RetryFailed => unresolved.contains(&item.id),
        })
        .cloned()
        .collect()
}

/// Split the filtered candidate set into disjoint shards by stable
/// round-robin: candidate i goes to shard i mod shard_count. Re-running the
/// same manifest against an unchanged candidate set reproduces the same
/// assignment. Shards that would be empty are dropped; zero shards is a
/// valid, complete run.
pub fn partition(
    candidates: &[WorkItem],
    manifest: &RunManifest,
    canonical: &CanonicalStore,
    unresolved: &UnresolvedIndex,
) -> Vec<Shard> {
    let mut selected = select_candidates(candidates, manifest.mode, canonical, unresolved);

    if let Some(limit) = manifest.limit {
        selected.truncate(limit);
    }

    info!(
        run_id = %manifest.run_id,
        mode = ?manifest.mode,
        candidates = candidates.len(),
        selected = selected.len(),
        shards = manifest.shard_count,
        "partitioned candidate set"
    );

    if selected.is_empty() {
        return Vec::new();
    }

    let shard_count = manifest.shard_count;
    let mut buckets: Vec<Vec<WorkItem>> = (0..shard_count).map(|_| Vec::new()).collect();
    for (i, item) in selected.into_iter().enumerate() {
        buckets[i % shard_count].push(item);
    }

    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, items)| !items.is_empty())
        .map(|(index, items)| Shard {
            run_id: manifest.run_id.clone(),
            index,
            total: shard_count,
            items,
        })
        .collect()
}
