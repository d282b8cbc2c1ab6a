// Integration test for the full partition -> fetch -> merge flow, using the
// documented five-candidate example: two shards, a mix of outcomes, then a
// retry run scoped to exactly the unresolved ids.
use std::sync::Arc;
use std::time::Duration;
use trawl::fetch_worker::FetchWorker;
use trawl::manifest::{RunManifest, SelectionMode};
use trawl::merger::merge;
use trawl::partitioner::{partition, select_candidates};
use trawl::rate_limiter::RateLimiter;
use trawl::register::{FetchFailure, MockRegisterClient};
use trawl::store::{CanonicalStore, UnresolvedIndex, UnresolvedKind};
use trawl::work_item::WorkItem;

fn candidates() -> Vec<WorkItem> {
    ["A", "B", "C", "D", "E"].iter().map(|id| WorkItem::new(id)).collect()
}

#[test]
fn test_five_candidates_across_two_shards() {
    let temp_dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockRegisterClient::new());
    client.succeed("A", r#"{"payload": "a"}"#);
    client.succeed("B", r#"{"payload": "b"}"#);
    client.script("C", vec![Err(FetchFailure::Transient("503".to_string()))]);
    client.not_found("D");
    client.succeed("E", r#"{"payload": "e"}"#);

    let mut canonical = CanonicalStore::load(&temp_dir.path().join("canonical.json"));
    let mut unresolved = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

    let manifest = RunManifest::new("run-1", SelectionMode::All, 2, 2);
    let shards = partition(&candidates(), &manifest, &canonical, &unresolved);
    assert_eq!(shards.len(), 2);
    let ids = |index: usize| -> Vec<&str> {
        shards[index].items.iter().map(|i| i.id.as_str()).collect()
    };
    assert_eq!(ids(0), vec!["A", "C", "E"]);
    assert_eq!(ids(1), vec!["B", "D"]);

    let limiter =
        Arc::new(RateLimiter::new(10_000, 60, &temp_dir.path().join("ledger.json")).unwrap());
    let worker =
        FetchWorker::new(client.clone(), limiter).with_retry(2, Duration::from_millis(1));

    let partials: Vec<_> = shards
        .iter()
        .map(|shard| worker.run(shard, &manifest).unwrap())
        .collect();

    merge(&partials, &mut canonical, &mut unresolved).unwrap();

    assert_eq!(canonical.len(), 3);
    assert!(canonical.contains("A"));
    assert!(canonical.contains("B"));
    assert!(canonical.contains("E"));

    assert_eq!(unresolved.len(), 2);
    let c = unresolved.get("C").unwrap();
    assert_eq!(c.kind, UnresolvedKind::Error);
    assert_eq!(c.attempts, 1);
    let d = unresolved.get("D").unwrap();
    assert_eq!(d.kind, UnresolvedKind::Empty);
    assert_eq!(d.attempts, 1);

    // A subsequent retry run shards exactly {C, D}.
    let retry = select_candidates(&candidates(), SelectionMode::RetryFailed, &canonical, &unresolved);
    let retry_ids: Vec<&str> = retry.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(retry_ids, vec!["C", "D"]);
}

#[test]
fn test_retry_run_clears_unresolved_on_success() {
    let temp_dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockRegisterClient::new());
    client.succeed("A", "{}");
    client.script("C", vec![Err(FetchFailure::Transient("reset".to_string()))]);

    let mut canonical = CanonicalStore::load(&temp_dir.path().join("canonical.json"));
    let mut unresolved = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

    let limiter =
        Arc::new(RateLimiter::new(10_000, 60, &temp_dir.path().join("ledger.json")).unwrap());
    let worker =
        FetchWorker::new(client.clone(), limiter).with_retry(2, Duration::from_millis(1));

    let input: Vec<WorkItem> = [WorkItem::new("A"), WorkItem::new("C")].to_vec();
    let manifest = RunManifest::new("run-1", SelectionMode::All, 1, 1);
    for shard in partition(&input, &manifest, &canonical, &unresolved) {
        let partial = worker.run(&shard, &manifest).unwrap();
        merge(&[partial], &mut canonical, &mut unresolved).unwrap();
    }
    assert!(unresolved.contains("C"));

    // The endpoint recovers; a retry_failed run touches only C.
    client.succeed("C", "{}");
    let retry_manifest = RunManifest::new("run-2", SelectionMode::RetryFailed, 1, 1);
    let shards = partition(&input, &retry_manifest, &canonical, &unresolved);
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].items, vec![WorkItem::new("C")]);

    for shard in shards {
        let partial = worker.run(&shard, &retry_manifest).unwrap();
        merge(&[partial], &mut canonical, &mut unresolved).unwrap();
    }

    assert!(unresolved.is_empty());
    assert_eq!(canonical.len(), 2);
    // A succeeded in run one and was never fetched again.
    assert_eq!(client.fetch_count("A"), 1);
}
