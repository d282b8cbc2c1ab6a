use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trawl::manifest::{RunManifest, SelectionMode};
use trawl::partitioner::partition;
use trawl::store::{CanonicalStore, UnresolvedIndex};
use trawl::work_item::WorkItem;

fn bench_partition(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().unwrap();
    let canonical = CanonicalStore::load(&temp_dir.path().join("canonical.json"));
    let unresolved = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

    let candidates: Vec<WorkItem> = (0..100_000)
        .map(|i| WorkItem::new(&format!("{:08}", i)))
        .collect();

    let mut group = c.benchmark_group("partition");
    for shard_count in [1usize, 4, 16] {
        group.bench_function(format!("100k_ids_{}_shards", shard_count), |b| {
            let manifest = RunManifest::new("bench", SelectionMode::Fresh, shard_count, 1);
            b.iter(|| {
                let shards = partition(
                    black_box(&candidates),
                    &manifest,
                    &canonical,
                    &unresolved,
                );
                black_box(shards.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_partition);
criterion_main!(benches);
