use clap::Parser;
use dotenv::dotenv;
use trawl::config::Config;
use trawl::merger::merge;
use trawl::partial_store::PartialStore;
use trawl::store::{CanonicalStore, UnresolvedIndex};
use trawl::TrawlError;

/// Fold every partial store of a run into the canonical store and the
/// unresolved index. The merge is the run's single serialization point: it
/// expects all shards to have written their artifacts first.
#[derive(Parser)]
#[command(name = "trawl_merge")]
struct Cli {
    #[arg(long)]
    run_id: String,
    /// Merge even if some shard artifacts are missing
    #[arg(long)]
    force: bool,
}

fn main() -> Result<(), TrawlError> {
    dotenv().ok();
    trawl::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    let run_dir = config.run_dir(&cli.run_id);
    let partials = PartialStore::load_run_dir(&run_dir)?;
    if partials.is_empty() {
        return Err(TrawlError::Store(format!(
            "no partial stores found in {}",
            run_dir.display()
        )));
    }

    let expected = partials[0].shard_count;
    if partials.len() < expected && !cli.force {
        return Err(TrawlError::Store(format!(
            "run {} has {} of {} shard artifact(s); wait for the remaining workers or pass --force",
            cli.run_id,
            partials.len(),
            expected
        )));
    }

    let mut canonical = CanonicalStore::load(&config.canonical_path());
    let mut unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let report = merge(&partials, &mut canonical, &mut unresolved)?;
    canonical.save()?;
    unresolved.save()?;

    println!(
        "[trawl_merge] run {} merged: {} success, {} empty, {} error; canonical={}, unresolved={}",
        cli.run_id,
        report.successes,
        report.empties,
        report.errors,
        canonical.len(),
        unresolved.len()
    );
    Ok(())
}
