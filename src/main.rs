use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use trawl::backfill::Progress;
use trawl::config::Config;
use trawl::fetch_worker::FetchWorker;
use trawl::manifest::{RunManifest, SelectionMode};
use trawl::merger::merge;
use trawl::partial_store::PartialStore;
use trawl::partitioner::partition;
use trawl::rate_limiter::RateLimiter;
use trawl::register::HttpRegisterClient;
use trawl::store::{CanonicalStore, UnresolvedIndex, UnresolvedKind};
use trawl::work_item::load_candidates;
use trawl::TrawlError;

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "Sharded register ingestion pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline in-process: partition, fetch every shard on its
    /// own thread, then merge
    Run {
        /// Candidate id list (JSON array)
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value = "all")]
        mode: SelectionMode,
        #[arg(long, default_value_t = 1)]
        shards: usize,
        #[arg(long, default_value_t = 10)]
        threads: usize,
        /// Truncate the candidate set, for smoke tests
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Print the shard plan for a manifest without fetching anything
    Plan {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value = "all")]
        mode: SelectionMode,
        #[arg(long, default_value_t = 1)]
        shards: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show store sizes and backfill progress
    Status,
    /// Drop unresolved entries first seen more than the give-up window ago
    Prune {
        #[arg(long, default_value_t = 30)]
        give_up_days: u64,
    },
}

fn main() -> Result<(), TrawlError> {
    dotenv().ok();
    trawl::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Run { input, mode, shards, threads, limit, dry_run, run_id } => {
            let run_id = run_id.unwrap_or_else(default_run_id);
            let manifest = RunManifest::new(&run_id, mode, shards, threads)
                .with_limit(limit)
                .with_dry_run(dry_run);
            run_pipeline(&config, &input, &manifest)
        }
        Commands::Plan { input, mode, shards, limit } => {
            let manifest =
                RunManifest::new(&default_run_id(), mode, shards, 1).with_limit(limit);
            print_plan(&config, &input, &manifest)
        }
        Commands::Status => print_status(&config),
        Commands::Prune { give_up_days } => prune_unresolved(&config, give_up_days),
    }
}

fn default_run_id() -> String {
    chrono::Utc::now().format("run-%Y%m%d-%H%M%S").to_string()
}

fn run_pipeline(config: &Config, input: &PathBuf, manifest: &RunManifest) -> Result<(), TrawlError> {
    let candidates = load_candidates(input)?;
    let mut canonical = CanonicalStore::load(&config.canonical_path());
    let mut unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let shards = partition(&candidates, manifest, &canonical, &unresolved);
    if shards.is_empty() {
        println!("[trawl] nothing to do: candidate set is empty after filtering");
        return Ok(());
    }

    let run_dir = config.run_dir(&manifest.run_id);
    manifest.save(&run_dir.join("manifest.json"))?;

    // All shards share one process here, so the full budget applies without
    // division; the ledger still persists across restarts.
    let limiter = Arc::new(
        RateLimiter::new(config.max_calls, config.window_seconds, &config.ledger_path(None))?
            .with_call_buffer(config.call_buffer),
    );
    let client = Arc::new(HttpRegisterClient::new(config)?);
    let worker = FetchWorker::new(client, limiter).with_retry(
        config.retry_attempts,
        Duration::from_millis(config.retry_base_delay_ms),
    );

    let worker = &worker;
    let mut results: Vec<Result<PartialStore, TrawlError>> = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = shards
            .iter()
            .map(|shard| scope.spawn(move || worker.run(shard, manifest)))
            .collect();
        for handle in handles {
            results.push(handle.join().expect("shard thread panicked"));
        }
    });

    let mut partials = Vec::with_capacity(results.len());
    for result in results {
        let partial = result?;
        partial.save(&run_dir)?;
        partials.push(partial);
    }

    if manifest.dry_run {
        let planned: usize = partials.iter().map(|p| p.len()).sum();
        println!("[trawl] dry run: {} items across {} shard(s), nothing merged", planned, partials.len());
        return Ok(());
    }

    let report = merge(&partials, &mut canonical, &mut unresolved)?;
    canonical.save()?;
    unresolved.save()?;

    println!(
        "[trawl] run {} merged: {} success, {} empty, {} error; canonical={}, unresolved={}",
        manifest.run_id,
        report.successes,
        report.empties,
        report.errors,
        canonical.len(),
        unresolved.len()
    );
    Ok(())
}

fn print_plan(config: &Config, input: &PathBuf, manifest: &RunManifest) -> Result<(), TrawlError> {
    let candidates = load_candidates(input)?;
    let canonical = CanonicalStore::load(&config.canonical_path());
    let unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let shards = partition(&candidates, manifest, &canonical, &unresolved);
    let selected: usize = shards.iter().map(|s| s.len()).sum();

    println!("[trawl] plan: {} candidate(s), {} selected, {} shard(s)", candidates.len(), selected, shards.len());
    for shard in &shards {
        println!(
            "[trawl]   shard {}/{}: {} item(s), first {}",
            shard.index,
            shard.total,
            shard.len(),
            shard.items[0].id
        );
    }
    Ok(())
}

fn print_status(config: &Config) -> Result<(), TrawlError> {
    let canonical = CanonicalStore::load(&config.canonical_path());
    let unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let empties = unresolved
        .ids()
        .filter(|id| unresolved.get(id).is_some_and(|e| e.kind == UnresolvedKind::Empty))
        .count();

    println!("[trawl] canonical entries: {}", canonical.len());
    println!(
        "[trawl] unresolved entries: {} ({} empty, {} error)",
        unresolved.len(),
        empties,
        unresolved.len() - empties
    );
    match Progress::load(&config.progress_path())? {
        Some(progress) => println!(
            "[trawl] backfill progress: {}/{}{}",
            progress.processed_count,
            progress.total_count,
            if progress.is_complete() { " (complete)" } else { "" }
        ),
        None => println!("[trawl] backfill progress: none recorded"),
    }
    Ok(())
}

fn prune_unresolved(config: &Config, give_up_days: u64) -> Result<(), TrawlError> {
    let mut unresolved = UnresolvedIndex::load(&config.unresolved_path());
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let cutoff = now.saturating_sub(give_up_days * 86_400);

    let removed = unresolved.prune_first_seen_before(cutoff);
    unresolved.save()?;

    println!("[trawl] pruned {} entr(ies) older than {} day(s)", removed.len(), give_up_days);
    for id in removed {
        println!("[trawl]   gave up on {}", id);
    }
    Ok(())
}
