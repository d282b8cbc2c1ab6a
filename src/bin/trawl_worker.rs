use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use trawl::config::Config;
use trawl::fetch_worker::FetchWorker;
use trawl::manifest::{RunManifest, SelectionMode};
use trawl::partial_store::PartialStore;
use trawl::partitioner::partition;
use trawl::rate_limiter::RateLimiter;
use trawl::register::HttpRegisterClient;
use trawl::store::{CanonicalStore, UnresolvedIndex};
use trawl::work_item::load_candidates;
use trawl::TrawlError;

/// Fetch one shard of a run as an independent process. Every worker of the
/// run must be started with the same input, mode, limit, and shard count so
/// the deterministic partition agrees across processes; each process then
/// takes only the shard matching its index and works under 1/Nth of the
/// global rate budget.
#[derive(Parser)]
#[command(name = "trawl_worker")]
struct Cli {
    /// Candidate id list (JSON array)
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    run_id: String,
    #[arg(long)]
    shard_index: usize,
    #[arg(long)]
    shard_count: usize,
    #[arg(long, value_enum, default_value = "all")]
    mode: SelectionMode,
    #[arg(long, default_value_t = 10)]
    threads: usize,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<(), TrawlError> {
    dotenv().ok();
    trawl::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    if cli.shard_index >= cli.shard_count {
        return Err(TrawlError::Config(format!(
            "shard index {} out of range for {} shards",
            cli.shard_index, cli.shard_count
        )));
    }

    let manifest = RunManifest::new(&cli.run_id, cli.mode, cli.shard_count, cli.threads)
        .with_limit(cli.limit)
        .with_dry_run(cli.dry_run);

    let candidates = load_candidates(&cli.input)?;
    let canonical = CanonicalStore::load(&config.canonical_path());
    let unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let run_dir = config.run_dir(&manifest.run_id);
    let manifest_path = run_dir.join("manifest.json");
    if !manifest_path.exists() {
        manifest.save(&manifest_path)?;
    }

    let shards = partition(&candidates, &manifest, &canonical, &unresolved);
    let shard = shards.into_iter().find(|s| s.index == cli.shard_index);

    let partial = match shard {
        None => {
            // This shard drew no candidates; record that it completed empty
            // so the merge can still see every shard of the run.
            PartialStore::new(&manifest.run_id, cli.shard_index, cli.shard_count)
        }
        Some(shard) => {
            let budget = RateLimiter::per_shard(config.max_calls, cli.shard_count);
            let buffer = config.call_buffer / cli.shard_count.max(1);
            let limiter = Arc::new(
                RateLimiter::new(
                    budget,
                    config.window_seconds,
                    &config.ledger_path(Some(cli.shard_index)),
                )?
                .with_call_buffer(buffer),
            );
            let client = Arc::new(HttpRegisterClient::new(&config)?);
            let worker = FetchWorker::new(client, limiter).with_retry(
                config.retry_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            );
            worker.run(&shard, &manifest)?
        }
    };

    let path = partial.save(&run_dir)?;
    println!(
        "[trawl_worker] shard {}/{}: wrote {} outcome(s) to {}",
        cli.shard_index,
        cli.shard_count,
        partial.len(),
        path.display()
    );
    Ok(())
}
