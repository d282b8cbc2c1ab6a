use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use trawl::backfill::BackfillController;
use trawl::config::Config;
use trawl::manifest::SelectionMode;
use trawl::rate_limiter::RateLimiter;
use trawl::register::{DateRange, HttpRegisterClient};
use trawl::store::{CanonicalStore, UnresolvedIndex};
use trawl::TrawlError;

/// Resumable historical backfill over an incorporation-date range. Safe to
/// interrupt and re-run with the same range; progress is published to the
/// data directory for polling.
#[derive(Parser)]
#[command(name = "trawl_backfill")]
struct Cli {
    /// YYYY-MM-DD
    #[arg(long)]
    start_date: String,
    /// YYYY-MM-DD
    #[arg(long)]
    end_date: String,
    #[arg(long, value_enum, default_value = "all")]
    mode: SelectionMode,
    #[arg(long, default_value_t = 10)]
    threads: usize,
}

fn main() -> Result<(), TrawlError> {
    dotenv().ok();
    trawl::init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    let range = DateRange::parse(&cli.start_date, &cli.end_date)?;

    let limiter = Arc::new(
        RateLimiter::new(config.max_calls, config.window_seconds, &config.ledger_path(None))?
            .with_call_buffer(config.call_buffer),
    );
    let client = Arc::new(HttpRegisterClient::new(&config)?);
    let controller = BackfillController::new(client, limiter, &config.progress_path())
        .with_mode(cli.mode)
        .with_threads(cli.threads)
        .with_retry(
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        );

    let mut canonical = CanonicalStore::load(&config.canonical_path());
    let mut unresolved = UnresolvedIndex::load(&config.unresolved_path());

    let progress = controller.backfill(&range, &mut canonical, &mut unresolved)?;
    println!(
        "[trawl_backfill] {} to {}: processed {}/{}; canonical={}, unresolved={}",
        cli.start_date,
        cli.end_date,
        progress.processed_count,
        progress.total_count,
        canonical.len(),
        unresolved.len()
    );
    Ok(())
}
