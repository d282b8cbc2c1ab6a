pub mod backfill;
pub mod config;
pub mod error;
pub mod fetch_worker;
pub mod manifest;
pub mod merger;
pub mod partial_store;
pub mod partitioner;
pub mod rate_limiter;
pub mod register;
pub mod store;
pub mod work_item;

pub use error::*;

/// Install the fmt subscriber for a binary. Filter via RUST_LOG, default info.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
