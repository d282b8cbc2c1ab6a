use std::env;
use std::path::PathBuf;

/// Process configuration, read from the environment with defaults matching
/// the register provider's published limits (600 calls per 5 minutes).
/// Binaries call `dotenv().ok()` before `Config::from_env()`.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub listing_url: String,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    pub max_calls: usize,
    pub window_seconds: u64,
    pub call_buffer: usize,
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub page_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            api_base_url: env_or(
                "TRAWL_API_BASE_URL",
                "https://api.company-information.service.gov.uk/company",
            ),
            listing_url: env_or(
                "TRAWL_LISTING_URL",
                "https://api.company-information.service.gov.uk/advanced-search/companies",
            ),
            api_key: env::var("TRAWL_API_KEY").ok().filter(|k| !k.is_empty()),
            data_dir: PathBuf::from(env_or("TRAWL_DATA_DIR", "./trawl_state")),
            max_calls: env_parsed("TRAWL_RATE_LIMIT", 600),
            window_seconds: env_parsed("TRAWL_RATE_WINDOW_SECS", 300),
            call_buffer: env_parsed("TRAWL_CALL_BUFFER", 50),
            retry_attempts: env_parsed("TRAWL_RETRY_ATTEMPTS", 3),
            retry_base_delay_ms: env_parsed("TRAWL_RETRY_DELAY_MS", 5000),
            request_timeout_secs: env_parsed("TRAWL_HTTP_TIMEOUT_SECS", 10),
            page_size: env_parsed("TRAWL_PAGE_SIZE", 100),
        }
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.data_dir.join("canonical.json")
    }

    pub fn unresolved_path(&self) -> PathBuf {
        self.data_dir.join("unresolved.json")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("runs").join(run_id)
    }

    /// One ledger per shard process so a restarted shard inherits its own
    /// spent budget.
    pub fn ledger_path(&self, shard_index: Option<usize>) -> PathBuf {
        match shard_index {
            Some(index) => self.data_dir.join(format!("rate_ledger_shard_{}.json", index)),
            None => self.data_dir.join("rate_ledger.json"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
