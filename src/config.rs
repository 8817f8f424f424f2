use std::env;

use once_cell::sync::Lazy;

/// Environment-level settings, read once at first use. Page size and pool
/// capacity are applied to the buffer pool when the database environment
/// is (re)built; tests may still override them afterwards via
/// `BufferPool::set_page_size` / `set_pool_capacity`.
pub struct Config {
    /// Directory holding the manifest, the log file and the index files.
    pub data_dir: String,

    /// Size of a single page in bytes.
    pub page_size: usize,

    /// Maximum number of frames the buffer pool keeps cached.
    pub pool_capacity: usize,

    /// Period of the deadlock detector, in milliseconds.
    pub detect_interval_ms: u64,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

impl Config {
    fn from_env() -> Self {
        Self {
            data_dir: env_or("SMALL_INDEX_DIR", "data"),
            page_size: env_or("SMALL_INDEX_PAGE_SIZE", "4096")
                .parse()
                .unwrap_or(4096),
            pool_capacity: env_or("SMALL_INDEX_POOL_CAPACITY", "256")
                .parse()
                .unwrap_or(256),
            detect_interval_ms: env_or("SMALL_INDEX_DETECT_INTERVAL_MS", "20")
                .parse()
                .unwrap_or(20),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}
