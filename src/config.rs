//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::service::crawler::CrawlerConfig;
use crate::service::executor::ExecutorConfig;
use crate::service::queue::QueueConfig;
use crate::storage::PageStoreConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Root of the per-domain run directories.
    pub state_dir: PathBuf,
    pub queue: QueueConfig,
    pub executor: ExecutorConfig,
    pub page_store: PageStoreConfig,
    pub crawler: CrawlerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://audits.db?mode=rwc".to_string(),
            state_dir: PathBuf::from("./audit-state"),
            queue: QueueConfig::default(),
            executor: ExecutorConfig::default(),
            page_store: PageStoreConfig::default(),
            crawler: CrawlerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment (after `.env`).
    ///
    /// | Env Var                            | Default                       |
    /// |------------------------------------|-------------------------------|
    /// | `AUDIT_DATABASE_URL`               | `sqlite://audits.db?mode=rwc` |
    /// | `AUDIT_STATE_DIR`                  | `./audit-state`               |
    /// | `AUDIT_MAX_CONCURRENT_JOBS`        | `2`                           |
    /// | `AUDIT_JOB_MAX_ATTEMPTS`           | `3`                           |
    /// | `AUDIT_JOB_TIMEOUT_SECS`           | unset (no deadline)           |
    /// | `AUDIT_CACHE_FRESHNESS_HOURS`      | `24`                          |
    /// | `PAGE_STORE_COMPRESSION_THRESHOLD` | `10240`                       |
    /// | `PAGE_STORE_MAX_ITEMS`             | `100`                         |
    /// | `CRAWL_DELAY_MS`                   | `0`                           |
    /// | `CRAWL_USER_AGENT`                 | `site-audit/<version>`        |
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values are logged and
    /// replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("AUDIT_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = lookup("AUDIT_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        config.queue.max_concurrent_jobs =
            parse_or(&lookup, "AUDIT_MAX_CONCURRENT_JOBS", config.queue.max_concurrent_jobs);
        config.queue.default_max_attempts =
            parse_or(&lookup, "AUDIT_JOB_MAX_ATTEMPTS", config.queue.default_max_attempts);
        config.queue.job_timeout = parse_opt::<u64>(&lookup, "AUDIT_JOB_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let hours = parse_or(&lookup, "AUDIT_CACHE_FRESHNESS_HOURS", 24i64);
        config.executor.freshness_window = chrono::Duration::hours(hours);

        config.page_store.compression_threshold = parse_or(
            &lookup,
            "PAGE_STORE_COMPRESSION_THRESHOLD",
            config.page_store.compression_threshold,
        );
        config.page_store.max_items_in_memory =
            parse_or(&lookup, "PAGE_STORE_MAX_ITEMS", config.page_store.max_items_in_memory);

        config.crawler.delay_ms = parse_or(&lookup, "CRAWL_DELAY_MS", config.crawler.delay_ms);
        if let Some(agent) = lookup("CRAWL_USER_AGENT") {
            config.crawler.user_agent = agent;
        }

        config
    }
}

fn parse_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse_opt(lookup, key).unwrap_or(default)
}
