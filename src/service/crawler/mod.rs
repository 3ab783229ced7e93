//! Crawler seam used by the executor, plus the default HTTP implementation.

mod http;

pub use http::{analyze_page, extract_links, HttpCrawler, PageAnalysis};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::{BadRequest, CrawlState, CrawlStats, ExternalLink, PageSummary, UserLimits};
use crate::error::Result;
use crate::events::{EventBus, Subscription};
use crate::service::session::SessionStatus;
use crate::storage::PageStore;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Pause between page fetches.
    pub delay_ms: u64,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Write a state checkpoint every N fetched pages.
    pub checkpoint_every: usize,
    pub external_link_concurrency: usize,
    pub max_external_links: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            user_agent: format!("site-audit/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            checkpoint_every: 10,
            external_link_concurrency: 8,
            max_external_links: 200,
        }
    }
}

/// Progress notification published while a crawl runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub progress: u8,
    pub message: String,
    pub current_url: Option<String>,
    pub phase: Option<String>,
}

/// Who the crawl is running for.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub session_id: Option<String>,
    pub audit_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Normalized start URL (`scheme://host[:port]`).
    pub domain: String,
    pub max_pages: u32,
    /// Ignore any checkpoint left by an interrupted run.
    pub force_new: bool,
    pub limits: UserLimits,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub pages_crawled: u32,
    pub duration_ms: u64,
    pub resumed: bool,
    /// Mean page score, when the crawler scores pages.
    pub score: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlOutput {
    pub summary: CrawlSummary,
    pub pages: Vec<PageSummary>,
    pub visited: BTreeSet<String>,
    pub stats: CrawlStats,
    pub external_links: BTreeMap<String, ExternalLink>,
    pub bad_requests: BTreeMap<String, BadRequest>,
    pub mailto_links: BTreeSet<String>,
    pub tel_links: BTreeSet<String>,
    /// Run directory holding the checkpoint and page data, if one was used.
    pub run_dir: Option<PathBuf>,
    pub page_store: Option<Arc<PageStore>>,
}

impl CrawlOutput {
    pub fn into_state(self, domain: &str) -> CrawlState {
        CrawlState {
            domain: domain.to_string(),
            visited: self.visited,
            stats: self.stats,
            bad_requests: self.bad_requests,
            external_links: self.external_links,
            pages: self.pages,
            score: self.summary.score,
        }
    }
}

#[async_trait]
pub trait Crawler: Send + Sync {
    async fn run_crawl(&self, request: CrawlRequest) -> Result<CrawlOutput>;

    fn progress_events(&self) -> &EventBus<CrawlProgress>;

    fn subscribe_progress(&self, listener: Box<dyn Fn(&CrawlProgress) + Send + Sync>) -> Subscription {
        self.progress_events().subscribe(move |event| listener(event))
    }

    /// Drop pooled connections. Crawlers without pools need not override.
    async fn cleanup_connections(&self) {}

    fn name(&self) -> &'static str;
}
