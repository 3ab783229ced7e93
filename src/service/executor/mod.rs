//! Audit execution: one crawl-to-report pipeline at a time.
//!
//! The executor:
//! 1. Validates and normalizes the request
//! 2. Claims its single-flight gate
//! 3. Serves a fresh cached audit when one exists
//! 4. Otherwise drives the crawler, mirroring progress into the session map
//! 5. Builds the simple or full report and cleans up the run directory

pub mod report;

pub use report::{
    build_report, compute_score, extract_top_issues, generate_full_report, generate_simple_report,
    DEFAULT_TOP_ISSUES, MAX_REPORT_ISSUES,
};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::models::{AuditRecord, AuditStatus, AuditUpdate, CrawlState, ReportType, UserLimits};
use crate::domain::report::{AuditMetrics, ReportData};
use crate::error::{AppError, Result};
use crate::events::Subscription;
use crate::repository::AuditRepository;
use crate::service::crawler::{CrawlProgress, CrawlRequest, Crawler, ExecutionContext};
use crate::service::session::{SessionStatus, SessionStore, SessionUpdate};
use crate::storage::{AuditStateLayout, CrawlStateContainers, PageStore, PageStoreConfig, StateLoader};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DEFAULT_MAX_PAGES: i64 = 50;
pub const MAX_PAGES_LIMIT: i64 = 1000;

const CACHED_MESSAGE: &str = "Using cached results";

// ============================================================================
// CONFIG & REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How old a completed audit may be and still be served from cache.
    pub freshness_window: chrono::Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            freshness_window: chrono::Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditRequest {
    pub domain: String,
    /// Defaults to [`DEFAULT_MAX_PAGES`].
    pub max_pages: Option<i64>,
    #[serde(default)]
    pub force_new: bool,
    pub session_id: Option<String>,
    pub user_limits: Option<UserLimits>,
    /// Persisted audit row to mark failed if the run fails.
    pub audit_id: Option<i64>,
    #[serde(default)]
    pub report_type: ReportType,
}

impl AuditRequest {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Check the request and return `(normalized_url, max_pages)`.
    pub fn validate(&self) -> Result<(String, u32)> {
        let url = normalize_domain(&self.domain)?;

        if let Some(session_id) = &self.session_id {
            if session_id.trim().is_empty() {
                return Err(AppError::validation("session_id must not be empty"));
            }
        }

        let max_pages = self.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        if !(1..=MAX_PAGES_LIMIT).contains(&max_pages) {
            return Err(AppError::validation(format!(
                "max_pages must be between 1 and {}, got {}",
                MAX_PAGES_LIMIT, max_pages
            )));
        }

        Ok((url, max_pages as u32))
    }
}

/// Reduce a domain or URL to its origin (`https://example.com`). A bare host
/// is treated as https.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let trimmed = domain.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("domain is required"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&candidate)
        .map_err(|e| AppError::validation(format!("invalid domain '{}': {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::validation(format!(
            "unsupported scheme '{}' in '{}'",
            url.scheme(),
            trimmed
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::validation(format!("domain '{}' has no host", trimmed)));
    }

    Ok(url.origin().ascii_serialization())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub report_data: ReportData,
    pub audit_metrics: AuditMetrics,
    pub cached: bool,
    /// Age of the cached audit, when served from cache.
    pub cache_age_ms: Option<i64>,
}

/// Crawl state reloaded from the newest run directory.
pub struct AuditStateSnapshot {
    pub run_dir: PathBuf,
    pub containers: CrawlStateContainers,
    pub page_store: Arc<PageStore>,
}

impl AuditStateSnapshot {
    /// Rebuild a reportable [`CrawlState`], reading page summaries back from
    /// the page store.
    pub async fn crawl_state(&self, domain: &str) -> Result<CrawlState> {
        let mut pages = Vec::new();
        for (url, value) in self.page_store.entries().await? {
            match serde_json::from_value(value) {
                Ok(page) => pages.push(page),
                Err(e) => log::warn!("[AUDIT] Skipping unreadable page entry {}: {}", url, e),
            }
        }
        Ok(CrawlState {
            domain: domain.to_string(),
            visited: self.containers.visited.clone(),
            stats: self.containers.stats.clone(),
            bad_requests: self.containers.bad_requests.clone(),
            external_links: self.containers.external_links.clone(),
            pages,
            score: None,
        })
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Collaborators an executor needs. Cheap to clone.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub crawler: Arc<dyn Crawler>,
    pub state_loader: Arc<dyn StateLoader>,
    pub audits: Arc<dyn AuditRepository>,
    pub sessions: SessionStore,
    pub layout: AuditStateLayout,
    pub page_store_config: PageStoreConfig,
    pub config: ExecutorConfig,
}

/// Runs at most one audit at a time.
pub struct AuditExecutor {
    deps: ExecutorDeps,
    is_running: AtomicBool,
}

/// Releases the single-flight gate on every exit path.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AuditExecutor {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self {
            deps,
            is_running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    fn claim(&self) -> Result<RunningGuard<'_>> {
        self.is_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunningGuard(&self.is_running))
            .map_err(|_| AppError::conflict("audit already in progress"))
    }

    fn mirror(&self, session_id: Option<&str>, update: SessionUpdate) {
        if let Some(session_id) = session_id {
            self.deps.sessions.merge(session_id, update);
        }
    }

    pub async fn execute_audit(&self, request: AuditRequest) -> Result<AuditOutcome> {
        let (url, max_pages) = request.validate()?;
        let _guard = self.claim()?;
        let started = Instant::now();
        let session_id = request.session_id.as_deref();

        log::info!(
            "[AUDIT] Starting {} audit of {} (max {} pages, force_new={})",
            request.report_type.as_str(),
            url,
            max_pages,
            request.force_new
        );

        if !request.force_new {
            if let Some(outcome) = self.cached_outcome(&url, request.report_type).await {
                self.mirror(session_id, completed_update(CACHED_MESSAGE, &outcome));
                return Ok(outcome);
            }
        }

        self.mirror(
            session_id,
            SessionUpdate::status(SessionStatus::Running)
                .progress(0)
                .message(format!("Starting audit of {}", url)),
        );

        match self.run_fresh(&request, &url, max_pages, started).await {
            Ok(outcome) => {
                log::info!(
                    "[AUDIT] Completed {}: score {}, {} pages in {}ms",
                    url,
                    outcome.audit_metrics.score,
                    outcome.audit_metrics.pages_scanned,
                    outcome.audit_metrics.duration_ms
                );
                self.mirror(session_id, completed_update("Audit completed", &outcome));
                Ok(outcome)
            }
            Err(e) => Err(self.record_failure(&request, &url, e).await),
        }
    }

    async fn run_fresh(
        &self,
        request: &AuditRequest,
        url: &str,
        max_pages: u32,
        started: Instant,
    ) -> Result<AuditOutcome> {
        let crawl = {
            let _progress = request
                .session_id
                .as_deref()
                .map(|sid| self.subscribe_session(sid));
            self.deps
                .crawler
                .run_crawl(CrawlRequest {
                    domain: url.to_string(),
                    max_pages,
                    force_new: request.force_new,
                    limits: request.user_limits.clone().unwrap_or_default(),
                    context: ExecutionContext {
                        session_id: request.session_id.clone(),
                        audit_id: request.audit_id,
                    },
                })
                .await
        };
        let output = crawl.map_err(|e| AppError::execution(url, e))?;

        let state = output.into_state(url);
        let report_data = build_report(&state, request.report_type);
        let audit_metrics = report::metrics_for(&report_data, started.elapsed().as_millis() as u64);

        if let Err(e) = self.cleanup_audit_files(url).await {
            log::warn!("[AUDIT] Audit of {} succeeded but cleanup failed: {}", url, e);
        }

        Ok(AuditOutcome {
            report_data,
            audit_metrics,
            cached: false,
            cache_age_ms: None,
        })
    }

    /// Merge crawler progress for this session into the session map until
    /// the returned handle is dropped.
    fn subscribe_session(&self, session_id: &str) -> Subscription {
        let sessions = self.deps.sessions.clone();
        let session_id = session_id.to_string();
        self.deps
            .crawler
            .subscribe_progress(Box::new(move |event: &CrawlProgress| {
                if event.session_id.as_deref() != Some(session_id.as_str()) {
                    return;
                }
                let mut update = SessionUpdate::status(event.status)
                    .progress(event.progress)
                    .message(event.message.clone());
                if let Some(current_url) = &event.current_url {
                    update = update.current_url(current_url.clone());
                }
                if let Some(phase) = &event.phase {
                    update = update.phase(phase.clone());
                }
                sessions.merge(&session_id, update);
            }))
    }

    async fn cached_outcome(&self, url: &str, report_type: ReportType) -> Option<AuditOutcome> {
        let record = match self.deps.audits.find_most_recent_by_domain(url).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[AUDIT] Cache lookup for {} failed, crawling fresh: {}", url, e);
                return None;
            }
        };

        let age = Utc::now() - record.created_at;
        if age >= self.deps.config.freshness_window {
            log::debug!("[AUDIT] Cached audit {} for {} is stale ({}s old)", record.id, url, age.num_seconds());
            return None;
        }

        let report_data = cached_report(&record, report_type)?;
        let duration_ms = record.duration_ms.unwrap_or(0).max(0) as u64;
        let audit_metrics = report::metrics_for(&report_data, duration_ms);
        log::info!("[AUDIT] Serving cached audit {} for {} ({}s old)", record.id, url, age.num_seconds());

        Some(AuditOutcome {
            report_data,
            audit_metrics,
            cached: true,
            cache_age_ms: Some(age.num_milliseconds().max(0)),
        })
    }

    async fn record_failure(&self, request: &AuditRequest, url: &str, error: AppError) -> AppError {
        let error = match error {
            e @ AppError::Execution { .. } => e,
            other => AppError::execution(url, other),
        };
        log::error!("[AUDIT] {}", error);

        if let Some(audit_id) = request.audit_id {
            let update = AuditUpdate {
                error_message: Some(error.to_string()),
                ..Default::default()
            };
            if let Err(e) = self.deps.audits.update_status(audit_id, AuditStatus::Failed, update).await {
                log::warn!("[AUDIT] Could not mark audit {} failed: {}", audit_id, e);
            }
        }

        self.mirror(
            request.session_id.as_deref(),
            SessionUpdate::status(SessionStatus::Error)
                .message("Audit failed")
                .error(error.to_string()),
        );
        error
    }

    // ========================================================================
    // STATE & CLEANUP
    // ========================================================================

    /// Reload the newest checkpoint for `domain` through the state loader.
    pub async fn load_audit_state(&self, domain: &str) -> Result<AuditStateSnapshot> {
        let run_dir = self
            .deps
            .layout
            .latest_run_dir(domain)
            .await?
            .ok_or_else(|| AppError::StateNotFound(domain.to_string()))?;

        let page_store = Arc::new(PageStore::new(
            AuditStateLayout::page_data_dir(&run_dir),
            self.deps.page_store_config.clone(),
        ));
        let mut containers = CrawlStateContainers::default();
        let found = self
            .deps
            .state_loader
            .load_state(&AuditStateLayout::state_file(&run_dir), &mut containers, &page_store)
            .await?;
        if !found {
            return Err(AppError::StateNotFound(domain.to_string()));
        }

        log::debug!(
            "[AUDIT] Loaded state for {} from {} ({} visited)",
            domain,
            run_dir.display(),
            containers.visited.len()
        );
        Ok(AuditStateSnapshot {
            run_dir,
            containers,
            page_store,
        })
    }

    /// Remove the newest run directory for `domain`. Missing state is a no-op.
    pub async fn cleanup_audit_files(&self, domain: &str) -> Result<()> {
        let latest = self
            .deps
            .layout
            .latest_run_dir(domain)
            .await
            .map_err(|source| AppError::Cleanup {
                path: self.deps.layout.domain_dir(domain),
                source,
            })?;
        let Some(run_dir) = latest else {
            log::debug!("[AUDIT] No run directory to clean for {}", domain);
            return Ok(());
        };

        match tokio::fs::remove_dir_all(&run_dir).await {
            Ok(()) => {
                log::info!("[AUDIT] Removed {}", run_dir.display());
                Ok(())
            }
            Err(source) => {
                log::error!("[AUDIT] Failed to remove {}: {}", run_dir.display(), source);
                Err(AppError::Cleanup { path: run_dir, source })
            }
        }
    }

    pub async fn cleanup_connections(&self) {
        log::debug!("[AUDIT] Releasing {} crawler connections", self.deps.crawler.name());
        self.deps.crawler.cleanup_connections().await;
    }
}

/// Decode a cached row's report, downgrading a full report when only the
/// simple one was asked for. A simple report cannot satisfy a full request.
fn cached_report(record: &AuditRecord, wanted: ReportType) -> Option<ReportData> {
    let raw = record.report_data.clone()?;
    let data: ReportData = match serde_json::from_value(raw) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("[AUDIT] Ignoring unreadable cached report on audit {}: {}", record.id, e);
            return None;
        }
    };
    match (data, wanted) {
        (ReportData::Full(full), ReportType::Simple) => Some(ReportData::Simple(full.simple)),
        (ReportData::Simple(_), ReportType::Full) => None,
        (data, _) => Some(data),
    }
}

/// Session update for a finished audit. A report that fails to serialize is
/// left off the session; the audit itself still succeeds.
fn completed_update(message: &str, outcome: &AuditOutcome) -> SessionUpdate {
    let update = SessionUpdate::status(SessionStatus::Completed)
        .progress(100)
        .message(message);
    match serde_json::to_value(&outcome.report_data) {
        Ok(result) => update.result(result),
        Err(e) => {
            log::warn!("[AUDIT] Could not attach report to session: {}", e);
            update
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NewAudit;
    use crate::repository::sqlite::SqliteAuditRepository;
    use crate::storage::JsonStateLoader;
    use crate::test_utils::fixtures::{self, StubCrawler};
    use serde_json::json;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        crawler: Arc<StubCrawler>,
        audits: Arc<SqliteAuditRepository>,
        sessions: SessionStore,
        executor: AuditExecutor,
        layout: AuditStateLayout,
    }

    async fn harness(crawler: StubCrawler) -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = fixtures::setup_test_db().await;
        let crawler = Arc::new(crawler);
        let audits = Arc::new(SqliteAuditRepository::new(pool));
        let sessions = SessionStore::new();
        let layout = AuditStateLayout::new(dir.path());
        let executor = AuditExecutor::new(ExecutorDeps {
            crawler: crawler.clone(),
            state_loader: Arc::new(JsonStateLoader),
            audits: audits.clone(),
            sessions: sessions.clone(),
            layout: layout.clone(),
            page_store_config: PageStoreConfig::default(),
            config: ExecutorConfig::default(),
        });
        Harness {
            _dir: dir,
            crawler,
            audits,
            sessions,
            executor,
            layout,
        }
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_domain("http://Example.com:8080/path?q=1").unwrap(),
            "http://example.com:8080"
        );
        assert!(normalize_domain("   ").unwrap_err().is_validation());
        assert!(normalize_domain("ftp://example.com").unwrap_err().is_validation());
        assert!(normalize_domain("not a domain").unwrap_err().is_validation());
    }

    #[test]
    fn test_request_validation() {
        let mut request = AuditRequest::new("example.com");
        assert_eq!(request.validate().unwrap(), ("https://example.com".to_string(), 50));

        request.max_pages = Some(0);
        assert!(request.validate().unwrap_err().is_validation());
        request.max_pages = Some(1001);
        assert!(request.validate().unwrap_err().is_validation());
        request.max_pages = Some(1000);
        assert!(request.validate().is_ok());

        request.session_id = Some("  ".into());
        assert!(request.validate().unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let h = harness(StubCrawler::new()).await;
        let err = h.executor.execute_audit(AuditRequest::new("")).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(h.crawler.calls(), 0);
        assert!(!h.executor.is_running());
    }

    #[tokio::test]
    async fn test_second_call_conflicts_while_first_runs() {
        let h = harness(StubCrawler::new().gated()).await;
        let crawler = h.crawler.clone();

        let (first, second) = tokio::join!(
            h.executor.execute_audit(AuditRequest::new("https://example.com")),
            async {
                let second = h
                    .executor
                    .execute_audit(AuditRequest::new("https://example.com"))
                    .await;
                crawler.release();
                second
            }
        );

        assert!(second.unwrap_err().is_conflict());
        assert!(!first.unwrap().cached);
        assert!(!h.executor.is_running());

        // Gate was released: a third call goes through.
        let mut third = AuditRequest::new("https://example.com");
        third.force_new = true;
        h.crawler.release();
        assert!(h.executor.execute_audit(third).await.is_ok());
        assert_eq!(h.crawler.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_cached_audit_skips_crawler() {
        let h = harness(StubCrawler::new()).await;
        let state = CrawlState {
            domain: "https://example.com".into(),
            ..Default::default()
        };
        let report = build_report(&state, ReportType::Full);
        let audit = h
            .audits
            .create(NewAudit {
                user_id: None,
                url: "https://example.com".into(),
                audit_type: ReportType::Full,
                config: json!({}),
            })
            .await
            .unwrap();
        h.audits
            .update_status(
                audit.id,
                AuditStatus::Completed,
                AuditUpdate {
                    report_data: Some(serde_json::to_value(&report).unwrap()),
                    duration_ms: Some(1500),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut request = AuditRequest::new("example.com");
        request.session_id = Some("sess-1".into());
        let outcome = h.executor.execute_audit(request).await.unwrap();

        assert!(outcome.cached);
        assert!(outcome.cache_age_ms.is_some());
        assert_eq!(outcome.audit_metrics.duration_ms, 1500);
        assert!(matches!(outcome.report_data, ReportData::Simple(_)));
        assert_eq!(h.crawler.calls(), 0);

        let session = h.sessions.get("sess-1").unwrap();
        assert_eq!(session.status, Some(SessionStatus::Completed));
        assert_eq!(session.progress, 100);
        assert_eq!(session.message.as_deref(), Some("Using cached results"));
        assert_eq!(session.result, Some(serde_json::to_value(&outcome.report_data).unwrap()));
    }

    #[tokio::test]
    async fn test_crawl_failure_is_wrapped_and_recorded() {
        let h = harness(StubCrawler::new().failing("connection refused")).await;
        let audit = h
            .audits
            .create(NewAudit {
                user_id: None,
                url: "https://example.com".into(),
                audit_type: ReportType::Simple,
                config: json!({}),
            })
            .await
            .unwrap();

        let mut request = AuditRequest::new("https://example.com");
        request.audit_id = Some(audit.id);
        request.session_id = Some("s".into());
        let err = h.executor.execute_audit(request).await.unwrap_err();

        assert!(err.to_string().starts_with("Audit failed for https://example.com:"));
        assert!(err.to_string().contains("connection refused"));
        assert!(!h.executor.is_running());
        assert_eq!(h.crawler.progress_events().listener_count(), 0);

        let row = h.audits.get_by_id(audit.id).await.unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Failed);
        assert!(row.error_message.unwrap().contains("connection refused"));

        let session = h.sessions.get("s").unwrap();
        assert_eq!(session.status, Some(SessionStatus::Error));
    }

    #[tokio::test]
    async fn test_progress_is_mirrored_and_unsubscribed() {
        let h = harness(StubCrawler::new()).await;
        let mut request = AuditRequest::new("https://example.com");
        request.session_id = Some("live".into());

        h.sessions.merge("live", SessionUpdate::default().extra("owner", json!("dash")));
        let outcome = h.executor.execute_audit(request).await.unwrap();
        assert!(!outcome.cached);

        let session = h.sessions.get("live").unwrap();
        assert_eq!(session.status, Some(SessionStatus::Completed));
        assert_eq!(session.phase.as_deref(), Some("crawling"));
        assert_eq!(session.extra.get("owner"), Some(&json!("dash")));
        assert_eq!(session.result, Some(serde_json::to_value(&outcome.report_data).unwrap()));
        assert_eq!(h.crawler.progress_events().listener_count(), 0);
    }

    #[test]
    fn test_completed_update_attaches_report() {
        let outcome = fixtures::sample_job_outcome().outcome;
        let session = SessionStore::new().merge("done", completed_update("Audit completed", &outcome));

        assert_eq!(session.status, Some(SessionStatus::Completed));
        assert_eq!(session.progress, 100);
        assert_eq!(session.result.unwrap()["report_type"], json!("simple"));
    }

    #[tokio::test]
    async fn test_load_state_and_cleanup() {
        let h = harness(StubCrawler::new()).await;
        let domain = "https://example.com";
        assert!(matches!(
            h.executor.load_audit_state(domain).await,
            Err(AppError::StateNotFound(_))
        ));
        // Missing directory is fine.
        h.executor.cleanup_audit_files(domain).await.unwrap();

        let run_dir = h.layout.domain_dir(domain).join("run-100");
        let mut containers = CrawlStateContainers::default();
        containers.visited.insert("https://example.com/".into());
        containers.mailto_links.insert("mailto:a@example.com".into());
        JsonStateLoader
            .save_state(&AuditStateLayout::state_file(&run_dir), &containers)
            .await
            .unwrap();
        let store = PageStore::new(AuditStateLayout::page_data_dir(&run_dir), PageStoreConfig::default());
        store
            .set("https://example.com/", &json!({ "url": "https://example.com/", "word_count": 10, "load_time_ms": 5 }))
            .await
            .unwrap();

        let snapshot = h.executor.load_audit_state(domain).await.unwrap();
        assert_eq!(snapshot.containers, containers);
        let state = snapshot.crawl_state(domain).await.unwrap();
        assert_eq!(state.pages.len(), 1);

        h.executor.cleanup_audit_files(domain).await.unwrap();
        assert!(!run_dir.exists());
    }

    #[tokio::test]
    async fn test_cleanup_leaves_other_origins_on_same_host() {
        let h = harness(StubCrawler::new()).await;
        let other = h.layout.domain_dir("http://example.com:8080").join("run-5");
        std::fs::create_dir_all(&other).unwrap();
        let mine = h.layout.domain_dir("https://example.com").join("run-6");
        std::fs::create_dir_all(&mine).unwrap();

        h.executor.cleanup_audit_files("https://example.com").await.unwrap();
        assert!(!mine.exists());
        assert!(other.exists());
    }

    #[tokio::test]
    async fn test_cleanup_connections_delegates_to_crawler() {
        let h = harness(StubCrawler::new()).await;
        h.executor.cleanup_connections().await;
        h.executor.cleanup_connections().await;
        assert_eq!(h.crawler.cleanups(), 2);
    }
}
