//! `RunAudit` job handler.
//!
//! Owns the persisted audit row for the job: creates it, marks it running,
//! hands the work to a fresh [`AuditExecutor`], records completion and usage,
//! and mirrors the outcome into the session map.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

use crate::domain::models::{AuditStatus, AuditUpdate, NewAudit, UsageRecord};
use crate::error::{AppError, Result};
use crate::repository::UsageRecorder;
use crate::service::executor::{normalize_domain, AuditExecutor, AuditOutcome, AuditRequest, ExecutorDeps};
use crate::service::queue::{AuditJobOutcome, JobContext, JobId, RunAuditHandler, RunAuditPayload};
use crate::service::session::{SessionStatus, SessionUpdate};

pub struct AuditJobRunner {
    deps: ExecutorDeps,
    usage: Arc<dyn UsageRecorder>,
    /// Audits of the same domain share run directories, so they take turns.
    /// Entries are dropped once nobody holds or waits on them.
    domain_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Audit row of each attempt currently running, by job.
    in_flight: DashMap<JobId, i64>,
}

impl AuditJobRunner {
    pub fn new(deps: ExecutorDeps, usage: Arc<dyn UsageRecorder>) -> Self {
        Self {
            deps,
            usage,
            domain_locks: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    fn domain_lock(&self, url: &str) -> Arc<Mutex<()>> {
        self.domain_locks.entry(url.to_string()).or_default().clone()
    }

    /// Drop the lock entry unless another attempt still holds a handle to it.
    fn release_domain_lock(&self, url: &str) {
        self.domain_locks.remove_if(url, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn execute(&self, ctx: &JobContext, payload: RunAuditPayload) -> Result<AuditJobOutcome> {
        let session_id = payload.session_id.clone();
        let request = AuditRequest {
            domain: payload.domain,
            max_pages: payload.max_pages,
            force_new: payload.force_new,
            session_id: payload.session_id,
            user_limits: payload.user_limits,
            audit_id: None,
            report_type: payload.report_type,
        };
        let (url, max_pages) = request.validate()?;

        if let Some(sid) = &session_id {
            self.deps.sessions.merge(
                sid,
                SessionUpdate::status(SessionStatus::Running)
                    .progress(0)
                    .message(format!("Job {} started (attempt {})", ctx.job_id, ctx.attempt))
                    .extra("job_id", json!(ctx.job_id)),
            );
        }
        ctx.report_progress(session_id.as_deref(), 0, "Audit started");

        let lock = self.domain_lock(&url);
        let result = {
            let _turn = lock.lock().await;
            self.run_exclusive(ctx, request, &url, max_pages, payload.user_id).await
        };
        drop(lock);
        self.release_domain_lock(&url);

        let outcome = result?;
        ctx.report_progress(session_id.as_deref(), 100, "Audit completed");
        Ok(outcome)
    }

    /// Everything that touches the audit row, run while holding the domain's turn.
    async fn run_exclusive(
        &self,
        ctx: &JobContext,
        mut request: AuditRequest,
        url: &str,
        max_pages: u32,
        user_id: Option<i64>,
    ) -> Result<AuditJobOutcome> {
        let audit = self
            .deps
            .audits
            .create(NewAudit {
                user_id,
                url: url.to_string(),
                audit_type: request.report_type,
                config: json!({
                    "max_pages": max_pages,
                    "force_new": request.force_new,
                    "job_id": ctx.job_id,
                    "attempt": ctx.attempt,
                }),
            })
            .await?;
        self.in_flight.insert(ctx.job_id.clone(), audit.id);
        if let Err(e) = self
            .deps
            .audits
            .update_status(audit.id, AuditStatus::Running, AuditUpdate::default())
            .await
        {
            self.in_flight.remove(&ctx.job_id);
            return Err(e);
        }
        request.audit_id = Some(audit.id);

        let executor = AuditExecutor::new(self.deps.clone());
        let executed = executor.execute_audit(request).await;
        self.in_flight.remove(&ctx.job_id);
        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(e) => {
                // The executor records its own execution failures.
                if !matches!(e, AppError::Execution { .. }) {
                    self.mark_failed(audit.id, &e).await;
                }
                return Err(e);
            }
        };

        self.record_completion(audit.id, user_id, url, &outcome).await?;

        Ok(AuditJobOutcome {
            audit_id: Some(audit.id),
            outcome,
        })
    }

    async fn record_completion(
        &self,
        audit_id: i64,
        user_id: Option<i64>,
        url: &str,
        outcome: &AuditOutcome,
    ) -> Result<()> {
        let metrics = &outcome.audit_metrics;
        // Cached rows keep no report, so they never become a cache source.
        let report_data = if outcome.cached {
            None
        } else {
            Some(serde_json::to_value(&outcome.report_data)?)
        };
        self.deps
            .audits
            .update_status(
                audit_id,
                AuditStatus::Completed,
                AuditUpdate {
                    report_data,
                    score: Some(i64::from(metrics.score)),
                    duration_ms: Some(metrics.duration_ms as i64),
                    pages_scanned: Some(i64::from(metrics.pages_scanned)),
                    external_links_checked: Some(i64::from(metrics.external_links_checked)),
                    error_message: None,
                },
            )
            .await?;

        if let Some(user_id) = user_id {
            let usage = UsageRecord {
                audit_id,
                pages_scanned: i64::from(metrics.pages_scanned),
                external_links_checked: i64::from(metrics.external_links_checked),
                score: i64::from(metrics.score),
                url: url.to_string(),
                report_type: outcome.report_data.report_type(),
                duration_ms: metrics.duration_ms as i64,
            };
            if let Err(e) = self.usage.record_audit_usage(user_id, usage).await {
                log::warn!("[AUDIT] Failed to record usage for audit {}: {}", audit_id, e);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, audit_id: i64, error: &AppError) {
        let update = AuditUpdate {
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        if let Err(e) = self
            .deps
            .audits
            .update_status(audit_id, AuditStatus::Failed, update)
            .await
        {
            log::warn!("[AUDIT] Could not mark audit {} failed: {}", audit_id, e);
        }
    }
}

#[async_trait]
impl RunAuditHandler for AuditJobRunner {
    async fn run_audit(&self, ctx: JobContext, payload: RunAuditPayload) -> Result<AuditJobOutcome> {
        let session_id = payload.session_id.clone();
        log::info!("[AUDIT] Job {} attempt {}: {}", ctx.job_id, ctx.attempt, payload.domain);

        let result = self.execute(&ctx, payload).await;
        if let Err(e) = &result {
            log::warn!("[AUDIT] Job {} attempt {} failed: {}", ctx.job_id, ctx.attempt, e);
            if let Some(sid) = session_id.as_deref() {
                self.deps.sessions.merge(
                    sid,
                    SessionUpdate::status(SessionStatus::Error).error(e.to_string()),
                );
            }
            ctx.report_progress(session_id.as_deref(), 100, "Audit failed");
        }
        result
    }

    async fn on_timeout(&self, ctx: JobContext, payload: RunAuditPayload, limit: Duration) {
        let error = AppError::Timeout(limit);
        log::warn!("[AUDIT] Job {} attempt {} aborted: {}", ctx.job_id, ctx.attempt, error);

        if let Some((_, audit_id)) = self.in_flight.remove(&ctx.job_id) {
            self.mark_failed(audit_id, &error).await;
        }
        if let Ok(url) = normalize_domain(&payload.domain) {
            self.release_domain_lock(&url);
        }
        if let Some(sid) = payload.session_id.as_deref() {
            self.deps.sessions.merge(
                sid,
                SessionUpdate::status(SessionStatus::Error).error(error.to_string()),
            );
        }
        ctx.report_progress(payload.session_id.as_deref(), 100, "Audit failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ReportType;
    use crate::events::EventBus;
    use crate::repository::sqlite::{SqliteAuditRepository, SqliteUsageRepository};
    use crate::repository::AuditRepository;
    use crate::service::executor::ExecutorConfig;
    use crate::storage::{AuditStateLayout, JsonStateLoader, PageStoreConfig};
    use crate::test_utils::fixtures::{self, StubCrawler};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        crawler: Arc<StubCrawler>,
        audits: Arc<SqliteAuditRepository>,
        runner: Arc<AuditJobRunner>,
    }

    async fn harness(crawler: StubCrawler) -> Harness {
        let dir = TempDir::new().unwrap();
        let pool = fixtures::setup_test_db().await;
        let crawler = Arc::new(crawler);
        let audits = Arc::new(SqliteAuditRepository::new(pool.clone()));
        let deps = ExecutorDeps {
            crawler: crawler.clone(),
            state_loader: Arc::new(JsonStateLoader),
            audits: audits.clone(),
            sessions: crate::service::session::SessionStore::new(),
            layout: AuditStateLayout::new(dir.path()),
            page_store_config: PageStoreConfig::default(),
            config: ExecutorConfig::default(),
        };
        let runner = Arc::new(AuditJobRunner::new(deps, Arc::new(SqliteUsageRepository::new(pool))));
        Harness {
            _dir: dir,
            crawler,
            audits,
            runner,
        }
    }

    fn ctx(job_id: &str) -> JobContext {
        JobContext::new(job_id.to_string(), 1, EventBus::new())
    }

    fn payload(session_id: &str, force_new: bool) -> RunAuditPayload {
        RunAuditPayload {
            domain: "example.com".into(),
            session_id: Some(session_id.to_string()),
            force_new,
            report_type: ReportType::Simple,
            ..Default::default()
        }
    }

    async fn wait_for_calls(crawler: &StubCrawler, calls: usize) {
        while crawler.calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_domain_lock_dropped_after_job() {
        let h = harness(StubCrawler::new()).await;

        h.runner.run_audit(ctx("1"), payload("a", false)).await.unwrap();
        assert!(h.runner.domain_locks.is_empty());
        assert!(h.runner.in_flight.is_empty());

        // Failed validation never creates an entry.
        let mut bad = payload("b", false);
        bad.domain = "ftp://example.com".into();
        assert!(h.runner.run_audit(ctx("2"), bad).await.is_err());
        assert!(h.runner.domain_locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_domain_lock_kept_while_another_job_waits() {
        let h = harness(StubCrawler::new().gated()).await;

        let first = {
            let runner = h.runner.clone();
            tokio::spawn(async move { runner.run_audit(ctx("1"), payload("a", true)).await })
        };
        wait_for_calls(&h.crawler, 1).await;
        let second = {
            let runner = h.runner.clone();
            tokio::spawn(async move { runner.run_audit(ctx("2"), payload("b", true)).await })
        };
        while h
            .runner
            .domain_locks
            .get("https://example.com")
            .map_or(0, |lock| Arc::strong_count(lock.value()))
            < 3
        {
            tokio::task::yield_now().await;
        }

        h.crawler.release();
        first.await.unwrap().unwrap();
        // The waiting job still holds a handle, so the entry survives.
        assert_eq!(h.runner.domain_locks.len(), 1);

        wait_for_calls(&h.crawler, 2).await;
        h.crawler.release();
        second.await.unwrap().unwrap();
        assert!(h.runner.domain_locks.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_hook_fails_row_and_session() {
        let h = harness(StubCrawler::new().gated()).await;

        let attempt = {
            let runner = h.runner.clone();
            tokio::spawn(async move { runner.run_audit(ctx("9"), payload("late", false)).await })
        };
        wait_for_calls(&h.crawler, 1).await;
        let audit_id = *h.runner.in_flight.get("9").unwrap();
        attempt.abort();
        assert!(attempt.await.unwrap_err().is_cancelled());

        h.runner
            .on_timeout(ctx("9"), payload("late", false), Duration::from_secs(2))
            .await;

        let row = h.audits.get_by_id(audit_id).await.unwrap().unwrap();
        assert_eq!(row.status, AuditStatus::Failed);
        assert!(row.error_message.unwrap().contains("timed out"));

        let session = h.runner.deps.sessions.get("late").unwrap();
        assert_eq!(session.status, Some(SessionStatus::Error));
        assert!(session.error.unwrap().contains("timed out"));
        assert!(h.runner.in_flight.is_empty());
        assert!(h.runner.domain_locks.is_empty());
    }

    #[tokio::test]
    async fn test_cached_completion_stores_no_report() {
        let h = harness(StubCrawler::new()).await;

        let fresh = h.runner.run_audit(ctx("1"), payload("a", false)).await.unwrap();
        let cached = h.runner.run_audit(ctx("2"), payload("b", false)).await.unwrap();
        assert!(cached.outcome.cached);
        assert_eq!(h.crawler.calls(), 1);

        let fresh_row = h.audits.get_by_id(fresh.audit_id.unwrap()).await.unwrap().unwrap();
        assert!(fresh_row.report_data.is_some());
        let cached_row = h.audits.get_by_id(cached.audit_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(cached_row.status, AuditStatus::Completed);
        assert!(cached_row.report_data.is_none());
        assert!(cached_row.score.is_some());

        let source = h
            .audits
            .find_most_recent_by_domain("https://example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.id, fresh_row.id);
    }
}
