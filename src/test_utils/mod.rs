//! Shared test utilities and fixtures

#[cfg(test)]
pub mod fixtures {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use tokio::sync::Notify;

    use crate::domain::models::{CrawlState, PageIssue, PageSummary, ReportType, Severity};
    use crate::error::{AppError, Result};
    use crate::events::EventBus;
    use crate::service::crawler::{CrawlOutput, CrawlProgress, CrawlRequest, CrawlSummary, Crawler};
    use crate::service::executor::{build_report, AuditOutcome};
    use crate::service::queue::AuditJobOutcome;
    use crate::service::session::SessionStatus;

    /// Creates an in-memory SQLite database with migrations applied
    pub async fn setup_test_db() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::migrate!()
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    /// A completed, uncached outcome for an empty crawl.
    pub fn sample_job_outcome() -> AuditJobOutcome {
        let report_data = build_report(&CrawlState::default(), ReportType::Simple);
        AuditJobOutcome {
            audit_id: None,
            outcome: AuditOutcome {
                audit_metrics: crate::service::executor::report::metrics_for(&report_data, 0),
                report_data,
                cached: false,
                cache_age_ms: None,
            },
        }
    }

    /// Crawler double: counts calls, emits one progress event, and can be
    /// made to block until released or to fail.
    pub struct StubCrawler {
        events: EventBus<CrawlProgress>,
        calls: AtomicUsize,
        cleanups: AtomicUsize,
        gate: Option<Notify>,
        failure: Option<String>,
    }

    impl StubCrawler {
        pub fn new() -> Self {
            Self {
                events: EventBus::new(),
                calls: AtomicUsize::new(0),
                cleanups: AtomicUsize::new(0),
                gate: None,
                failure: None,
            }
        }

        /// Block each crawl until [`StubCrawler::release`] is called.
        pub fn gated(mut self) -> Self {
            self.gate = Some(Notify::new());
            self
        }

        pub fn failing(mut self, message: &str) -> Self {
            self.failure = Some(message.to_string());
            self
        }

        pub fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_one();
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn cleanups(&self) -> usize {
            self.cleanups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Crawler for StubCrawler {
        async fn run_crawl(&self, request: CrawlRequest) -> Result<CrawlOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.events.emit(&CrawlProgress {
                session_id: request.context.session_id.clone(),
                status: SessionStatus::Running,
                progress: 40,
                message: "Crawling".into(),
                current_url: Some(request.domain.clone()),
                phase: Some("crawling".into()),
            });

            if let Some(gate) = &self.gate {
                tokio::time::timeout(Duration::from_secs(5), gate.notified())
                    .await
                    .map_err(|_| AppError::network("stub crawler gate never released"))?;
            }
            if let Some(message) = &self.failure {
                return Err(AppError::network(message.clone()));
            }

            let root = format!("{}/", request.domain);
            let mut output = CrawlOutput {
                summary: CrawlSummary {
                    pages_crawled: 1,
                    duration_ms: 3,
                    resumed: false,
                    score: None,
                },
                pages: vec![PageSummary {
                    url: root.clone(),
                    status_code: Some(200),
                    issues: vec![PageIssue::new("thin_content", Severity::Low, "Only 3 words")],
                    ..Default::default()
                }],
                ..Default::default()
            };
            output.visited.insert(root);
            output.stats.pages_crawled = 1;
            Ok(output)
        }

        fn progress_events(&self) -> &EventBus<CrawlProgress> {
            &self.events
        }

        async fn cleanup_connections(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }
}
