//! Application lifecycle management.
//!
//! Builds the long-lived services (database pool, crawler, job queue) from
//! configuration and tears them down in order.

use std::sync::Arc;

use anyhow::Context;
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db;
use crate::repository::sqlite::{SqliteAuditRepository, SqliteUsageRepository};
use crate::service::crawler::{Crawler, HttpCrawler};
use crate::service::executor::{AuditExecutor, ExecutorDeps};
use crate::service::queue::{JobHandlers, JobQueue};
use crate::service::{AuditJobRunner, SessionStore};
use crate::storage::{AuditStateLayout, JsonStateLoader};

pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn,site_audit=debug";

/// Initialize logging with tracing_subscriber. `log` records are bridged in.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .with_ansi(true)
        .try_init();
}

/// Everything the process shares between callers.
pub struct AppServices {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub sessions: SessionStore,
    pub queue: JobQueue,
    executor_deps: ExecutorDeps,
}

/// Initializes:
/// - Database connection pool (with migrations)
/// - HTTP crawler and state directory layout
/// - Audit job runner and the job queue that drives it
pub async fn setup(config: AppConfig) -> anyhow::Result<AppServices> {
    let pool = db::init_db(&config.database_url).await?;

    tokio::fs::create_dir_all(&config.state_dir)
        .await
        .with_context(|| format!("failed to create state dir {}", config.state_dir.display()))?;
    let layout = AuditStateLayout::new(&config.state_dir);
    let state_loader = Arc::new(JsonStateLoader);

    let crawler: Arc<dyn Crawler> = Arc::new(HttpCrawler::new(
        config.crawler.clone(),
        layout.clone(),
        state_loader.clone(),
        config.page_store.clone(),
    )?);

    let sessions = SessionStore::new();
    let executor_deps = ExecutorDeps {
        crawler,
        state_loader,
        audits: Arc::new(SqliteAuditRepository::new(pool.clone())),
        sessions: sessions.clone(),
        layout,
        page_store_config: config.page_store.clone(),
        config: config.executor.clone(),
    };

    let runner = AuditJobRunner::new(
        executor_deps.clone(),
        Arc::new(SqliteUsageRepository::new(pool.clone())),
    );
    let queue = JobQueue::new(
        JobHandlers {
            run_audit: Arc::new(runner),
        },
        config.queue.clone(),
    );

    log::info!(
        "Services ready (state dir {}, {} concurrent jobs)",
        config.state_dir.display(),
        config.queue.max_concurrent_jobs
    );
    Ok(AppServices {
        config,
        pool,
        sessions,
        queue,
        executor_deps,
    })
}

impl AppServices {
    /// A standalone executor over the shared collaborators, for state
    /// inspection and cleanup outside the queue.
    pub fn executor(&self) -> AuditExecutor {
        AuditExecutor::new(self.executor_deps.clone())
    }

    /// Stop admitting jobs, let in-flight ones finish, then release
    /// connections.
    pub async fn shutdown(&self) {
        log::info!("Shutting down job queue...");
        self.queue.pause();
        self.queue.wait_idle().await;

        self.executor().cleanup_connections().await;
        self.pool.close().await;
        log::info!("Shutdown complete");
    }
}
