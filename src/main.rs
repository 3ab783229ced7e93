// src/main.rs

use anyhow::{bail, Context};
use clap::Parser;

use site_audit::config::AppConfig;
use site_audit::domain::models::ReportType;
use site_audit::lifecycle;
use site_audit::service::queue::{AddOptions, JobOutput, JobPayload, JobStatus, QueueEvent, RunAuditPayload};

/// Crawl a site and print its audit report as JSON.
#[derive(Debug, Parser)]
#[command(name = "site-audit", version, about)]
struct Cli {
    /// Domain or URL to audit
    domain: String,

    /// Maximum number of pages to crawl (1-1000)
    #[arg(long, default_value_t = 50)]
    max_pages: i64,

    /// Ignore cached results and interrupted crawls
    #[arg(long)]
    force_new: bool,

    /// Include per-page detail in the report
    #[arg(long)]
    full: bool,

    /// Record usage against this user id
    #[arg(long)]
    user_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    lifecycle::init_logging();

    let services = lifecycle::setup(AppConfig::from_env()).await?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let _progress = services.queue.on(|event| match event {
        QueueEvent::Progress { job_id, progress, message, .. } => {
            log::info!("[job {}] {}% {}", job_id, progress, message)
        }
        QueueEvent::Retrying { job_id, attempt, error } => {
            log::warn!("[job {}] attempt {} failed: {}", job_id, attempt, error)
        }
        _ => {}
    });

    let job_id = services.queue.add(
        JobPayload::RunAudit(RunAuditPayload {
            domain: cli.domain,
            max_pages: Some(cli.max_pages),
            force_new: cli.force_new,
            session_id: Some(session_id),
            user_id: cli.user_id,
            report_type: if cli.full { ReportType::Full } else { ReportType::Simple },
            user_limits: None,
        }),
        AddOptions::default(),
    );

    services.queue.wait_idle().await;
    let job = services
        .queue
        .get_job(&job_id)
        .context("job disappeared from the queue")?;
    services.shutdown().await;

    match (job.status, job.result) {
        (JobStatus::Completed, Some(JobOutput::Audit(done))) => {
            if done.outcome.cached {
                log::info!("Served from cache ({}ms old)", done.outcome.cache_age_ms.unwrap_or(0));
            }
            println!("{}", serde_json::to_string_pretty(&done.outcome.report_data)?);
            Ok(())
        }
        (status, _) => bail!(
            "audit job {} ended {:?}: {}",
            job_id,
            status,
            job.error.unwrap_or_else(|| "no error recorded".to_string())
        ),
    }
}
