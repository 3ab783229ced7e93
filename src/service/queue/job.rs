//! Job model, lifecycle events and handler dispatch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{ReportType, UserLimits};
use crate::error::Result;
use crate::events::EventBus;
use crate::service::executor::AuditOutcome;

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    RunAudit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum JobPayload {
    RunAudit(RunAuditPayload),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::RunAudit(_) => JobKind::RunAudit,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            JobPayload::RunAudit(p) => p.session_id.as_deref(),
        }
    }
}

/// Input for one audit job. Validated by the handler, not on enqueue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAuditPayload {
    pub domain: String,
    pub max_pages: Option<i64>,
    #[serde(default)]
    pub force_new: bool,
    pub session_id: Option<String>,
    pub user_id: Option<i64>,
    #[serde(default)]
    pub report_type: ReportType,
    pub user_limits: Option<UserLimits>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Last failure message, kept across retries.
    pub error: Option<String>,
    pub result: Option<JobOutput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditJobOutcome {
    /// Persisted audit row, when the runner created one.
    pub audit_id: Option<i64>,
    pub outcome: AuditOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "output")]
pub enum JobOutput {
    Audit(AuditJobOutcome),
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Falls back to the queue's configured default.
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub is_paused: bool,
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Added { job_id: JobId, kind: JobKind },
    Active { job_id: JobId, attempt: u32 },
    Completed { job_id: JobId, result: JobOutput },
    Retrying { job_id: JobId, attempt: u32, error: String },
    Failed { job_id: JobId, attempts: u32, error: String },
    Removed { job_id: JobId },
    Cleaned { count: usize },
    Paused,
    Resumed,
    Progress {
        job_id: JobId,
        session_id: Option<String>,
        progress: u8,
        message: String,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::Added { job_id, .. }
            | QueueEvent::Active { job_id, .. }
            | QueueEvent::Completed { job_id, .. }
            | QueueEvent::Retrying { job_id, .. }
            | QueueEvent::Failed { job_id, .. }
            | QueueEvent::Removed { job_id }
            | QueueEvent::Progress { job_id, .. } => Some(job_id),
            QueueEvent::Cleaned { .. } | QueueEvent::Paused | QueueEvent::Resumed => None,
        }
    }
}

/// Handed to a handler for the duration of one attempt.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub attempt: u32,
    events: EventBus<QueueEvent>,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, attempt: u32, events: EventBus<QueueEvent>) -> Self {
        Self {
            job_id,
            attempt,
            events,
        }
    }

    pub fn report_progress(&self, session_id: Option<&str>, progress: u8, message: impl Into<String>) {
        self.events.emit(&QueueEvent::Progress {
            job_id: self.job_id.clone(),
            session_id: session_id.map(str::to_string),
            progress: progress.min(100),
            message: message.into(),
        });
    }
}

#[async_trait]
pub trait RunAuditHandler: Send + Sync {
    async fn run_audit(&self, ctx: JobContext, payload: RunAuditPayload) -> Result<AuditJobOutcome>;

    /// Called once an attempt has been aborted for overrunning the queue
    /// deadline. The aborted `run_audit` future never reaches its own
    /// failure handling, so state it left behind is settled here.
    async fn on_timeout(&self, _ctx: JobContext, _payload: RunAuditPayload, _limit: Duration) {}
}

/// One handler per [`JobKind`].
#[derive(Clone)]
pub struct JobHandlers {
    pub run_audit: Arc<dyn RunAuditHandler>,
}

impl JobHandlers {
    pub async fn dispatch(&self, ctx: JobContext, payload: JobPayload) -> Result<JobOutput> {
        match payload {
            JobPayload::RunAudit(payload) => self
                .run_audit
                .run_audit(ctx, payload)
                .await
                .map(JobOutput::Audit),
        }
    }

    pub async fn on_timeout(&self, ctx: JobContext, payload: JobPayload, limit: Duration) {
        match payload {
            JobPayload::RunAudit(payload) => self.run_audit.on_timeout(ctx, payload, limit).await,
        }
    }
}
