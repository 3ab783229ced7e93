use async_trait::async_trait;

use crate::domain::models::{AuditRecord, AuditStatus, AuditUpdate, NewAudit, UsageRecord};
use crate::error::Result;

pub mod sqlite;

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn create(&self, audit: NewAudit) -> Result<AuditRecord>;
    async fn update_status(&self, id: i64, status: AuditStatus, fields: AuditUpdate) -> Result<()>;
    async fn get_by_id(&self, id: i64) -> Result<Option<AuditRecord>>;
    /// Newest completed audit for `url` that has report data.
    async fn find_most_recent_by_domain(&self, url: &str) -> Result<Option<AuditRecord>>;
}

#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record_audit_usage(&self, user_id: i64, usage: UsageRecord) -> Result<()>;
}
