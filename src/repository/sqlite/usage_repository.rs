use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::models::UsageRecord;
use crate::error::Result;
use crate::repository::UsageRecorder;

pub struct SqliteUsageRepository {
    pool: SqlitePool,
}

impl SqliteUsageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Total pages scanned across all recorded audits for a user.
    pub async fn pages_scanned_by(&self, user_id: i64) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(pages_scanned), 0) FROM usage_events WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

#[async_trait]
impl UsageRecorder for SqliteUsageRepository {
    async fn record_audit_usage(&self, user_id: i64, usage: UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_events (
                user_id, audit_id, pages_scanned, external_links_checked,
                score, url, report_type, duration_ms, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(user_id)
        .bind(usage.audit_id)
        .bind(usage.pages_scanned)
        .bind(usage.external_links_checked)
        .bind(usage.score)
        .bind(&usage.url)
        .bind(usage.report_type.as_str())
        .bind(usage.duration_ms)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        log::debug!(
            "Recorded usage for user {}: audit {} ({} pages)",
            user_id,
            usage.audit_id,
            usage.pages_scanned
        );
        Ok(())
    }
}
