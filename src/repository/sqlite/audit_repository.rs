//! Audit repository.
//!
//! One row per crawl-and-score run. Timestamps are stored as RFC 3339 text,
//! JSON columns (`config`, `report_data`) as serialized strings.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::parse_datetime;
use crate::domain::models::{
    map_audit_status, map_report_type, AuditRecord, AuditStatus, AuditUpdate, NewAudit,
};
use crate::error::Result;
use crate::repository::AuditRepository;

const AUDIT_COLUMNS: &str = r#"
    id, user_id, url, audit_type, status, report_data, score, duration_ms,
    pages_scanned, external_links_checked, error_message, created_at, updated_at
"#;

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn create(&self, audit: NewAudit) -> Result<AuditRecord> {
        let now = Utc::now().to_rfc3339();
        let config = serde_json::to_string(&audit.config)?;

        let result = sqlx::query(
            r#"
            INSERT INTO audits (user_id, url, audit_type, status, config, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)
            "#,
        )
        .bind(audit.user_id)
        .bind(&audit.url)
        .bind(audit.audit_type.as_str())
        .bind(config)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        log::info!("Created audit {} for URL: {}", id, audit.url);

        self.get_by_id(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("audit {} vanished after insert", id).into())
    }

    async fn update_status(&self, id: i64, status: AuditStatus, fields: AuditUpdate) -> Result<()> {
        let report_data = fields
            .report_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            UPDATE audits SET
                status = ?1,
                report_data = COALESCE(?2, report_data),
                score = COALESCE(?3, score),
                duration_ms = COALESCE(?4, duration_ms),
                pages_scanned = COALESCE(?5, pages_scanned),
                external_links_checked = COALESCE(?6, external_links_checked),
                error_message = COALESCE(?7, error_message),
                updated_at = ?8
            WHERE id = ?9
            "#,
        )
        .bind(status.as_str())
        .bind(report_data)
        .bind(fields.score)
        .bind(fields.duration_ms)
        .bind(fields.pages_scanned)
        .bind(fields.external_links_checked)
        .bind(fields.error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        log::debug!("Audit {} -> {}", id, status.as_str());
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AuditRecord>> {
        let row = sqlx::query(&format!("SELECT {AUDIT_COLUMNS} FROM audits WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_audit_row).transpose()
    }

    async fn find_most_recent_by_domain(&self, url: &str) -> Result<Option<AuditRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {AUDIT_COLUMNS}
            FROM audits
            WHERE url = ? AND status = 'completed' AND report_data IS NOT NULL
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_audit_row).transpose()
    }
}

fn map_audit_row(row: &SqliteRow) -> Result<AuditRecord> {
    let report_data: Option<String> = row.try_get("report_data")?;
    let report_data: Option<serde_json::Value> = report_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(AuditRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        url: row.try_get("url")?,
        audit_type: map_report_type(&row.try_get::<String, _>("audit_type")?),
        status: map_audit_status(&row.try_get::<String, _>("status")?),
        report_data,
        score: row.try_get("score")?,
        duration_ms: row.try_get("duration_ms")?,
        pages_scanned: row.try_get("pages_scanned")?,
        external_links_checked: row.try_get("external_links_checked")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_datetime(&row.try_get::<String, _>("created_at")?),
        updated_at: parse_datetime(&row.try_get::<String, _>("updated_at")?),
    })
}
