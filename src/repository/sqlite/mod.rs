mod audit_repository;
mod usage_repository;

pub use audit_repository::SqliteAuditRepository;
pub use usage_repository::SqliteUsageRepository;

use chrono::{DateTime, Utc};

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AuditStatus, AuditUpdate, NewAudit, ReportType, UsageRecord};
    use crate::repository::{AuditRepository, UsageRecorder};
    use crate::test_utils::fixtures;
    use serde_json::json;

    fn new_audit(url: &str) -> NewAudit {
        NewAudit {
            user_id: Some(7),
            url: url.to_string(),
            audit_type: ReportType::Simple,
            config: json!({ "max_pages": 5 }),
        }
    }

    #[tokio::test]
    async fn test_audit_lifecycle() {
        let pool = fixtures::setup_test_db().await;
        let repo = SqliteAuditRepository::new(pool.clone());

        // 1. Create
        let audit = repo.create(new_audit("https://example.com")).await.unwrap();
        assert_eq!(audit.status, AuditStatus::Pending);
        assert_eq!(audit.user_id, Some(7));

        // 2. Running
        repo.update_status(audit.id, AuditStatus::Running, AuditUpdate::default())
            .await
            .unwrap();
        let running = repo.get_by_id(audit.id).await.unwrap().unwrap();
        assert_eq!(running.status, AuditStatus::Running);
        assert!(running.report_data.is_none());

        // 3. Complete with report
        repo.update_status(
            audit.id,
            AuditStatus::Completed,
            AuditUpdate {
                report_data: Some(json!({ "ok": true })),
                score: Some(88),
                pages_scanned: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let done = repo.get_by_id(audit.id).await.unwrap().unwrap();
        assert_eq!(done.status, AuditStatus::Completed);
        assert_eq!(done.score, Some(88));
        assert_eq!(done.pages_scanned, Some(3));
        assert_eq!(done.report_data, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn test_most_recent_requires_report_data() {
        let pool = fixtures::setup_test_db().await;
        let repo = SqliteAuditRepository::new(pool.clone());

        let with_report = repo.create(new_audit("https://example.com")).await.unwrap();
        repo.update_status(
            with_report.id,
            AuditStatus::Completed,
            AuditUpdate {
                report_data: Some(json!({ "n": 1 })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Newer, completed, but without report data: must be skipped.
        let bare = repo.create(new_audit("https://example.com")).await.unwrap();
        repo.update_status(bare.id, AuditStatus::Completed, AuditUpdate::default())
            .await
            .unwrap();

        let found = repo
            .find_most_recent_by_domain("https://example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, with_report.id);

        assert!(repo
            .find_most_recent_by_domain("https://other.test")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_usage_is_recorded() {
        let pool = fixtures::setup_test_db().await;
        let usage = SqliteUsageRepository::new(pool.clone());

        usage
            .record_audit_usage(
                42,
                UsageRecord {
                    audit_id: 1,
                    pages_scanned: 10,
                    external_links_checked: 4,
                    score: 90,
                    url: "https://example.com".into(),
                    report_type: ReportType::Full,
                    duration_ms: 1200,
                },
            )
            .await
            .unwrap();

        assert_eq!(usage.pages_scanned_by(42).await.unwrap(), 10);
        assert_eq!(usage.pages_scanned_by(1).await.unwrap(), 0);
    }
}
