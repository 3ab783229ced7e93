//! Domain entities shared by the queue, the executor and the collaborators.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ====== Enums ======

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Lower rank sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::High => 0,
            Severity::Medium => 1,
            Severity::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[default]
    Simple,
    Full,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Simple => "simple",
            ReportType::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Running => "running",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }
}

pub fn map_audit_status(s: &str) -> AuditStatus {
    match s {
        "pending" => AuditStatus::Pending,
        "running" => AuditStatus::Running,
        "completed" => AuditStatus::Completed,
        "failed" => AuditStatus::Failed,
        _ => AuditStatus::Pending,
    }
}

pub fn map_report_type(s: &str) -> ReportType {
    match s {
        "full" => ReportType::Full,
        _ => ReportType::Simple,
    }
}

// ====== Audit persistence ======

/// A persisted crawl-and-score run for a domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub url: String,
    pub audit_type: ReportType,
    pub status: AuditStatus,
    pub report_data: Option<serde_json::Value>,
    pub score: Option<i64>,
    pub duration_ms: Option<i64>,
    pub pages_scanned: Option<i64>,
    pub external_links_checked: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAudit {
    pub user_id: Option<i64>,
    pub url: String,
    pub audit_type: ReportType,
    pub config: serde_json::Value,
}

/// Fields written alongside a status change. `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct AuditUpdate {
    pub report_data: Option<serde_json::Value>,
    pub score: Option<i64>,
    pub duration_ms: Option<i64>,
    pub pages_scanned: Option<i64>,
    pub external_links_checked: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub audit_id: i64,
    pub pages_scanned: i64,
    pub external_links_checked: i64,
    pub score: i64,
    pub url: String,
    pub report_type: ReportType,
    pub duration_ms: i64,
}

/// Per-user caps supplied by the caller (tier logic lives elsewhere).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLimits {
    pub max_pages: Option<u32>,
    pub max_external_links: Option<u32>,
}

// ====== Crawl state ======

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub bad_requests: u32,
    pub bytes_downloaded: u64,
}

/// An internal URL that answered with an error status or failed to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadRequest {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    #[serde(default)]
    pub referrers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ExternalLink {
    pub fn unchecked(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: None,
            error: None,
            sources: Vec::new(),
        }
    }

    pub fn is_checked(&self) -> bool {
        self.status.is_some() || self.error.is_some()
    }

    pub fn is_broken(&self) -> bool {
        self.error.is_some() || self.status.is_some_and(|s| s >= 400)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

impl PageIssue {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
        }
    }
}

/// Per-page result as stored in the page store and returned by the crawler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub word_count: u32,
    pub load_time_ms: u64,
    #[serde(default)]
    pub issues: Vec<PageIssue>,
    pub score: Option<u8>,
}

/// Everything a report is derived from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    pub domain: String,
    pub visited: BTreeSet<String>,
    pub stats: CrawlStats,
    pub bad_requests: BTreeMap<String, BadRequest>,
    pub external_links: BTreeMap<String, ExternalLink>,
    pub pages: Vec<PageSummary>,
    /// Average page score reported by the crawler, if it scored pages.
    pub score: Option<u8>,
}
