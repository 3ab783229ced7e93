//! Report shapes returned by the executor and persisted as `report_data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{PageSummary, ReportType, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BrokenInternalLink,
    BrokenExternalLink,
    PageIssue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub pages_scanned: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub external_links_checked: u32,
    pub broken_internal_links: u32,
    pub broken_external_links: u32,
    pub total_issues: u32,
    pub high_issues: u32,
    pub medium_issues: u32,
    pub low_issues: u32,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleReport {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub top_issues: Vec<TopIssue>,
    pub issues: Vec<TopIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullReport {
    #[serde(flatten)]
    pub simple: SimpleReport,
    pub pages: Vec<PageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report_type", rename_all = "lowercase")]
pub enum ReportData {
    Simple(SimpleReport),
    Full(FullReport),
}

impl ReportData {
    pub fn summary(&self) -> &ReportSummary {
        match self {
            ReportData::Simple(r) => &r.summary,
            ReportData::Full(r) => &r.simple.summary,
        }
    }

    pub fn report_type(&self) -> ReportType {
        match self {
            ReportData::Simple(_) => ReportType::Simple,
            ReportData::Full(_) => ReportType::Full,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditMetrics {
    pub pages_scanned: u32,
    pub internal_links: u32,
    pub external_links_checked: u32,
    pub broken_links: u32,
    pub duration_ms: u64,
    pub score: u8,
}
