//! Report assembly from a finished crawl.

use chrono::Utc;

use crate::domain::models::{CrawlState, ReportType, Severity};
use crate::domain::report::{
    AuditMetrics, FullReport, IssueKind, ReportData, ReportSummary, SimpleReport, TopIssue,
};

pub const DEFAULT_TOP_ISSUES: usize = 8;
/// Cap on the issue list carried in a report.
pub const MAX_REPORT_ISSUES: usize = 100;

/// Every issue in the crawl, broken internal links first, then broken
/// external links, then page issues by severity.
fn ranked_issues(state: &CrawlState) -> Vec<TopIssue> {
    let mut issues: Vec<TopIssue> = state
        .bad_requests
        .values()
        .map(|bad| TopIssue {
            kind: IssueKind::BrokenInternalLink,
            severity: Severity::High,
            url: bad.url.clone(),
            message: match (bad.status, &bad.error) {
                (Some(status), _) => format!("Internal link returns HTTP {}", status),
                (None, Some(error)) => format!("Internal link failed to load: {}", error),
                (None, None) => "Internal link failed to load".to_string(),
            },
        })
        .collect();

    issues.extend(
        state
            .external_links
            .values()
            .filter(|link| link.is_broken())
            .map(|link| TopIssue {
                kind: IssueKind::BrokenExternalLink,
                severity: Severity::Medium,
                url: link.url.clone(),
                message: match (link.status, &link.error) {
                    (Some(status), _) => format!("External link returns HTTP {}", status),
                    (None, Some(error)) => format!("External link failed: {}", error),
                    (None, None) => "External link failed".to_string(),
                },
            }),
    );

    let mut page_issues: Vec<TopIssue> = state
        .pages
        .iter()
        .flat_map(|page| {
            page.issues.iter().map(|issue| TopIssue {
                kind: IssueKind::PageIssue,
                severity: issue.severity,
                url: page.url.clone(),
                message: issue.message.clone(),
            })
        })
        .collect();
    page_issues.sort_by_key(|issue| issue.severity.rank());
    issues.extend(page_issues);

    issues
}

pub fn extract_top_issues(state: &CrawlState, limit: usize) -> Vec<TopIssue> {
    let mut issues = ranked_issues(state);
    issues.truncate(limit);
    issues
}

fn summarize(state: &CrawlState, issues: &[TopIssue]) -> ReportSummary {
    let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count() as u32;
    let (high, medium, low) = (count(Severity::High), count(Severity::Medium), count(Severity::Low));

    ReportSummary {
        pages_scanned: state.visited.len() as u32,
        internal_links: state.stats.internal_links,
        external_links: state.external_links.len() as u32,
        external_links_checked: state.external_links.values().filter(|l| l.is_checked()).count() as u32,
        broken_internal_links: state.bad_requests.len() as u32,
        broken_external_links: state.external_links.values().filter(|l| l.is_broken()).count() as u32,
        total_issues: issues.len() as u32,
        high_issues: high,
        medium_issues: medium,
        low_issues: low,
        score: state.score.unwrap_or_else(|| compute_score(high, medium, low)),
    }
}

/// Penalty score used when the crawler did not score pages itself.
pub fn compute_score(high: u32, medium: u32, low: u32) -> u8 {
    let penalty = (5 * high + 2 * medium + low).min(100);
    (100 - penalty) as u8
}

pub fn generate_simple_report(state: &CrawlState) -> SimpleReport {
    let mut issues = ranked_issues(state);
    let summary = summarize(state, &issues);
    issues.truncate(MAX_REPORT_ISSUES);
    let top_issues = issues.iter().take(DEFAULT_TOP_ISSUES).cloned().collect();

    SimpleReport {
        domain: state.domain.clone(),
        generated_at: Utc::now(),
        summary,
        top_issues,
        issues,
    }
}

pub fn generate_full_report(state: &CrawlState) -> FullReport {
    FullReport {
        simple: generate_simple_report(state),
        pages: state.pages.clone(),
    }
}

pub fn build_report(state: &CrawlState, report_type: ReportType) -> ReportData {
    match report_type {
        ReportType::Simple => ReportData::Simple(generate_simple_report(state)),
        ReportType::Full => ReportData::Full(generate_full_report(state)),
    }
}

pub fn metrics_for(report: &ReportData, duration_ms: u64) -> AuditMetrics {
    let summary = report.summary();
    AuditMetrics {
        pages_scanned: summary.pages_scanned,
        internal_links: summary.internal_links,
        external_links_checked: summary.external_links_checked,
        broken_links: summary.broken_internal_links + summary.broken_external_links,
        duration_ms,
        score: summary.score,
    }
}
