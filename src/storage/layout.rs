//! Directory layout for crawl artifacts:
//!
//! ```text
//! <root>/<domain-key>/run-<unix_millis>/state.json
//! <root>/<domain-key>/run-<unix_millis>/page-data/<base64url>.json[.gz]
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::fs;
use url::Url;

pub const STATE_FILE_NAME: &str = "state.json";
pub const PAGE_DATA_DIR: &str = "page-data";

#[derive(Debug, Clone)]
pub struct AuditStateLayout {
    root: PathBuf,
}

impl AuditStateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain_key(domain))
    }

    /// A fresh run directory path (not created).
    pub fn new_run_dir(&self, domain: &str) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        self.domain_dir(domain).join(format!("run-{millis}"))
    }

    /// Newest `run-<millis>` directory for the domain, if any.
    pub async fn latest_run_dir(&self, domain: &str) -> std::io::Result<Option<PathBuf>> {
        static RUN_DIR: OnceLock<Regex> = OnceLock::new();
        let pattern = RUN_DIR.get_or_init(|| Regex::new(r"^run-(\d+)$").expect("valid regex"));

        let mut entries = match fs::read_dir(self.domain_dir(domain)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut newest: Option<(u64, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(stamp) = name
                .to_str()
                .and_then(|n| pattern.captures(n))
                .and_then(|c| c[1].parse::<u64>().ok())
            else {
                continue;
            };
            if newest.as_ref().is_none_or(|(best, _)| stamp > *best) {
                newest = Some((stamp, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    pub fn state_file(run_dir: &Path) -> PathBuf {
        run_dir.join(STATE_FILE_NAME)
    }

    pub fn page_data_dir(run_dir: &Path) -> PathBuf {
        run_dir.join(PAGE_DATA_DIR)
    }
}

/// Filesystem-safe directory name for an origin: scheme, host and any
/// non-default port (`https_example.com`, `http_example.com_8080`), so two
/// origins on one host never share run directories. Input that does not
/// parse as a URL with a host is used as is. Anything outside
/// `[A-Za-z0-9.-]` becomes `_`.
pub fn domain_key(domain: &str) -> String {
    let origin = Url::parse(domain).ok().and_then(|u| {
        u.host_str().map(|host| match u.port() {
            Some(port) => format!("{}_{}_{}", u.scheme(), host, port),
            None => format!("{}_{}", u.scheme(), host),
        })
    });
    let key = origin.unwrap_or_else(|| domain.trim().to_string());

    key.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn domain_key_separates_scheme_and_port() {
        assert_eq!(domain_key("https://Example.com/path?x=1"), "https_example.com");
        assert_eq!(domain_key("https://example.com:443"), "https_example.com");
        assert_eq!(domain_key("http://example.com:8080"), "http_example.com_8080");
        assert_ne!(domain_key("http://example.com"), domain_key("https://example.com"));
        assert_eq!(domain_key("example.com:8080"), "example.com_8080");
    }

    #[tokio::test]
    async fn latest_run_dir_picks_highest_stamp() {
        let dir = TempDir::new().unwrap();
        let layout = AuditStateLayout::new(dir.path());
        let domain = "https://example.com";
        assert!(layout.latest_run_dir(domain).await.unwrap().is_none());

        let base = layout.domain_dir(domain);
        for name in ["run-900", "run-1200", "notes", "run-abc"] {
            std::fs::create_dir_all(base.join(name)).unwrap();
        }
        std::fs::write(base.join("run-99999"), b"file, not dir").unwrap();

        let latest = layout.latest_run_dir(domain).await.unwrap().unwrap();
        assert_eq!(latest, base.join("run-1200"));
    }
}
