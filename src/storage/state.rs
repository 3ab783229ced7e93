//! Crawl-state checkpoints.
//!
//! The crawler writes a `state.json` checkpoint into its run directory as it
//! goes; resuming a crawl (or reloading it for reporting) reads it back into
//! in-memory containers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::PageStore;
use crate::domain::models::{BadRequest, CrawlStats, ExternalLink};
use crate::error::{AppError, Result};

pub const STATE_FORMAT_VERSION: u32 = 2;

/// Mutable crawl containers, filled in place by a [`StateLoader`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStateContainers {
    pub visited: BTreeSet<String>,
    pub queue: VecDeque<String>,
    pub stats: CrawlStats,
    pub bad_requests: BTreeMap<String, BadRequest>,
    pub external_links: BTreeMap<String, ExternalLink>,
    pub mailto_links: BTreeSet<String>,
    pub tel_links: BTreeSet<String>,
}

/// On-disk checkpoint format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlStateFile {
    #[serde(default)]
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub stats: CrawlStats,
    #[serde(default)]
    pub bad_requests: BTreeMap<String, BadRequest>,
    #[serde(default)]
    pub external_links: BTreeMap<String, ExternalLink>,
    #[serde(default)]
    pub mailto_links: Vec<String>,
    #[serde(default)]
    pub tel_links: Vec<String>,
    /// Version 1 checkpoints kept page data inline. Loading moves it into
    /// the page store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_data: Option<BTreeMap<String, serde_json::Value>>,
}

impl CrawlStateFile {
    pub fn from_containers(containers: &CrawlStateContainers) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            saved_at: Utc::now(),
            visited: containers.visited.iter().cloned().collect(),
            queue: containers.queue.iter().cloned().collect(),
            stats: containers.stats.clone(),
            bad_requests: containers.bad_requests.clone(),
            external_links: containers.external_links.clone(),
            mailto_links: containers.mailto_links.iter().cloned().collect(),
            tel_links: containers.tel_links.iter().cloned().collect(),
            page_data: None,
        }
    }
}

#[async_trait]
pub trait StateLoader: Send + Sync {
    /// Populate `containers` from `state_file`. Returns `Ok(false)` when the
    /// file does not exist.
    async fn load_state(
        &self,
        state_file: &Path,
        containers: &mut CrawlStateContainers,
        page_store: &PageStore,
    ) -> Result<bool>;

    async fn save_state(&self, state_file: &Path, containers: &CrawlStateContainers) -> Result<()>;
}

/// JSON checkpoint files on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct JsonStateLoader;

#[async_trait]
impl StateLoader for JsonStateLoader {
    async fn load_state(
        &self,
        state_file: &Path,
        containers: &mut CrawlStateContainers,
        page_store: &PageStore,
    ) -> Result<bool> {
        let bytes = match fs::read(state_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let file: CrawlStateFile = serde_json::from_slice(&bytes)?;

        containers.visited.extend(file.visited);
        containers.queue.extend(file.queue);
        containers.stats = file.stats;
        containers.bad_requests.extend(file.bad_requests);
        containers.external_links.extend(file.external_links);
        containers.mailto_links.extend(file.mailto_links);
        containers.tel_links.extend(file.tel_links);

        if let Some(inline) = file.page_data {
            log::info!(
                "[STATE] Moving {} inline page entries from {} into the page store",
                inline.len(),
                state_file.display()
            );
            for (url, value) in inline {
                page_store.set(&url, &value).await.map_err(AppError::from)?;
            }
        }

        log::debug!(
            "[STATE] Loaded checkpoint {} ({} visited, {} queued)",
            state_file.display(),
            containers.visited.len(),
            containers.queue.len()
        );
        Ok(true)
    }

    async fn save_state(&self, state_file: &Path, containers: &CrawlStateContainers) -> Result<()> {
        if let Some(parent) = state_file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&CrawlStateFile::from_containers(containers))?;

        let tmp = state_file.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, state_file).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageStoreConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_containers() -> CrawlStateContainers {
        let mut c = CrawlStateContainers::default();
        c.visited.insert("https://example.com/".into());
        c.queue.push_back("https://example.com/next".into());
        c.stats.pages_crawled = 1;
        c.mailto_links.insert("mailto:hi@example.com".into());
        c.bad_requests.insert(
            "https://example.com/gone".into(),
            BadRequest {
                url: "https://example.com/gone".into(),
                status: Some(404),
                error: None,
                referrers: vec!["https://example.com/".into()],
            },
        );
        c
    }

    #[tokio::test]
    async fn save_then_load_restores_containers() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("run-1").join("state.json");
        let store = PageStore::new(dir.path().join("pages"), PageStoreConfig::default());
        let loader = JsonStateLoader;

        let original = sample_containers();
        loader.save_state(&state_file, &original).await.unwrap();

        let mut restored = CrawlStateContainers::default();
        assert!(loader.load_state(&state_file, &mut restored, &store).await.unwrap());
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn missing_file_reports_false() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::new(dir.path(), PageStoreConfig::default());
        let mut containers = CrawlStateContainers::default();
        let found = JsonStateLoader
            .load_state(&dir.path().join("nope.json"), &mut containers, &store)
            .await
            .unwrap();
        assert!(!found);
        assert!(containers.visited.is_empty());
    }

    #[tokio::test]
    async fn inline_page_data_moves_into_store() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state.json");
        let legacy = json!({
            "version": 1,
            "saved_at": "2026-01-01T00:00:00Z",
            "visited": ["https://example.com/"],
            "page_data": { "https://example.com/": { "title": "Home" } }
        });
        std::fs::write(&state_file, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let store = PageStore::new(dir.path().join("pages"), PageStoreConfig::default());
        let mut containers = CrawlStateContainers::default();
        JsonStateLoader
            .load_state(&state_file, &mut containers, &store)
            .await
            .unwrap();

        store.clear_memory();
        assert_eq!(store.get("https://example.com/").await.unwrap()["title"], "Home");
    }
}
