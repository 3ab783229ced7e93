//! Per-URL page data store with size-adaptive compression.
//!
//! Every entry is persisted as exactly one artifact under the store
//! directory, named by the URL-safe base64 encoding of its URL:
//!
//! - `<key>.json`    uncompressed JSON, for payloads up to the threshold
//! - `<key>.json.gz` gzip-compressed JSON, for payloads above it
//!
//! A bounded in-memory cache sits in front of the disk. It evicts in
//! insertion order and never touches disk artifacts when it does.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use super::cache::FifoCache;
use super::PageStoreError;

const PLAIN_EXT: &str = ".json";
const COMPRESSED_EXT: &str = ".json.gz";
const TMP_EXT: &str = ".tmp";

/// Default serialized-size cutoff above which entries are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 10 * 1024;
pub const DEFAULT_MAX_ITEMS_IN_MEMORY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageStoreConfig {
    pub compression_threshold: usize,
    pub max_items_in_memory: usize,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_items_in_memory: DEFAULT_MAX_ITEMS_IN_MEMORY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompressionStats {
    pub compressed: usize,
    pub uncompressed: usize,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub errors: usize,
    /// Bytes saved on disk. Negative if gzip inflated an incompressible file.
    pub total_saved: i64,
}

type Compressor = fn(&[u8]) -> std::io::Result<Vec<u8>>;

#[derive(Debug)]
pub struct PageStore {
    dir: PathBuf,
    config: PageStoreConfig,
    cache: Mutex<FifoCache<Value>>,
    compressor: Compressor,
}

impl PageStore {
    pub fn new(dir: impl Into<PathBuf>, config: PageStoreConfig) -> Self {
        Self::with_compressor(dir, config, gzip)
    }

    fn with_compressor(dir: impl Into<PathBuf>, config: PageStoreConfig, compressor: Compressor) -> Self {
        let cache = FifoCache::new(config.max_items_in_memory);
        Self {
            dir: dir.into(),
            config,
            cache: Mutex::new(cache),
            compressor,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &PageStoreConfig {
        &self.config
    }

    /// Persist `data` for `url`, compressing when it serializes larger than
    /// the threshold. Compression failures fall back to the uncompressed
    /// form; only I/O and serialization errors are returned.
    pub async fn set<T: Serialize + ?Sized>(&self, url: &str, data: &T) -> Result<(), PageStoreError> {
        let value = serde_json::to_value(data)?;
        let serialized = serde_json::to_vec(&value)?;
        let (plain, packed) = self.artifact_paths(url);

        fs::create_dir_all(&self.dir).await?;

        if serialized.len() > self.config.compression_threshold {
            match (self.compressor)(&serialized) {
                Ok(compressed) => {
                    log::trace!(
                        "[PAGE_STORE] Compressed {} from {} to {} bytes",
                        url,
                        serialized.len(),
                        compressed.len()
                    );
                    replace_artifact(&packed, &plain, &compressed).await?;
                }
                Err(e) => {
                    log::warn!(
                        "[PAGE_STORE] Compression failed for {}, storing uncompressed: {}",
                        url,
                        e
                    );
                    replace_artifact(&plain, &packed, &serialized).await?;
                }
            }
        } else {
            replace_artifact(&plain, &packed, &serialized).await?;
        }

        self.cache_insert(url, value);
        Ok(())
    }

    /// Fetch an entry. Missing and unreadable entries both yield `None`;
    /// use [`PageStore::try_get`] to tell them apart.
    pub async fn get(&self, url: &str) -> Option<Value> {
        match self.try_get(url).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[PAGE_STORE] Dropping unreadable entry for {}: {}", url, e);
                None
            }
        }
    }

    /// Like [`PageStore::get`] but reports corrupt artifacts as
    /// [`PageStoreError::Corrupt`] instead of hiding them.
    pub async fn try_get(&self, url: &str) -> Result<Option<Value>, PageStoreError> {
        if let Some(value) = self.lock_cache().get(url) {
            return Ok(Some(value));
        }

        let value = self.load_from_disk(url).await?;
        if let Some(value) = &value {
            self.cache_insert(url, value.clone());
        }
        Ok(value)
    }

    pub async fn get_as<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        let value = self.get(url).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                log::warn!("[PAGE_STORE] Entry for {} has unexpected shape: {}", url, e);
                None
            }
        }
    }

    pub async fn has(&self, url: &str) -> bool {
        if self.lock_cache().contains(url) {
            return true;
        }
        let (plain, packed) = self.artifact_paths(url);
        exists(&packed).await || exists(&plain).await
    }

    /// Remove an entry from memory and disk. Returns whether anything existed.
    pub async fn delete(&self, url: &str) -> Result<bool, PageStoreError> {
        let in_memory = self.lock_cache().remove(url).is_some();
        let (plain, packed) = self.artifact_paths(url);
        let removed_packed = remove_if_exists(&packed).await?;
        let removed_plain = remove_if_exists(&plain).await?;
        Ok(in_memory || removed_packed || removed_plain)
    }

    /// Drop every entry from memory and disk.
    pub async fn clear(&self) -> Result<(), PageStoreError> {
        self.lock_cache().clear();
        for (path, _) in self.scan().await? {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    /// Drop the in-memory cache only; disk artifacts stay.
    pub fn clear_memory(&self) {
        self.lock_cache().clear();
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// All persisted URLs, compressed or not, sorted.
    pub async fn urls(&self) -> Result<Vec<String>, PageStoreError> {
        let mut urls: Vec<String> = self
            .scan()
            .await?
            .into_iter()
            .map(|(_, artifact)| artifact.url)
            .collect();
        urls.sort();
        urls.dedup();
        Ok(urls)
    }

    /// Every persisted entry read straight from disk, regardless of what is
    /// cached. Unreadable artifacts are logged and skipped. Not meant for hot
    /// paths: it does not populate the cache.
    pub async fn entries(&self) -> Result<Vec<(String, Value)>, PageStoreError> {
        let mut out = Vec::new();
        for url in self.urls().await? {
            match self.load_from_disk(&url).await {
                Ok(Some(value)) => out.push((url, value)),
                Ok(None) => {}
                Err(e) => log::warn!("[PAGE_STORE] Skipping {} during iteration: {}", url, e),
            }
        }
        Ok(out)
    }

    /// Compress every uncompressed artifact above the threshold in place.
    /// Smaller artifacts are left untouched.
    pub async fn migrate_to_compressed(&self) -> Result<MigrationReport, PageStoreError> {
        let mut report = MigrationReport::default();

        for (path, artifact) in self.scan().await? {
            if artifact.compressed {
                continue;
            }

            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("[PAGE_STORE] Failed to read {}: {}", path.display(), e);
                    report.errors += 1;
                    continue;
                }
            };
            if bytes.len() <= self.config.compression_threshold {
                continue;
            }

            let compressed = match (self.compressor)(&bytes) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("[PAGE_STORE] Failed to compress {}: {}", artifact.url, e);
                    report.errors += 1;
                    continue;
                }
            };

            let (_, packed) = self.artifact_paths(&artifact.url);
            match replace_artifact(&packed, &path, &compressed).await {
                Ok(()) => {
                    report.migrated += 1;
                    report.total_saved += bytes.len() as i64 - compressed.len() as i64;
                }
                Err(e) => {
                    log::warn!("[PAGE_STORE] Failed to migrate {}: {}", artifact.url, e);
                    report.errors += 1;
                }
            }
        }

        log::info!(
            "[PAGE_STORE] Migration finished: {} migrated, {} errors, {} bytes saved",
            report.migrated,
            report.errors,
            report.total_saved
        );
        Ok(report)
    }

    pub async fn compression_stats(&self) -> Result<CompressionStats, PageStoreError> {
        let mut stats = CompressionStats::default();
        for (path, artifact) in self.scan().await? {
            let size = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if artifact.compressed {
                stats.compressed += 1;
                stats.compressed_size += size;
            } else {
                stats.uncompressed += 1;
                stats.uncompressed_size += size;
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FifoCache<Value>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache_insert(&self, url: &str, value: Value) {
        if let Some(evicted) = self.lock_cache().insert(url, value) {
            log::trace!("[PAGE_STORE] Evicted {} from memory", evicted);
        }
    }

    fn artifact_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let key = encode_key(url);
        (
            self.dir.join(format!("{key}{PLAIN_EXT}")),
            self.dir.join(format!("{key}{COMPRESSED_EXT}")),
        )
    }

    /// Compressed artifact wins when present.
    async fn load_from_disk(&self, url: &str) -> Result<Option<Value>, PageStoreError> {
        let (plain, packed) = self.artifact_paths(url);

        if let Some(bytes) = read_if_exists(&packed).await? {
            let decoded = gunzip(&bytes).map_err(|e| PageStoreError::corrupt(url, e))?;
            let value = serde_json::from_slice(&decoded).map_err(|e| PageStoreError::corrupt(url, e))?;
            return Ok(Some(value));
        }

        if let Some(bytes) = read_if_exists(&plain).await? {
            let value = serde_json::from_slice(&bytes).map_err(|e| PageStoreError::corrupt(url, e))?;
            return Ok(Some(value));
        }

        Ok(None)
    }

    async fn scan(&self) -> Result<Vec<(PathBuf, Artifact)>, PageStoreError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(artifact) = Artifact::parse(name) {
                found.push((entry.path(), artifact));
            }
        }
        Ok(found)
    }
}

struct Artifact {
    url: String,
    compressed: bool,
}

impl Artifact {
    fn parse(file_name: &str) -> Option<Self> {
        let (key, compressed) = if let Some(key) = file_name.strip_suffix(COMPRESSED_EXT) {
            (key, true)
        } else if let Some(key) = file_name.strip_suffix(PLAIN_EXT) {
            (key, false)
        } else {
            return None;
        };
        decode_key(key).map(|url| Self { url, compressed })
    }
}

pub fn encode_key(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

pub fn decode_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Write `target` via a temp file, removing `sibling` before the rename so
/// the two forms never coexist on disk.
async fn replace_artifact(target: &Path, sibling: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(TMP_EXT);
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).await?;
    remove_if_exists(sibling).await?;
    fs::rename(&tmp, target).await
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn read_if_exists(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> PageStore {
        PageStore::new(dir.path().join("page-data"), PageStoreConfig::default())
    }

    fn artifact_exists(store: &PageStore, url: &str) -> (bool, bool) {
        let (plain, packed) = store.artifact_paths(url);
        (plain.exists(), packed.exists())
    }

    #[tokio::test]
    async fn large_payload_is_stored_compressed_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = "https://x.test/a";
        let payload = json!({ "content": "A".repeat(15000) });

        store.set(url, &payload).await.unwrap();
        assert_eq!(artifact_exists(&store, url), (false, true));

        store.clear_memory();
        let loaded = store.get(url).await.unwrap();
        assert_eq!(loaded, payload);
        assert_eq!(loaded["content"].as_str().unwrap().len(), 15000);
    }

    #[tokio::test]
    async fn small_payload_is_stored_uncompressed_only() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = "https://x.test/b";

        store.set(url, &json!({ "content": "small" })).await.unwrap();
        assert_eq!(artifact_exists(&store, url), (true, false));
    }

    #[tokio::test]
    async fn shrinking_payload_replaces_compressed_sibling() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = "https://x.test/c";

        store.set(url, &json!({ "content": "B".repeat(20000) })).await.unwrap();
        store.set(url, &json!({ "content": "tiny" })).await.unwrap();

        assert_eq!(artifact_exists(&store, url), (true, false));
        store.clear_memory();
        assert_eq!(store.get(url).await.unwrap()["content"], "tiny");
    }

    #[tokio::test]
    async fn compression_failure_falls_back_to_plain() {
        fn failing(_: &[u8]) -> std::io::Result<Vec<u8>> {
            Err(std::io::Error::other("encoder exploded"))
        }
        let dir = TempDir::new().unwrap();
        let store = PageStore::with_compressor(dir.path(), PageStoreConfig::default(), failing);
        let url = "https://x.test/fallback";
        let payload = json!({ "content": "C".repeat(12000) });

        store.set(url, &payload).await.unwrap();
        assert_eq!(artifact_exists(&store, url), (true, false));
        store.clear_memory();
        assert_eq!(store.get(url).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn corrupt_artifact_reads_as_none_but_try_get_reports_it() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let url = "https://x.test/broken";
        store.set(url, &json!({ "content": "D".repeat(11000) })).await.unwrap();

        let (_, packed) = store.artifact_paths(url);
        std::fs::write(&packed, b"definitely not gzip").unwrap();
        store.clear_memory();

        assert!(store.get(url).await.is_none());
        assert!(matches!(
            store.try_get(url).await,
            Err(PageStoreError::Corrupt { .. })
        ));
        assert!(store.try_get("https://x.test/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_cache_is_bounded_and_disk_survives_eviction() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::new(
            dir.path(),
            PageStoreConfig {
                max_items_in_memory: 2,
                ..Default::default()
            },
        );

        for i in 0..5 {
            store.set(&format!("https://x.test/{i}"), &json!({ "i": i })).await.unwrap();
            assert!(store.cached_len() <= 2);
        }
        // Evicted from memory, still on disk.
        assert_eq!(store.get("https://x.test/0").await.unwrap()["i"], 0);
        assert_eq!(store.cached_len(), 2);
    }

    #[tokio::test]
    async fn has_delete_and_clear_cover_both_forms() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set("https://x.test/big", &json!({ "c": "E".repeat(20000) })).await.unwrap();
        store.set("https://x.test/small", &json!({ "c": 1 })).await.unwrap();
        store.clear_memory();

        assert!(store.has("https://x.test/big").await);
        assert!(store.has("https://x.test/small").await);
        assert!(!store.has("https://x.test/none").await);

        assert!(store.delete("https://x.test/big").await.unwrap());
        assert!(!store.has("https://x.test/big").await);
        assert!(!store.delete("https://x.test/big").await.unwrap());

        store.clear().await.unwrap();
        assert!(store.urls().await.unwrap().is_empty());
        assert_eq!(store.cached_len(), 0);
    }

    #[tokio::test]
    async fn entries_enumerates_disk_regardless_of_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.set("https://x.test/1", &json!({ "c": "F".repeat(20000) })).await.unwrap();
        store.set("https://x.test/2", &json!({ "c": "two" })).await.unwrap();
        store.clear_memory();

        let entries = store.entries().await.unwrap();
        let urls: Vec<&str> = entries.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(urls, vec!["https://x.test/1", "https://x.test/2"]);
        assert_eq!(store.cached_len(), 0);
    }

    #[tokio::test]
    async fn migrate_compresses_only_oversized_plain_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(store.dir()).unwrap();

        let big_url = "https://x.test/legacy-big";
        let small_url = "https://x.test/legacy-small";
        let big = serde_json::to_vec(&json!({ "c": "G".repeat(30000) })).unwrap();
        let small = serde_json::to_vec(&json!({ "c": "g" })).unwrap();
        let (big_plain, big_packed) = store.artifact_paths(big_url);
        let (small_plain, _) = store.artifact_paths(small_url);
        std::fs::write(&big_plain, &big).unwrap();
        std::fs::write(&small_plain, &small).unwrap();

        let report = store.migrate_to_compressed().await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.errors, 0);
        assert!(report.total_saved > 0);

        assert!(!big_plain.exists());
        assert!(big_packed.exists());
        assert_eq!(std::fs::read(&small_plain).unwrap(), small);

        let stats = store.compression_stats().await.unwrap();
        assert_eq!(stats.compressed, 1);
        assert_eq!(stats.uncompressed, 1);
        assert_eq!(stats.uncompressed_size, small.len() as u64);
        assert_eq!(store.get(big_url).await.unwrap()["c"].as_str().unwrap().len(), 30000);
    }

    #[test]
    fn key_encoding_round_trips() {
        let url = "https://x.test/path?q=1&r=/x#frag";
        let key = encode_key(url);
        assert!(!key.contains('/'));
        assert_eq!(decode_key(&key).as_deref(), Some(url));
    }
}
