//! Same-host breadth-first crawler over HTTP.
//!
//! Pages are fetched with reqwest, parsed with scraper, scored with a few
//! cheap on-page checks and written to a [`PageStore`] inside the run
//! directory. The crawl frontier is checkpointed through the
//! [`StateLoader`] so an interrupted run can pick up where it stopped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tokio::time::sleep;
use url::Url;

use super::{CrawlOutput, CrawlProgress, CrawlRequest, CrawlSummary, Crawler, CrawlerConfig};
use crate::domain::models::{BadRequest, ExternalLink, PageIssue, PageSummary, Severity};
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::service::session::SessionStatus;
use crate::storage::{AuditStateLayout, CrawlStateContainers, PageStore, PageStoreConfig, StateLoader};

const TITLE_MAX_CHARS: usize = 60;
const THIN_CONTENT_WORDS: u32 = 300;
const SLOW_PAGE_MS: u64 = 3_000;

pub struct HttpCrawler {
    client: RwLock<Client>,
    config: CrawlerConfig,
    layout: AuditStateLayout,
    state_loader: Arc<dyn StateLoader>,
    page_store_config: PageStoreConfig,
    events: EventBus<CrawlProgress>,
}

/// Parsed page: its summary and every link found on it.
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub summary: PageSummary,
    pub links: Vec<Url>,
}

enum Fetched {
    Page { status: u16, body: String, load_time_ms: u64 },
    Failed { error: String },
}

struct RunSetup {
    run_dir: PathBuf,
    store: Arc<PageStore>,
    containers: CrawlStateContainers,
    resumed: bool,
}

fn create_client(config: &CrawlerConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(AppError::from)
}

impl HttpCrawler {
    pub fn new(
        config: CrawlerConfig,
        layout: AuditStateLayout,
        state_loader: Arc<dyn StateLoader>,
        page_store_config: PageStoreConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: RwLock::new(create_client(&config)?),
            config,
            layout,
            state_loader,
            page_store_config,
            events: EventBus::new(),
        })
    }

    fn client(&self) -> Client {
        self.client.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn emit(&self, request: &CrawlRequest, progress: u8, message: String, current_url: Option<&str>, phase: &str) {
        self.events.emit(&CrawlProgress {
            session_id: request.context.session_id.clone(),
            status: SessionStatus::Running,
            progress,
            message,
            current_url: current_url.map(str::to_string),
            phase: Some(phase.to_string()),
        });
    }

    /// Reuse the newest run directory when it holds an unfinished frontier,
    /// otherwise start a fresh one.
    async fn prepare_run(&self, request: &CrawlRequest) -> Result<RunSetup> {
        if !request.force_new {
            if let Some(dir) = self.layout.latest_run_dir(&request.domain).await? {
                let store = Arc::new(PageStore::new(
                    AuditStateLayout::page_data_dir(&dir),
                    self.page_store_config.clone(),
                ));
                let mut containers = CrawlStateContainers::default();
                let state_file = AuditStateLayout::state_file(&dir);
                match self.state_loader.load_state(&state_file, &mut containers, &store).await {
                    Ok(true) if !containers.queue.is_empty() => {
                        log::info!(
                            "[CRAWL] Resuming {} from {} ({} visited, {} queued)",
                            request.domain,
                            dir.display(),
                            containers.visited.len(),
                            containers.queue.len()
                        );
                        return Ok(RunSetup {
                            run_dir: dir,
                            store,
                            containers,
                            resumed: true,
                        });
                    }
                    Ok(_) => log::debug!("[CRAWL] Nothing to resume in {}", dir.display()),
                    Err(e) => log::warn!("[CRAWL] Ignoring unreadable checkpoint {}: {}", state_file.display(), e),
                }
            }
        }

        let run_dir = self.layout.new_run_dir(&request.domain);
        tokio::fs::create_dir_all(&run_dir).await?;
        let store = Arc::new(PageStore::new(
            AuditStateLayout::page_data_dir(&run_dir),
            self.page_store_config.clone(),
        ));
        log::debug!("[CRAWL] New run directory {}", run_dir.display());
        Ok(RunSetup {
            run_dir,
            store,
            containers: CrawlStateContainers::default(),
            resumed: false,
        })
    }

    async fn fetch(&self, url: &str) -> Fetched {
        let started = Instant::now();
        let response = match self.client().get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("[CRAWL] Failed to fetch {}: {}", url, e);
                return Fetched::Failed { error: e.to_string() };
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => Fetched::Page {
                status,
                body,
                load_time_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                log::debug!("[CRAWL] Failed to read body of {}: {}", url, e);
                Fetched::Failed { error: e.to_string() }
            }
        }
    }

    async fn checkpoint(&self, run_dir: &std::path::Path, containers: &CrawlStateContainers) {
        let state_file = AuditStateLayout::state_file(run_dir);
        if let Err(e) = self.state_loader.save_state(&state_file, containers).await {
            log::warn!("[CRAWL] Checkpoint to {} failed: {}", state_file.display(), e);
        }
    }

    async fn check_external_links(&self, request: &CrawlRequest, containers: &mut CrawlStateContainers) {
        let budget = request
            .limits
            .max_external_links
            .map_or(self.config.max_external_links, |cap| {
                self.config.max_external_links.min(cap as usize)
            });
        let targets: Vec<String> = containers
            .external_links
            .values()
            .filter(|link| !link.is_checked())
            .take(budget)
            .map(|link| link.url.clone())
            .collect();
        if targets.is_empty() {
            return;
        }

        let total = targets.len();
        log::info!("[CRAWL] Checking {} external links", total);
        let client = self.client();
        let mut results = stream::iter(targets)
            .map(|url| {
                let client = client.clone();
                async move {
                    let outcome = check_link(&client, &url).await;
                    (url, outcome)
                }
            })
            .buffer_unordered(self.config.external_link_concurrency.max(1));

        let mut checked = 0usize;
        while let Some((url, outcome)) = results.next().await {
            checked += 1;
            if let Some(link) = containers.external_links.get_mut(&url) {
                match outcome {
                    Ok(status) => link.status = Some(status),
                    Err(error) => link.error = Some(error),
                }
            }
            let progress = 80 + (checked * 15 / total) as u8;
            self.emit(
                request,
                progress,
                format!("Checked external link {}/{}", checked, total),
                Some(&url),
                "checking_links",
            );
        }
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn run_crawl(&self, request: CrawlRequest) -> Result<CrawlOutput> {
        let started = Instant::now();
        let start_url = Url::parse(&request.domain)
            .map_err(|e| AppError::validation(format!("invalid start URL {}: {}", request.domain, e)))?;
        let base_host = start_url
            .host_str()
            .ok_or_else(|| AppError::validation(format!("start URL has no host: {}", request.domain)))?
            .to_string();
        let base_port = start_url.port_or_known_default();

        let limit = request
            .limits
            .max_pages
            .map_or(request.max_pages, |cap| request.max_pages.min(cap))
            .max(1) as usize;

        let RunSetup {
            run_dir,
            store,
            mut containers,
            resumed,
        } = self.prepare_run(&request).await?;

        if containers.visited.is_empty() && containers.queue.is_empty() {
            containers.queue.push_back(start_url.to_string());
        }
        log::info!("[CRAWL] Starting crawl of {} (limit {} pages)", request.domain, limit);
        self.emit(&request, 5, format!("Crawling {}", request.domain), None, "crawling");

        let mut referrers: HashMap<String, String> = HashMap::new();
        let mut since_checkpoint = 0usize;

        while let Some(url) = containers.queue.pop_front() {
            if containers.visited.contains(&url) {
                continue;
            }
            if containers.visited.len() >= limit {
                log::info!("[CRAWL] Reached max pages limit: {}", limit);
                containers.queue.push_front(url);
                break;
            }

            containers.visited.insert(url.clone());
            let done = containers.visited.len();
            self.emit(
                &request,
                5 + (done * 75 / limit) as u8,
                format!("Crawling page {}/{}", done, limit),
                Some(&url),
                "crawling",
            );

            if self.config.delay_ms > 0 {
                sleep(Duration::from_millis(self.config.delay_ms)).await;
            }

            let referrer = referrers.get(&url).cloned();
            match self.fetch(&url).await {
                Fetched::Failed { error } => {
                    record_bad_request(&mut containers, &url, None, Some(error), referrer);
                }
                Fetched::Page { status, body, load_time_ms } => {
                    containers.stats.pages_crawled += 1;
                    containers.stats.bytes_downloaded += body.len() as u64;

                    let Ok(page_url) = Url::parse(&url) else {
                        continue;
                    };
                    let analysis = if status >= 400 {
                        record_bad_request(&mut containers, &url, Some(status), None, referrer);
                        PageAnalysis {
                            summary: PageSummary {
                                url: url.clone(),
                                status_code: Some(status),
                                load_time_ms,
                                ..Default::default()
                            },
                            links: Vec::new(),
                        }
                    } else {
                        analyze_page(&page_url, status, &body, load_time_ms)
                    };

                    if let Err(e) = store.set(&url, &analysis.summary).await {
                        log::warn!("[CRAWL] Could not store page data for {}: {}", url, e);
                    }

                    for link in analysis.links {
                        match link.scheme() {
                            "mailto" => {
                                containers.mailto_links.insert(link.to_string());
                            }
                            "tel" => {
                                containers.tel_links.insert(link.to_string());
                            }
                            "http" | "https" => {
                                let target = link.to_string();
                                if link.host_str() == Some(base_host.as_str())
                                    && link.port_or_known_default() == base_port
                                {
                                    containers.stats.internal_links += 1;
                                    if !containers.visited.contains(&target)
                                        && !containers.queue.contains(&target)
                                    {
                                        referrers.entry(target.clone()).or_insert_with(|| url.clone());
                                        containers.queue.push_back(target);
                                    }
                                } else {
                                    containers.stats.external_links += 1;
                                    let entry = containers
                                        .external_links
                                        .entry(target.clone())
                                        .or_insert_with(|| ExternalLink::unchecked(target));
                                    if !entry.sources.contains(&url) {
                                        entry.sources.push(url.clone());
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            since_checkpoint += 1;
            if since_checkpoint >= self.config.checkpoint_every.max(1) {
                since_checkpoint = 0;
                self.checkpoint(&run_dir, &containers).await;
            }
        }

        self.check_external_links(&request, &mut containers).await;
        self.emit(&request, 95, "Finalizing crawl".to_string(), None, "finalizing");
        self.checkpoint(&run_dir, &containers).await;

        let mut pages: Vec<PageSummary> = Vec::new();
        for (url, value) in store.entries().await.map_err(AppError::from)? {
            match serde_json::from_value::<PageSummary>(value) {
                Ok(page) => pages.push(page),
                Err(e) => log::warn!("[CRAWL] Skipping unreadable page entry {}: {}", url, e),
            }
        }
        pages.sort_by(|a, b| a.url.cmp(&b.url));

        let scores: Vec<u32> = pages.iter().filter_map(|p| p.score).map(u32::from).collect();
        let score = (!scores.is_empty()).then(|| (scores.iter().sum::<u32>() / scores.len() as u32) as u8);

        let summary = CrawlSummary {
            pages_crawled: containers.stats.pages_crawled,
            duration_ms: started.elapsed().as_millis() as u64,
            resumed,
            score,
        };
        log::info!(
            "[CRAWL] Finished {}: {} pages, {} broken internal, {} external links in {}ms",
            request.domain,
            summary.pages_crawled,
            containers.bad_requests.len(),
            containers.external_links.len(),
            summary.duration_ms
        );

        Ok(CrawlOutput {
            summary,
            pages,
            visited: containers.visited,
            stats: containers.stats,
            external_links: containers.external_links,
            bad_requests: containers.bad_requests,
            mailto_links: containers.mailto_links,
            tel_links: containers.tel_links,
            run_dir: Some(run_dir),
            page_store: Some(store),
        })
    }

    fn progress_events(&self) -> &EventBus<CrawlProgress> {
        &self.events
    }

    async fn cleanup_connections(&self) {
        match create_client(&self.config) {
            Ok(fresh) => {
                *self.client.write().unwrap_or_else(PoisonError::into_inner) = fresh;
                log::debug!("[CRAWL] HTTP connection pool reset");
            }
            Err(e) => log::warn!("[CRAWL] Could not rebuild HTTP client: {}", e),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn record_bad_request(
    containers: &mut CrawlStateContainers,
    url: &str,
    status: Option<u16>,
    error: Option<String>,
    referrer: Option<String>,
) {
    containers.stats.bad_requests += 1;
    let entry = containers
        .bad_requests
        .entry(url.to_string())
        .or_insert_with(|| BadRequest {
            url: url.to_string(),
            status,
            error: error.clone(),
            referrers: Vec::new(),
        });
    if let Some(referrer) = referrer {
        if !entry.referrers.contains(&referrer) {
            entry.referrers.push(referrer);
        }
    }
}

/// HEAD first, falling back to GET for servers that reject HEAD.
async fn check_link(client: &Client, url: &str) -> std::result::Result<u16, String> {
    let head = client.head(url).send().await.map_err(|e| e.to_string())?;
    match head.status() {
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => client
            .get(url)
            .send()
            .await
            .map(|r| r.status().as_u16())
            .map_err(|e| e.to_string()),
        status => Ok(status.as_u16()),
    }
}

/// Extract all absolute links (`<a href="…">`) from HTML, fragments stripped.
pub fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    let selector = SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("static selector"));

    document
        .select(selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|raw| !raw.is_empty() && !raw.starts_with('#'))
        .filter_map(|raw| base_url.join(raw).ok())
        .map(|mut u| {
            u.set_fragment(None);
            u
        })
        .collect()
}

/// Run the on-page checks for one HTML document.
pub fn analyze_page(url: &Url, status: u16, html: &str, load_time_ms: u64) -> PageAnalysis {
    static TITLE: OnceLock<Selector> = OnceLock::new();
    static META_DESCRIPTION: OnceLock<Selector> = OnceLock::new();
    static BODY: OnceLock<Selector> = OnceLock::new();
    let title_sel = TITLE.get_or_init(|| Selector::parse("title").expect("static selector"));
    let meta_sel = META_DESCRIPTION
        .get_or_init(|| Selector::parse(r#"meta[name="description"]"#).expect("static selector"));
    let body_sel = BODY.get_or_init(|| Selector::parse("body").expect("static selector"));

    let document = Html::parse_document(html);

    let title = document
        .select(title_sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    let meta_description = document
        .select(meta_sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let word_count = document
        .select(body_sel)
        .next()
        .map(|body| body.text().flat_map(str::split_whitespace).count() as u32)
        .unwrap_or(0);

    let mut issues = Vec::new();
    match &title {
        None => issues.push(PageIssue::new("missing_title", Severity::High, "Page has no <title>")),
        Some(t) if t.chars().count() > TITLE_MAX_CHARS => issues.push(PageIssue::new(
            "title_too_long",
            Severity::Low,
            format!("Title is {} characters (max {})", t.chars().count(), TITLE_MAX_CHARS),
        )),
        Some(_) => {}
    }
    if meta_description.is_none() {
        issues.push(PageIssue::new(
            "missing_meta_description",
            Severity::Medium,
            "Page has no meta description",
        ));
    }
    if word_count < THIN_CONTENT_WORDS {
        issues.push(PageIssue::new(
            "thin_content",
            Severity::Low,
            format!("Only {} words of content", word_count),
        ));
    }
    if load_time_ms > SLOW_PAGE_MS {
        issues.push(PageIssue::new(
            "slow_response",
            Severity::Medium,
            format!("Page took {}ms to load", load_time_ms),
        ));
    }

    let penalty: u32 = issues
        .iter()
        .map(|i| match i.severity {
            Severity::High => 20,
            Severity::Medium => 10,
            Severity::Low => 5,
        })
        .sum();

    PageAnalysis {
        links: extract_links(&document, url),
        summary: PageSummary {
            url: url.to_string(),
            status_code: Some(status),
            title,
            meta_description,
            word_count,
            load_time_ms,
            score: Some(100u32.saturating_sub(penalty) as u8),
            issues,
        },
    }
}
