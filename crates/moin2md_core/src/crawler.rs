use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::attachments::AttachmentFetcher;
use crate::config::RunConfig;
use crate::pathing::{FileKind, PagePath, SOURCE_EXTENSION, probe};

static INDEX_LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div#content ul li a").expect("invalid index link selector")
});
static EDITOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#editor-textarea").expect("invalid editor selector"));

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    pub pages_listed: usize,
    pub pages_written: usize,
    pub pages_skipped: usize,
    pub requests_sent: usize,
    pub warnings: Vec<String>,
}

/// Session-authenticated client for a MoinMoin instance.
///
/// All requests go through the blocking `reqwest` client with a per-request
/// minimum interval, so a full crawl stays under the wiki's rate limits even
/// when most pages are cache hits.
#[derive(Debug)]
pub struct MoinClient {
    client: Client,
    wiki_url: String,
    wiki_name: String,
    cookie_header: String,
    page_interval: Duration,
    attachment_interval: Duration,
    failure_backoff: Duration,
    max_retries: usize,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MoinClient {
    pub fn new(config: &RunConfig) -> Result<Self> {
        if config.wiki_url.is_empty() || config.wiki_name.is_empty() {
            bail!(
                "wiki connection is not configured (pass --url and --wiki, set MOIN_URL and MOIN_WIKI_NAME, or add [wiki] url and name)"
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build wiki HTTP client")?;

        Ok(Self {
            client,
            wiki_url: config.wiki_url.trim_end_matches('/').to_string(),
            wiki_name: config.wiki_name.clone(),
            cookie_header: format!(
                "{}={}",
                config.session_cookie_name, config.session_cookie_value
            ),
            page_interval: Duration::from_millis(config.page_interval_ms),
            attachment_interval: Duration::from_millis(config.attachment_interval_ms),
            failure_backoff: Duration::from_millis(config.failure_backoff_ms),
            max_retries: config.max_retries,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Fetch the title index and return the URL paths of every listed page,
    /// relative to the wiki (leading slash and wiki name stripped).
    pub fn list_pages(&mut self, index_page: &str) -> Result<Vec<String>> {
        let url = format!("{}/{}/{index_page}", self.wiki_url, self.wiki_name);
        let body = self.get_html(&url, &[], self.page_interval)?;

        let document = Html::parse_document(&body);
        let prefix = format!("/{}/", self.wiki_name);
        let mut pages = Vec::new();
        for link in document.select(&INDEX_LINK_SELECTOR) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(page) = href.strip_prefix(&prefix) else {
                continue;
            };
            if page.is_empty() {
                continue;
            }
            pages.push(page.to_string());
        }
        Ok(pages)
    }

    /// Fetch a page's raw wiki markup through the text editor form. Returns
    /// `None` when the page has no editor textarea (immutable system pages),
    /// which callers treat as a skip.
    pub fn fetch_page_source(&mut self, page: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/{}/action/edit/{page}",
            self.wiki_url, self.wiki_name
        );
        let body = self.get_html(
            &url,
            &[("action", "edit"), ("editor", "text")],
            self.page_interval,
        )?;

        let document = Html::parse_document(&body);
        let Some(textarea) = document.select(&EDITOR_SELECTOR).next() else {
            return Ok(None);
        };
        Ok(Some(textarea.text().collect::<String>()))
    }

    fn get_html(
        &mut self,
        url: &str,
        query: &[(&str, &str)],
        interval: Duration,
    ) -> Result<String> {
        let bytes = self.get_bytes(url, query, interval)?;
        String::from_utf8(bytes).with_context(|| format!("non-UTF-8 response from {url}"))
    }

    fn get_bytes(&mut self, url: &str, query: &[(&str, &str)], interval: Duration) -> Result<Vec<u8>> {
        for attempt in 0..=self.max_retries {
            self.apply_rate_limit(interval);
            let response = self
                .client
                .get(url)
                .header("Cookie", self.cookie_header.clone())
                .query(query)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("requesting {url} resulted in HTTP {status}");
                    }
                    return response
                        .bytes()
                        .map(|bytes| bytes.to_vec())
                        .with_context(|| format!("failed to read response body from {url}"));
                }
                Err(error) => {
                    if attempt < self.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to request {url}"));
                }
            }
        }

        bail!("request to {url} exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, interval: Duration) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count = self.request_count.saturating_add(1);
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(4).min(4);
        let scale = 1u64.checked_shl(exponent).unwrap_or(16);
        let backoff = u64::try_from(self.failure_backoff.as_millis()).unwrap_or(u64::MAX);
        sleep(Duration::from_millis(backoff.saturating_mul(scale)));
    }
}

impl AttachmentFetcher for MoinClient {
    fn fetch(&mut self, page_url_path: &str, name: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}/{page_url_path}", self.wiki_url, self.wiki_name);
        self.get_bytes(
            &url,
            &[("action", "AttachFile"), ("do", "get"), ("target", name)],
            self.attachment_interval,
        )
    }
}

/// Builds the HTTP client on first use. Translating an already-downloaded
/// tree whose attachments are all on disk never needs wiki connection
/// settings; the first reference that actually has to be fetched surfaces
/// the configuration error instead.
pub struct DeferredMoinClient<'a> {
    config: &'a RunConfig,
    client: Option<MoinClient>,
}

impl<'a> DeferredMoinClient<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }
}

impl AttachmentFetcher for DeferredMoinClient<'_> {
    fn fetch(&mut self, page_url_path: &str, name: &str) -> Result<Vec<u8>> {
        match &mut self.client {
            Some(client) => client.fetch(page_url_path, name),
            None => {
                let mut client = MoinClient::new(self.config)?;
                let result = client.fetch(page_url_path, name);
                self.client = Some(client);
                result
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Make every ancestor of `page` a directory under `root`.
///
/// The index convention means an ancestor may already exist as a page file
/// from an earlier crawl step: `a/b.md` blocks the directory `a/b` that a
/// child page now needs. Such a file is moved to `a/b/index.md` before the
/// directory chain is created.
pub fn ensure_page_directories(root: &Path, page: &PagePath) -> Result<()> {
    let mut prefix = PagePath::new("");
    let parent = page.parent();
    for segment in parent.segments() {
        prefix = prefix.join(segment);
        let dir = prefix.fs_path(root);
        if probe(&dir) == FileKind::Directory {
            continue;
        }

        let blocking_file = prefix
            .parent()
            .join(&format!("{segment}.{SOURCE_EXTENSION}"))
            .fs_path(root);
        if probe(&blocking_file) == FileKind::File {
            // with_extension would truncate a dotted page name like "v1.0".
            let staging = dir.with_file_name(format!("{segment}.index-staging"));
            fs::rename(&blocking_file, &staging).with_context(|| {
                format!("failed to stage {} for index move", blocking_file.display())
            })?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            fs::rename(&staging, dir.join("index.md")).with_context(|| {
                format!("failed to move {} to its index", blocking_file.display())
            })?;
        } else {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Pick the on-disk destination for a crawled page. A directory already
/// bearing the page's name means children were crawled first; the page body
/// becomes that directory's `index.md`.
pub fn page_destination(root: &Path, page_url_path: &str) -> PagePath {
    let as_dir = PagePath::new(page_url_path);
    if probe(&as_dir.fs_path(root)) == FileKind::Directory {
        return as_dir.join("index.md");
    }
    PagePath::new(&format!("{page_url_path}.{SOURCE_EXTENSION}"))
}

/// Crawl every page listed on the wiki's title index into the migration
/// root as raw-markup `.md` files. Pages that fail to fetch are recorded as
/// warnings and skipped; a page that cannot be written aborts the run.
pub fn crawl(config: &RunConfig) -> Result<CrawlReport> {
    let mut client = MoinClient::new(config)?;
    let report = crawl_with_client(config, &mut client)?;
    Ok(report)
}

pub fn crawl_with_client(config: &RunConfig, client: &mut MoinClient) -> Result<CrawlReport> {
    fs::create_dir_all(&config.root_dir)
        .with_context(|| format!("failed to create {}", config.root_dir.display()))?;

    let pages = client
        .list_pages(&config.index_page)
        .context("failed to list wiki pages")?;

    let mut report = CrawlReport {
        pages_listed: pages.len(),
        ..CrawlReport::default()
    };

    for page_url_path in &pages {
        let source = match client.fetch_page_source(page_url_path) {
            Ok(Some(source)) => source,
            Ok(None) => {
                report
                    .warnings
                    .push(format!("page {page_url_path} is not editable, skipped"));
                report.pages_skipped += 1;
                continue;
            }
            Err(error) => {
                report
                    .warnings
                    .push(format!("failed to fetch page {page_url_path}: {error:#}"));
                report.pages_skipped += 1;
                continue;
            }
        };

        let destination = page_destination(&config.root_dir, page_url_path);
        ensure_page_directories(&config.root_dir, &destination)?;
        let path = destination.fs_path(&config.root_dir);
        fs::write(&path, source)
            .with_context(|| format!("failed to write {}", path.display()))?;
        report.pages_written += 1;
    }

    report.requests_sent = client.request_count();
    Ok(report)
}
