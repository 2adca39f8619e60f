use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, info, warn};

use super::{listing, CollectError, Collector};
use crate::classify::{RecordClassifier, Verdict};
use crate::record::{BucketKind, FieldBag, RawRecord, Source};

const BASE_BACKOFF_MS: u64 = 2000;

/// Listing page for each bucket.
pub fn default_listing_url(kind: BucketKind) -> &'static str {
    match kind {
        BucketKind::Rulings => "https://www.taxsutra.com/dt/rulings",
        BucketKind::ExpertCorner => "https://www.taxsutra.com/dt/experts-corner",
        BucketKind::LitigationTracker => "https://www.taxsutra.com/dt/litigation-tracker",
        BucketKind::Gst | BucketKind::DirectTax | BucketKind::FemaBanking => {
            "https://www.taxmann.com/research/all/archives"
        }
    }
}

/// Markdown for a URL. Implemented by the spider.cloud session; tests swap
/// in canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_markdown(&self, url: &str) -> Result<String, CollectError>;
}

/// One spider.cloud client shared by every collector of a run.
pub struct SpiderSession {
    spider: Option<Spider>,
    retry_attempts: u32,
}

impl SpiderSession {
    /// A missing or rejected key still yields a session; every fetch then
    /// fails with `CollectError::Fatal`.
    pub fn new(api_key: Option<&str>, retry_attempts: u32) -> Self {
        let spider = match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => match Spider::new(Some(key.to_string())) {
                Ok(spider) => Some(spider),
                Err(e) => {
                    warn!("Failed to create Spider client: {}", e);
                    None
                }
            },
            None => None,
        };
        Self {
            spider,
            retry_attempts,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.spider.is_some()
    }
}

#[async_trait]
impl PageFetcher for SpiderSession {
    async fn fetch_markdown(&self, url: &str) -> Result<String, CollectError> {
        let spider = self
            .spider
            .as_ref()
            .ok_or_else(|| CollectError::Fatal("spider_api_key is not set".into()))?;

        let mut attempt = 0;
        loop {
            let start = Instant::now();
            let result = scrape_once(spider, url).await;
            debug!(url, elapsed_ms = start.elapsed().as_millis() as u64, "spider fetch");

            match result {
                Ok(markdown) => return Ok(markdown),
                Err(reason) if attempt < self.retry_attempts && is_retryable(&reason) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        url,
                        attempt + 1,
                        self.retry_attempts,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(reason) => {
                    return Err(CollectError::Fetch {
                        url: url.to_string(),
                        reason,
                    })
                }
            }
        }
    }
}

fn is_retryable(reason: &str) -> bool {
    reason.contains("429")
        || reason.contains("rate")
        || reason.contains("500")
        || reason.contains("502")
        || reason.contains("503")
}

async fn scrape_once(spider: &Spider, url: &str) -> Result<String, String> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
        ..Default::default()
    };

    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| e.to_string())?;

    let parsed: serde_json::Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
        if status >= 400 {
            return Err(format!("upstream status {}", status));
        }
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(listing::strip_images)
        .ok_or_else(|| "no content in spider response".to_string())
}

/// Pages through one listing (`?page=N`, zero-based) until the classifier
/// says stop, a page comes back empty, or `max_pages` is reached.
pub struct SpiderCollector {
    kind: BucketKind,
    listing_url: String,
    max_pages: usize,
    fetch_details: bool,
    fetcher: Arc<dyn PageFetcher>,
}

impl SpiderCollector {
    pub fn new(kind: BucketKind, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            kind,
            listing_url: default_listing_url(kind).to_string(),
            max_pages: 10,
            fetch_details: true,
            fetcher,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_details(mut self, fetch_details: bool) -> Self {
        self.fetch_details = fetch_details;
        self
    }

    /// Taxsutra entries live under the listing path; Taxmann archive
    /// entries are routed by category path.
    fn accepts(&self, url: &str) -> bool {
        match self.kind.source() {
            Source::Taxmann => BucketKind::from_taxmann_url(url) == Some(self.kind),
            Source::Taxsutra => {
                let path = Url::parse(&self.listing_url)
                    .map(|u| u.path().trim_end_matches('/').to_string())
                    .unwrap_or_default();
                !path.is_empty() && url.contains(&format!("{}/", path))
            }
        }
    }

    /// Links that belong to the listing at all. The Taxmann archive is one
    /// date-descending feed shared by three buckets, so every archive entry
    /// counts toward paging and the window, whichever bucket it routes to.
    fn on_listing(&self, url: &str) -> bool {
        match self.kind.source() {
            Source::Taxmann => BucketKind::from_taxmann_url(url).is_some(),
            Source::Taxsutra => self.accepts(url),
        }
    }

    fn page_url(&self, page: usize) -> String {
        if page == 0 {
            return self.listing_url.clone();
        }
        match Url::parse(&self.listing_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("page", &page.to_string());
                url.to_string()
            }
            Err(_) => format!("{}?page={}", self.listing_url, page),
        }
    }

    fn absolute(&self, href: &str) -> String {
        Url::parse(&self.listing_url)
            .and_then(|base| base.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }

    async fn build_record(&self, entry: &listing::ListingEntry) -> Result<RawRecord, CollectError> {
        let url = self.absolute(&entry.url);
        let mut fields = FieldBag::new();
        fields.insert("Title".into(), entry.title.clone());
        fields.insert("URL".into(), url.clone());
        if let Some(date) = &entry.date {
            fields.insert("Date".into(), date.clone());
        }
        if let Some(teaser) = &entry.teaser {
            fields.insert("Summary".into(), teaser.clone());
        }
        if self.kind.source() == Source::Taxmann {
            fields.insert("Source".into(), Source::Taxmann.display_name().into());
        }

        if self.fetch_details && self.kind != BucketKind::ExpertCorner {
            match self.fetcher.fetch_markdown(&url).await {
                Ok(markdown) => {
                    for (key, value) in listing::meta_fields(&markdown) {
                        fields.entry(key).or_insert(value);
                    }
                    if let Some(paragraph) = listing::first_paragraph(&markdown) {
                        let key = match self.kind {
                            BucketKind::Rulings | BucketKind::LitigationTracker => "Conclusion",
                            _ => "Summary",
                        };
                        fields.entry(key.into()).or_insert(paragraph);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(bucket = %self.kind, error = %e, "detail page skipped"),
            }
        }

        Ok(RawRecord::from_fields(self.kind, &fields))
    }
}

#[async_trait]
impl Collector for SpiderCollector {
    fn kind(&self) -> BucketKind {
        self.kind
    }

    async fn collect(&self, classifier: &mut RecordClassifier) -> Result<Vec<RawRecord>, CollectError> {
        let pb = ProgressBar::new(self.max_pages as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] page {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(self.kind.to_string());

        let mut records = Vec::new();
        let mut stopped = false;

        for page in 0..self.max_pages {
            let url = self.page_url(page);
            pb.set_position(page as u64 + 1);

            let markdown = match self.fetcher.fetch_markdown(&url).await {
                Ok(markdown) => markdown,
                Err(e) if e.is_fatal() => {
                    pb.finish_and_clear();
                    return Err(e);
                }
                Err(e) => {
                    warn!(bucket = %self.kind, page, error = %e, "listing page skipped");
                    continue;
                }
            };

            let entries = listing::parse_entries(&markdown, |u| self.on_listing(u));
            if entries.is_empty() {
                info!(bucket = %self.kind, page, "no entries on page, done");
                break;
            }
            debug!(bucket = %self.kind, page, entries = entries.len(), "listing page parsed");

            for entry in &entries {
                match classifier.observe(entry.date.as_deref().unwrap_or("")) {
                    Verdict::Accept if !self.accepts(&entry.url) => {
                        debug!(title = %entry.title, "other category, not kept");
                    }
                    Verdict::Accept => match self.build_record(entry).await {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            pb.finish_and_clear();
                            return Err(e);
                        }
                    },
                    Verdict::SkipToday | Verdict::SkipOutside => {
                        debug!(title = %entry.title, date = ?entry.date, "skipped");
                    }
                    Verdict::Stop => {
                        stopped = true;
                        break;
                    }
                }
            }
            if stopped {
                break;
            }
        }

        pb.finish_and_clear();
        info!(
            bucket = %self.kind,
            records = records.len(),
            past_window = stopped,
            "listing walked"
        );
        Ok(records)
    }
}
