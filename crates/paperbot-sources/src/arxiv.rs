//! arXiv paper source.
//!
//! Queries the public Atom API (`export.arxiv.org/api/query`) for the most
//! recent submissions and converts entries to [`PaperRecord`]s. Results are
//! paged, newest first, with a politeness delay between pages as the API
//! terms ask for.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use paperbot_core::defaults;
use paperbot_core::{Error, KeywordSet, PaperId, PaperRecord, PaperSource, Result};

/// arXiv client configuration.
#[derive(Debug, Clone)]
pub struct ArxivConfig {
    /// Query endpoint.
    pub base_url: String,
    /// Categories to poll. Empty means search by keyword instead.
    pub categories: Vec<String>,
    /// Entries requested per page.
    pub page_size: usize,
    /// Upper bound on entries fetched per cycle.
    pub max_results: usize,
    /// Fixed delay between pages.
    pub wait_time: Duration,
    /// Upper bound of the random delay added to `wait_time`.
    pub wait_jitter: Duration,
    /// Entries published before `now - lookback` end the fetch.
    pub lookback: chrono::Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::ARXIV_BASE_URL.to_string(),
            categories: defaults::ARXIV_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            page_size: defaults::ARXIV_PAGE_SIZE,
            max_results: defaults::ARXIV_MAX_RESULTS,
            wait_time: Duration::from_millis(defaults::ARXIV_WAIT_TIME_MS),
            wait_jitter: Duration::from_millis(defaults::ARXIV_WAIT_JITTER_MS),
            lookback: chrono::Duration::hours(defaults::ARXIV_LOOKBACK_HOURS),
            timeout: Duration::from_secs(defaults::ARXIV_TIMEOUT_SECS),
        }
    }
}

impl ArxivConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ARXIV_BASE_URL` | `http://export.arxiv.org/api/query` |
    /// | `ARXIV_CATEGORIES` | `cs.CV,cs.AI,cs.LG,stat.ML,cs.GR` (empty string: keyword search) |
    /// | `ARXIV_PAGE_SIZE` | 100 |
    /// | `ARXIV_MAX_RESULTS` | 200 |
    /// | `ARXIV_WAIT_TIME_MS` | 5000 |
    /// | `ARXIV_LOOKBACK_HOURS` | 96 |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ARXIV_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(raw) = std::env::var("ARXIV_CATEGORIES") {
            config.categories = parse_categories(&raw);
        }
        if let Some(v) = env_parse::<usize>("ARXIV_PAGE_SIZE") {
            config.page_size = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("ARXIV_MAX_RESULTS") {
            config.max_results = v;
        }
        if let Some(v) = env_parse::<u64>("ARXIV_WAIT_TIME_MS") {
            config.wait_time = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<i64>("ARXIV_LOOKBACK_HOURS") {
            config.lookback = chrono::Duration::hours(v);
        }

        config
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paging(mut self, page_size: usize, max_results: usize) -> Self {
        self.page_size = page_size.max(1);
        self.max_results = max_results;
        self
    }

    /// Set the delay between pages. Zero both for tests.
    pub fn with_wait(mut self, wait_time: Duration, wait_jitter: Duration) -> Self {
        self.wait_time = wait_time;
        self.wait_jitter = wait_jitter;
        self
    }

    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Random politeness delay before the next page.
    fn page_delay(&self) -> Duration {
        let jitter_ms = self.wait_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.wait_time + Duration::from_millis(jitter)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the `search_query` parameter.
///
/// Categories win when configured; otherwise each keyword becomes an
/// `all:"..."` phrase term.
pub fn build_query(categories: &[String], keywords: &KeywordSet) -> String {
    if !categories.is_empty() {
        return categories
            .iter()
            .map(|c| format!("cat:{}", c))
            .collect::<Vec<_>>()
            .join(" OR ");
    }
    keywords
        .iter()
        .map(|k| format!("all:\"{}\"", k.as_str()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Reduce an arXiv entry id or abs URL to the versionless identifier.
///
/// `http://arxiv.org/abs/2301.07041v2` becomes `2301.07041`, and
/// `http://arxiv.org/abs/math.AG/0601001v1` becomes `math.AG/0601001`.
pub fn normalize_arxiv_id(raw: &str) -> PaperId {
    let raw = raw.trim();
    let id = match raw.find("/abs/") {
        Some(pos) => &raw[pos + "/abs/".len()..],
        None => raw,
    };
    let id = match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &id[..pos]
        }
        _ => id,
    };
    PaperId::new(id)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Atom feed
// ============================================================================

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

impl Entry {
    /// arXiv reports query errors as a single entry under `/api/errors`.
    fn is_api_error(&self) -> bool {
        self.id.contains("/api/errors")
    }

    fn into_record(self, published: DateTime<Utc>) -> PaperRecord {
        let id = normalize_arxiv_id(&self.id);
        let url = format!("https://arxiv.org/abs/{}", id);
        PaperRecord::new(
            id.as_str(),
            collapse_whitespace(&self.title),
            collapse_whitespace(&self.summary),
        )
        .with_url(url)
        .with_published(published)
        .with_authors(self.authors.into_iter().map(|a| collapse_whitespace(&a.name)))
    }
}

/// Parse one Atom response page.
fn parse_feed(body: &str) -> Result<Vec<Entry>> {
    let feed: Feed = quick_xml::de::from_str(body)
        .map_err(|e| Error::Fetch(format!("Failed to parse arXiv feed: {}", e)))?;

    if let Some(err) = feed.entries.iter().find(|e| e.is_api_error()) {
        return Err(Error::Fetch(format!(
            "arXiv rejected query: {}",
            collapse_whitespace(&err.summary)
        )));
    }
    Ok(feed.entries)
}

// ============================================================================
// Source
// ============================================================================

/// arXiv implementation of [`PaperSource`].
pub struct ArxivSource {
    client: Client,
    config: ArxivConfig,
}

impl ArxivSource {
    /// Create a source with the given configuration.
    pub fn new(config: ArxivConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("paperbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "sources",
            component = "arxiv",
            url = %config.base_url,
            categories = ?config.categories,
            page_size = config.page_size,
            max_results = config.max_results,
            "Initializing arXiv source"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ArxivConfig::from_env())
    }

    pub fn config(&self) -> &ArxivConfig {
        &self.config
    }

    async fn fetch_page(&self, query: &str, start: usize, count: usize) -> Result<Vec<Entry>> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("search_query", query.to_string()),
                ("start", start.to_string()),
                ("max_results", count.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("arXiv request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!("arXiv returned {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to read arXiv response: {}", e)))?;
        parse_feed(&body)
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    #[instrument(skip(self, keywords), fields(subsystem = "sources", component = "arxiv", op = "fetch_candidates"))]
    async fn fetch_candidates(&self, keywords: &KeywordSet) -> Result<Vec<PaperRecord>> {
        let query = build_query(&self.config.categories, keywords);
        if query.is_empty() {
            debug!("Nothing to query");
            return Ok(Vec::new());
        }

        let cutoff = Utc::now() - self.config.lookback;
        let mut papers = Vec::new();
        let mut start = 0;

        while start < self.config.max_results {
            if start > 0 {
                tokio::time::sleep(self.config.page_delay()).await;
            }

            let count = self.config.page_size.min(self.config.max_results - start);
            let entries = self.fetch_page(&query, start, count).await?;
            let received = entries.len();
            debug!(start, received, "Fetched arXiv page");

            let mut past_window = false;
            for entry in entries {
                let Some(published) = entry.published else {
                    warn!(entry_id = %entry.id, "arXiv entry without publication date skipped");
                    continue;
                };
                if published < cutoff {
                    past_window = true;
                    break;
                }
                papers.push(entry.into_record(published));
            }

            if past_window || received < count {
                break;
            }
            start += count;
        }

        info!(candidates = papers.len(), "arXiv fetch complete");
        Ok(papers)
    }

    fn name(&self) -> &str {
        "arxiv"
    }
}
