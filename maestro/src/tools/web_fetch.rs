//! Web fetch: URL → extracted page text, with a 24 h disk cache and a
//! process-wide concurrency cap.
//!
//! Two backends share one cache directory, namespaced by a key prefix: the
//! native extractor (plain GET + tag stripping) and a remote reader API that
//! returns pre-extracted text. Cache writes are best-effort; failures warn.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mission_event::MissionEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
use crate::error::ToolError;
use crate::governor;

pub const TOOL_WEB_FETCH: &str = "web_fetch";

/// Default wall-clock limit for one fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Extracted page content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, Value>,
}

#[derive(Clone, Serialize, Deserialize)]
struct CacheEntry {
    fetched_at: DateTime<Utc>,
    page: FetchedPage,
}

/// Which extractor produces the text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FetchBackend {
    /// GET the page and strip markup locally.
    #[default]
    Native,
    /// Remote reader API returning extracted text (`WEB_READER_URL` prefix).
    Reader,
}

impl FetchBackend {
    fn cache_prefix(&self) -> &'static str {
        match self {
            FetchBackend::Native => "native",
            FetchBackend::Reader => "reader",
        }
    }
}

pub struct WebFetchTool {
    client: reqwest::Client,
    cache_dir: PathBuf,
    cache_ttl: Duration,
    backend: FetchBackend,
    reader_url: Option<String>,
}

impl WebFetchTool {
    pub fn new(cache_dir: PathBuf, cache_ttl: Duration, backend: FetchBackend) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir,
            cache_ttl,
            backend,
            reader_url: std::env::var("WEB_READER_URL").ok(),
        }
    }

    pub fn from_caps(caps: &env_config::RuntimeCaps) -> Self {
        Self::new(
            caps.web_fetch_cache_dir.clone(),
            Duration::from_secs(caps.web_fetch_cache_ttl_secs),
            FetchBackend::default(),
        )
    }

    pub fn with_reader_url(mut self, url: impl Into<String>) -> Self {
        self.reader_url = Some(url.into());
        self.backend = FetchBackend::Reader;
        self
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.backend.cache_prefix().as_bytes());
        hasher.update(b":");
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.cache_dir.join(format!("{}.json", hex))
    }

    fn cache_get(&self, url: &str) -> Option<FetchedPage> {
        let path = self.cache_path(url);
        let raw = std::fs::read_to_string(path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        if age.to_std().ok()? <= self.cache_ttl {
            Some(entry.page)
        } else {
            None
        }
    }

    fn cache_put(&self, page: &FetchedPage) {
        let entry = CacheEntry {
            fetched_at: Utc::now(),
            page: page.clone(),
        };
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.cache_dir)?;
            let body = serde_json::to_string(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            std::fs::write(self.cache_path(&page.url), body)
        };
        if let Err(e) = write() {
            tracing::warn!(url = %page.url, error = %e, "web fetch cache write failed");
        }
    }

    async fn fetch_uncached(&self, url: &str) -> Result<FetchedPage, ToolError> {
        match self.backend {
            FetchBackend::Native => self.fetch_native(url).await,
            FetchBackend::Reader => self.fetch_reader(url).await,
        }
    }

    async fn fetch_native(&self, url: &str) -> Result<FetchedPage, ToolError> {
        let response = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(url).send())
            .await
            .map_err(|_| ToolError::Timeout(url.to_string()))?
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "fetch failed with status {}",
                response.status()
            )));
        }
        let html = tokio::time::timeout(FETCH_TIMEOUT, response.text())
            .await
            .map_err(|_| ToolError::Timeout(url.to_string()))?
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        let (title, text) = extract_text(&html);
        Ok(FetchedPage {
            url: url.to_string(),
            title,
            text,
            metadata: Default::default(),
        })
    }

    async fn fetch_reader(&self, url: &str) -> Result<FetchedPage, ToolError> {
        let reader = self
            .reader_url
            .as_deref()
            .ok_or_else(|| ToolError::Execution("reader backend without WEB_READER_URL".into()))?;
        let endpoint = format!("{}/{}", reader.trim_end_matches('/'), url);
        let response = tokio::time::timeout(FETCH_TIMEOUT, self.client.get(&endpoint).send())
            .await
            .map_err(|_| ToolError::Timeout(url.to_string()))?
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if response.status().as_u16() == 429 {
            return Err(ToolError::Transport("reader API rate limited".into()));
        }
        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "reader API status {}",
                response.status()
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        // Reader output leads with "Title: ..." when it found one.
        let title = text
            .lines()
            .find_map(|l| l.strip_prefix("Title: "))
            .unwrap_or("")
            .to_string();
        Ok(FetchedPage {
            url: url.to_string(),
            title,
            text,
            metadata: Default::default(),
        })
    }

    /// Fetches a page through cache + semaphore, emitting progress events.
    pub async fn fetch(
        &self,
        url: &str,
        ctx: Option<&ToolCallContext>,
    ) -> Result<FetchedPage, ToolError> {
        if let Some(page) = self.cache_get(url) {
            if let Some(ctx) = ctx {
                ctx.emit(MissionEvent::WebFetchCacheHit {
                    url: url.to_string(),
                })
                .await;
            }
            return Ok(page);
        }

        let semaphore = governor::web_fetch_semaphore();
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| ToolError::Execution("fetch semaphore closed".into()))?;

        if let Some(ctx) = ctx {
            ctx.emit(MissionEvent::WebFetchStart {
                url: url.to_string(),
            })
            .await;
        }
        let result = self.fetch_uncached(url).await;
        if let Some(ctx) = ctx {
            ctx.emit(MissionEvent::WebFetchComplete {
                url: url.to_string(),
                status: if result.is_ok() { "success" } else { "failure" }.to_string(),
            })
            .await;
        }
        let page = result?;
        self.cache_put(&page);
        Ok(page)
    }
}

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>",
    )
    .unwrap()
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strips markup to plain text; returns `(title, text)`.
fn extract_text(html: &str) -> (String, String) {
    let title = TITLE_RE
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    let no_scripts = SCRIPT_RE.replace_all(html, "\n");
    let no_tags = TAG_RE.replace_all(&no_scripts, "\n");
    let decoded = no_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let squeezed = WS_RE.replace_all(&decoded, " ");
    let lines: Vec<&str> = squeezed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let text = BLANK_RE.replace_all(&lines.join("\n"), "\n\n").to_string();
    (title, text)
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        TOOL_WEB_FETCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WEB_FETCH.into(),
            description: Some("Fetch a web page and return its extracted text.".into()),
            input_schema: json!({
                "type": "object",
                "required": ["url"],
                "properties": { "url": { "type": "string" } }
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'url'".into()))?;
        let page = self.fetch(url, ctx).await?;
        Ok(ToolOutput::new(serde_json::to_value(page).map_err(
            |e| ToolError::Execution(e.to_string()),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extract_text_strips_scripts_and_tags() {
        let html = r#"
            <html><head><title>My Page</title>
            <script>var x = "<p>not content</p>";</script>
            <style>.a { color: red }</style></head>
            <body><h1>Heading</h1><p>First &amp; second.</p></body></html>
        "#;
        let (title, text) = extract_text(html);
        assert_eq!(title, "My Page");
        assert!(text.contains("Heading"));
        assert!(text.contains("First & second."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn cache_round_trip_and_prefix_separation() {
        let dir = tempdir().unwrap();
        let native = WebFetchTool::new(
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
            FetchBackend::Native,
        );
        let page = FetchedPage {
            url: "https://example.com/a".into(),
            title: "T".into(),
            text: "body".into(),
            metadata: Default::default(),
        };
        native.cache_put(&page);
        let hit = native.cache_get("https://example.com/a").unwrap();
        assert_eq!(hit.text, "body");

        // Same URL under the reader prefix is a distinct cache entry.
        let reader = WebFetchTool::new(
            dir.path().to_path_buf(),
            Duration::from_secs(3600),
            FetchBackend::Reader,
        );
        assert!(reader.cache_get("https://example.com/a").is_none());
    }

    #[test]
    fn expired_cache_entry_misses() {
        let dir = tempdir().unwrap();
        let tool = WebFetchTool::new(
            dir.path().to_path_buf(),
            Duration::from_secs(0),
            FetchBackend::Native,
        );
        let page = FetchedPage {
            url: "https://example.com/b".into(),
            title: "".into(),
            text: "old".into(),
            metadata: Default::default(),
        };
        tool.cache_put(&page);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(tool.cache_get("https://example.com/b").is_none());
    }

    #[tokio::test]
    async fn missing_url_argument_rejected() {
        let dir = tempdir().unwrap();
        let tool = WebFetchTool::new(
            dir.path().to_path_buf(),
            Duration::from_secs(10),
            FetchBackend::Native,
        );
        let err = tool.call(json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
