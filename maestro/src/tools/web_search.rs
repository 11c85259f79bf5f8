//! Web search tool. The provider speaks an HTTP search API; the tool layers
//! query analysis on top (date ranges, domain hints, depth) so agents can
//! pass a bare query and still get scoped searches.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::query_analyzer::{analyze_query, SearchDepth};
use super::r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
use crate::error::ToolError;

pub const TOOL_WEB_SEARCH: &str = "web_search";

const NUM_RESULTS_MAX: usize = 50;

/// One web search result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    pub score: f32,
}

/// Parameters for one provider search request.
#[derive(Clone, Debug, Default)]
pub struct WebSearchParams {
    pub query: String,
    pub max_results: usize,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub depth: SearchDepth,
}

/// Seam to the search API.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, params: &WebSearchParams) -> Result<Vec<WebResult>, ToolError>;
}

/// HTTP provider posting to a search endpoint (`WEB_SEARCH_URL`,
/// `WEB_SEARCH_API_KEY`). Request/response shapes follow the common
/// neural-search API convention.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("WEB_SEARCH_URL").ok()?;
        let api_key = std::env::var("WEB_SEARCH_API_KEY").unwrap_or_default();
        Some(Self::new(endpoint, api_key))
    }

    fn build_body(params: &WebSearchParams) -> Value {
        let mut body = json!({
            "query": params.query,
            "numResults": params.max_results.min(NUM_RESULTS_MAX),
            "type": match params.depth {
                SearchDepth::Standard => "auto",
                SearchDepth::Advanced => "neural",
            },
            "contents": { "text": { "maxCharacters": 1500 } },
        });
        let obj = body.as_object_mut().expect("body is an object");
        if !params.include_domains.is_empty() {
            obj.insert("includeDomains".into(), json!(params.include_domains));
        }
        if !params.exclude_domains.is_empty() {
            obj.insert("excludeDomains".into(), json!(params.exclude_domains));
        }
        if let Some(from) = &params.from_date {
            obj.insert("startPublishedDate".into(), json!(from));
        }
        if let Some(to) = &params.to_date {
            obj.insert("endPublishedDate".into(), json!(to));
        }
        body
    }

    fn parse_results(value: &Value) -> Vec<WebResult> {
        value
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| {
                        let url = r.get("url").and_then(Value::as_str)?;
                        Some(WebResult {
                            url: url.to_string(),
                            title: r
                                .get("title")
                                .and_then(Value::as_str)
                                .unwrap_or("(no title)")
                                .to_string(),
                            snippet: r
                                .get("text")
                                .or_else(|| r.get("snippet"))
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            published: r
                                .get("publishedDate")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            score: r
                                .get("score")
                                .and_then(Value::as_f64)
                                .unwrap_or(1.0 / (i + 1) as f64)
                                as f32,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl WebSearchProvider for HttpSearchProvider {
    async fn search(&self, params: &WebSearchParams) -> Result<Vec<WebResult>, ToolError> {
        let res = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&Self::build_body(params))
            .send()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ToolError::Transport(format!(
                "search API error {}: {}",
                status, body
            )));
        }
        let out: Value = res
            .json()
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))?;
        Ok(Self::parse_results(&out))
    }
}

/// Provider returning fixed results. Used in tests and offline runs.
#[derive(Default)]
pub struct StaticSearchProvider {
    results: Vec<WebResult>,
}

impl StaticSearchProvider {
    pub fn new(results: Vec<WebResult>) -> Self {
        Self { results }
    }

    pub fn single(url: &str, title: &str, snippet: &str) -> Self {
        Self::new(vec![WebResult {
            url: url.to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
            published: None,
            score: 1.0,
        }])
    }
}

#[async_trait]
impl WebSearchProvider for StaticSearchProvider {
    async fn search(&self, params: &WebSearchParams) -> Result<Vec<WebResult>, ToolError> {
        let mut out = self.results.clone();
        out.truncate(params.max_results.max(1));
        Ok(out)
    }
}

/// The `web_search` tool. Analyzes the query to derive dates, domains and
/// depth, then merges explicit arguments on top (explicit wins).
pub struct WebSearchTool {
    provider: Arc<dyn WebSearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn WebSearchProvider>) -> Self {
        Self { provider }
    }

    /// Builds provider params for a query: analysis first, explicit overrides second.
    pub fn resolve_params(args: &Value) -> Result<WebSearchParams, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query'".into()))?
            .to_string();
        let analysis = analyze_query(&query, chrono::Utc::now().date_naive());
        let str_list = |key: &str| -> Option<Vec<String>> {
            args.get(key).and_then(Value::as_array).map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
        };
        Ok(WebSearchParams {
            max_results: args
                .get("max_results")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .or(analysis.max_results)
                .unwrap_or(5),
            from_date: args
                .get("from_date")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(analysis.from_date),
            to_date: args
                .get("to_date")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(analysis.to_date),
            include_domains: str_list("include_domains").unwrap_or(analysis.include_domains),
            exclude_domains: str_list("exclude_domains").unwrap_or(analysis.exclude_domains),
            depth: match args.get("depth").and_then(Value::as_str) {
                Some("advanced") => SearchDepth::Advanced,
                Some(_) => SearchDepth::Standard,
                None => analysis.depth,
            },
            query,
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        TOOL_WEB_SEARCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WEB_SEARCH.into(),
            description: Some(
                "Search the web. Date ranges, domain filters and depth are \
                 derived from the query when not given explicitly."
                    .into(),
            ),
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": { "type": "string" },
                    "max_results": { "type": "integer", "minimum": 1 },
                    "from_date": { "type": "string" },
                    "to_date": { "type": "string" },
                    "include_domains": { "type": "array", "items": { "type": "string" } },
                    "exclude_domains": { "type": "array", "items": { "type": "string" } },
                    "depth": { "type": "string", "enum": ["standard", "advanced"] }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError> {
        let params = Self::resolve_params(&args)?;
        let results = self.provider.search(&params).await?;
        Ok(ToolOutput::new(serde_json::to_value(results).map_err(
            |e| ToolError::Execution(e.to_string()),
        )?))
    }
}
