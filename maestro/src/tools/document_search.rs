//! Document search over the local corpus. The vector store itself is an
//! external collaborator behind [`DocumentSearcher`]; the core only calls
//! `search(query, k, filters)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::r#trait::{Tool, ToolCallContext, ToolOutput, ToolSpec};
use crate::error::ToolError;

pub const TOOL_DOCUMENT_SEARCH: &str = "document_search";

/// One retrieved chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Retrieval filters: restrict to a document group and/or explicit doc ids.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocSearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
}

/// Seam to the vector store.
#[async_trait]
pub trait DocumentSearcher: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &DocSearchFilters,
    ) -> Result<Vec<ChunkHit>, ToolError>;
}

/// Tool wrapper: `{query, k?, document_group_id?, doc_ids?}` → list of hits.
pub struct DocumentSearchTool {
    searcher: Arc<dyn DocumentSearcher>,
}

impl DocumentSearchTool {
    pub fn new(searcher: Arc<dyn DocumentSearcher>) -> Self {
        Self { searcher }
    }
}

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &str {
        TOOL_DOCUMENT_SEARCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_DOCUMENT_SEARCH.into(),
            description: Some(
                "Search the local document corpus for relevant chunks.".into(),
            ),
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": { "type": "string" },
                    "k": { "type": "integer", "minimum": 1 },
                    "document_group_id": { "type": "string" },
                    "doc_ids": { "type": "array", "items": { "type": "string" } }
                }
            }),
        }
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolOutput, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query'".into()))?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let filters = DocSearchFilters {
            document_group_id: args
                .get("document_group_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            doc_ids: args.get("doc_ids").and_then(Value::as_array).map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
        };
        let hits = self.searcher.search(query, k, &filters).await?;
        Ok(ToolOutput::new(serde_json::to_value(hits).map_err(
            |e| ToolError::Execution(e.to_string()),
        )?))
    }
}

/// Term-overlap index over in-memory chunks. Stands in for the vector store
/// in tests and offline runs; scoring is plain token overlap, not embeddings.
#[derive(Default)]
pub struct InMemoryDocumentIndex {
    chunks: Vec<(Option<String>, ChunkHit)>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(
        &mut self,
        group: Option<String>,
        chunk_id: impl Into<String>,
        doc_id: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.chunks.push((
            group,
            ChunkHit {
                chunk_id: chunk_id.into(),
                doc_id: doc_id.into(),
                text: text.into(),
                score: 0.0,
                metadata: BTreeMap::new(),
            },
        ));
    }

    fn score(query: &str, text: &str) -> f32 {
        let text_lower = text.to_lowercase();
        let terms: Vec<&str> = query.split_whitespace().collect();
        if terms.is_empty() {
            return 0.0;
        }
        let hits = terms
            .iter()
            .filter(|t| text_lower.contains(&t.to_lowercase()))
            .count();
        hits as f32 / terms.len() as f32
    }
}

#[async_trait]
impl DocumentSearcher for InMemoryDocumentIndex {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &DocSearchFilters,
    ) -> Result<Vec<ChunkHit>, ToolError> {
        let mut hits: Vec<ChunkHit> = self
            .chunks
            .iter()
            .filter(|(group, hit)| {
                if let Some(want) = &filters.document_group_id {
                    if group.as_deref() != Some(want.as_str()) {
                        return false;
                    }
                }
                if let Some(ids) = &filters.doc_ids {
                    if !ids.contains(&hit.doc_id) {
                        return false;
                    }
                }
                true
            })
            .map(|(_, hit)| {
                let mut h = hit.clone();
                h.score = Self::score(query, &h.text);
                h
            })
            .filter(|h| h.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
