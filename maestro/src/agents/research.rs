//! Research agent: one cycle = generate queries, fan search out over the
//! enabled tools, dedupe and rerank results, synthesize notes.

use serde_json::json;

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{MissionContext, Note, QuestionSet, ReportSection, SourceType};
use crate::tools::{ChunkHit, WebResult, TOOL_DOCUMENT_SEARCH, TOOL_WEB_FETCH, TOOL_WEB_SEARCH};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "research";

/// Queries generated per cycle.
const MAX_QUERIES_PER_CYCLE: usize = 3;

const QUERY_SYSTEM_PROMPT: &str = "\
You write search queries for a research assistant. Given a report section and \
the current goals and reminders, produce the queries most likely to surface \
missing information. Queries must be standalone search strings.";

const NOTE_SYSTEM_PROMPT: &str = "\
You extract evidence. Given source text and the section it should serve, \
write one self-contained note: a factual claim grounded in the source, \
dense enough to be used without re-reading the source. Plain text only.";

/// A search result normalized across tools before note synthesis.
struct Candidate {
    source_type: SourceType,
    source_id: String,
    title: String,
    text: String,
    doc_id: Option<String>,
    score: f32,
}

/// Runs one research cycle for a section. Returns the number of notes added,
/// or `None` when the mission stopped mid-cycle.
pub async fn run_cycle(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    section: &ReportSection,
    round: u32,
) -> AgentStep<usize> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let settings = &ctx.metadata.mission_settings;
    let (doc_k, web_k) = if round == 0 {
        (
            settings.initial_exploration_doc_results(),
            settings.initial_exploration_web_results(),
        )
    } else {
        (
            settings.main_research_doc_results(),
            settings.main_research_web_results(),
        )
    };

    let queries = match generate_queries(runtime, control, ctx, section).await? {
        Some(q) => q,
        None => return Ok(None),
    };

    let mut candidates: Vec<Candidate> = Vec::new();
    let tool_ctx = runtime.tool_ctx(control);
    for query in &queries {
        if !control.should_continue().await {
            return Ok(None);
        }
        if ctx.metadata.tool_selection.local_rag && runtime.tools.contains(TOOL_DOCUMENT_SEARCH) {
            let mut args = json!({ "query": query, "k": doc_k });
            if let Some(group) = &ctx.metadata.document_group_id {
                args["document_group_id"] = json!(group);
            }
            match runtime
                .tools
                .call(TOOL_DOCUMENT_SEARCH, args, Some(&tool_ctx))
                .await
            {
                Ok(out) => {
                    let _ = runtime
                        .store
                        .record_search_call(control.mission_id(), false)
                        .await;
                    let hits: Vec<ChunkHit> =
                        serde_json::from_value(out.value).unwrap_or_default();
                    candidates.extend(hits.into_iter().map(|h| Candidate {
                        source_type: SourceType::Document,
                        source_id: h.chunk_id,
                        title: h
                            .metadata
                            .get("title")
                            .and_then(|v| v.as_str())
                            .unwrap_or(&h.doc_id)
                            .to_string(),
                        text: h.text,
                        doc_id: Some(h.doc_id),
                        score: h.score,
                    }));
                }
                Err(e) => {
                    runtime
                        .log_warning(
                            control.mission_id(),
                            AGENT_NAME,
                            "document search",
                            e.to_string(),
                        )
                        .await;
                }
            }
        }
        if ctx.metadata.tool_selection.web_search && runtime.tools.contains(TOOL_WEB_SEARCH) {
            let args = json!({ "query": query, "max_results": web_k });
            match runtime.tools.call(TOOL_WEB_SEARCH, args, Some(&tool_ctx)).await {
                Ok(out) => {
                    let _ = runtime
                        .store
                        .record_search_call(control.mission_id(), true)
                        .await;
                    let results: Vec<WebResult> =
                        serde_json::from_value(out.value).unwrap_or_default();
                    candidates.extend(results.into_iter().map(|r| Candidate {
                        source_type: SourceType::Web,
                        source_id: r.url,
                        title: r.title,
                        text: r.snippet,
                        doc_id: None,
                        score: r.score,
                    }));
                }
                Err(e) => {
                    runtime
                        .log_warning(
                            control.mission_id(),
                            AGENT_NAME,
                            "web search",
                            e.to_string(),
                        )
                        .await;
                }
            }
        }
    }

    let keep = doc_k + web_k;
    let survivors = dedupe_and_rerank(candidates, ctx, &section.description, keep);
    let mut added = 0usize;
    for candidate in survivors {
        if !control.should_continue().await {
            return Ok(None);
        }
        match synthesize_note(runtime, control, section, candidate).await? {
            Some(note) => {
                if runtime
                    .store
                    .upsert_note(control.mission_id(), note)
                    .await
                    .is_ok()
                {
                    added += 1;
                }
            }
            None => return Ok(None),
        }
    }
    Ok(Some(added))
}

async fn generate_queries(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    section: &ReportSection,
) -> AgentStep<Vec<String>> {
    let goals: String = ctx
        .active_goals()
        .iter()
        .map(|g| format!("- {}\n", g.text))
        .collect();
    let thoughts: String = ctx
        .recent_thoughts(ctx.metadata.mission_settings.thought_pad_context_limit())
        .iter()
        .map(|t| format!("- {}\n", t.text))
        .collect();
    let messages = vec![
        Message::system(QUERY_SYSTEM_PROMPT),
        Message::user(format!(
            "Section '{}': {}\n\nGoals:\n{}\nReminders:\n{}\nProduce at most {} queries.",
            section.title, section.description, goals, thoughts, MAX_QUERIES_PER_CYCLE
        )),
    ];
    match runtime
        .dispatcher
        .complete_structured::<QuestionSet>(
            ModelTier::Fast,
            &messages,
            QuestionSet::schema(),
            control.cancel_token(),
        )
        .await
    {
        Ok((set, details)) => {
            let mut queries = set.questions;
            queries.retain(|q| !q.trim().is_empty());
            queries.truncate(MAX_QUERIES_PER_CYCLE);
            if queries.is_empty() {
                queries.push(section.description.clone());
            }
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "generate queries",
                    summarize(&section.description, 150),
                    format!("{} queries", queries.len()),
                    details,
                )
                .await;
            Ok(Some(queries))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "generate queries",
                    format!("using section description as query: {}", e),
                )
                .await;
            Ok(Some(vec![section.description.clone()]))
        }
    }
}

/// Drops results whose source is already noted, collapses duplicate sources,
/// reranks by relevance to the section description, keeps the top `keep`.
fn dedupe_and_rerank(
    candidates: Vec<Candidate>,
    ctx: &MissionContext,
    section_description: &str,
    keep: usize,
) -> Vec<Candidate> {
    let known: std::collections::HashSet<&str> =
        ctx.notes.iter().map(|n| n.source_id.as_str()).collect();
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| !known.contains(c.source_id.as_str()))
        .filter(|c| seen.insert(c.source_id.clone()))
        .map(|mut c| {
            c.score = 0.5 * c.score + 0.5 * overlap_score(section_description, &c.text);
            c
        })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(keep);
    out
}

/// Term-overlap relevance in [0, 1].
fn overlap_score(reference: &str, text: &str) -> f32 {
    let text_lower = text.to_lowercase();
    let terms: Vec<String> = reference
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 3)
        .map(str::to_string)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

/// Produces one note from a candidate. Web candidates are fetched first when
/// the fetch tool is available; synthesis failures degrade to the raw excerpt.
async fn synthesize_note(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    section: &ReportSection,
    candidate: Candidate,
) -> AgentStep<Note> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let mut source_text = candidate.text.clone();
    let mut title = candidate.title.clone();
    if candidate.source_type == SourceType::Web && runtime.tools.contains(TOOL_WEB_FETCH) {
        let tool_ctx = runtime.tool_ctx(control);
        match runtime
            .tools
            .call(TOOL_WEB_FETCH, json!({ "url": candidate.source_id }), Some(&tool_ctx))
            .await
        {
            Ok(out) => {
                if let Some(text) = out.value.get("text").and_then(|v| v.as_str()) {
                    source_text = summarize(text, 6000);
                }
                if let Some(t) = out.value.get("title").and_then(|v| v.as_str()) {
                    if !t.is_empty() {
                        title = t.to_string();
                    }
                }
            }
            Err(e) => {
                runtime
                    .log_warning(
                        control.mission_id(),
                        AGENT_NAME,
                        "web fetch",
                        format!("{} ({})", e, candidate.source_id),
                    )
                    .await;
            }
        }
    }

    let messages = vec![
        Message::system(NOTE_SYSTEM_PROMPT),
        Message::user(format!(
            "Section: {}\n\nSource ({}):\n{}",
            section.description,
            candidate.source_id,
            summarize(&source_text, 6000)
        )),
    ];
    let content = match runtime
        .dispatcher
        .complete(ModelTier::Fast, &messages, control.cancel_token())
        .await
    {
        Ok((text, details)) => {
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "synthesize note",
                    summarize(&candidate.source_id, 120),
                    summarize(&text, 150),
                    details,
                )
                .await;
            text
        }
        Err(DispatchError::Cancelled) => return Ok(None),
        Err(e) if e.is_fatal_for_mission() => return Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "synthesize note",
                    format!("keeping raw excerpt: {}", e),
                )
                .await;
            summarize(&source_text, 600)
        }
    };

    let mut note = Note::new(content, candidate.source_type, candidate.source_id)
        .with_metadata("title", json!(title))
        .with_metadata("section_hint", json!(section.section_id));
    if let Some(doc_id) = candidate.doc_id {
        note = note.with_metadata("doc_id", json!(doc_id));
    }
    Ok(Some(note))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, MemoryPersistence};
    use crate::dispatch::ModelDispatcher;
    use crate::llm::MockLlm;
    use crate::schemas::{MissionStatus, ToolSelection};
    use crate::tools::{
        DocumentSearchTool, InMemoryDocumentIndex, StaticSearchProvider, ToolRegistry,
        WebSearchTool,
    };
    use std::sync::Arc;

    async fn setup(
        selection: ToolSelection,
        mock: MockLlm,
    ) -> (AgentRuntime, ControlHandle, MissionContext) {
        let store = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
        let created = store
            .create_mission("u", "c", "Summarize the CAP theorem", selection, None, None)
            .await
            .unwrap();
        store
            .update_status(&created.mission_id, MissionStatus::Planning, None)
            .await
            .unwrap();
        store
            .update_status(&created.mission_id, MissionStatus::Running, None)
            .await
            .unwrap();

        let mut index = InMemoryDocumentIndex::new();
        index.add_chunk(
            None,
            "chunk-1",
            "doc-1",
            "The CAP theorem says consistency availability partition tolerance trade off",
        );
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(DocumentSearchTool::new(Arc::new(index))));
        tools.register(Arc::new(WebSearchTool::new(Arc::new(
            StaticSearchProvider::single(
                "https://example.com/cap",
                "CAP explained",
                "consistency availability partition tolerance theorem trade off",
            ),
        ))));

        let runtime = AgentRuntime {
            store: store.clone(),
            dispatcher: Arc::new(ModelDispatcher::with_client_for_all(Arc::new(mock))),
            tools: Arc::new(tools),
            events: None,
        };
        let control = ControlHandle::new(created.mission_id.clone(), store.clone());
        let ctx = store.get(&created.mission_id).await.unwrap();
        (runtime, control, ctx)
    }

    fn section() -> ReportSection {
        ReportSection::new(
            "cap",
            "The CAP theorem",
            "consistency availability partition tolerance trade off",
        )
    }

    #[tokio::test]
    async fn cycle_mints_notes_from_both_tools() {
        // Query generation returns JSON; note synthesis returns plain text.
        let mock = MockLlm::new("A self-contained claim about CAP.");
        mock.push(r#"{"questions": ["cap theorem trade off"]}"#);
        let (runtime, control, ctx) = setup(ToolSelection::default(), mock).await;
        let added = run_cycle(&runtime, &control, &ctx, &section(), 0)
            .await
            .unwrap()
            .unwrap();
        assert!(added >= 2, "expected doc + web notes, got {}", added);
        let stored = runtime.store.get(control.mission_id()).await.unwrap();
        assert!(stored.notes.iter().any(|n| n.source_type == SourceType::Document));
        assert!(stored.notes.iter().any(|n| n.source_type == SourceType::Web));
        assert_eq!(stored.stats.total_doc_search_calls, 1);
        assert_eq!(stored.stats.total_web_search_calls, 1);
    }

    #[tokio::test]
    async fn disabled_tools_produce_no_notes() {
        let mock = MockLlm::new("note text");
        mock.push(r#"{"questions": ["q"]}"#);
        let selection = ToolSelection {
            local_rag: false,
            web_search: false,
        };
        let (runtime, control, ctx) = setup(selection, mock).await;
        let added = run_cycle(&runtime, &control, &ctx, &section(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added, 0);
        let stored = runtime.store.get(control.mission_id()).await.unwrap();
        assert_eq!(stored.stats.total_doc_search_calls, 0);
        assert_eq!(stored.stats.total_web_search_calls, 0);
    }

    #[tokio::test]
    async fn duplicate_sources_are_not_renoted() {
        let mock = MockLlm::new("note text");
        mock.push(r#"{"questions": ["cap theorem"]}"#);
        let (runtime, control, mut ctx) = setup(ToolSelection::default(), mock).await;
        // Pre-existing notes for both sources.
        let doc_note = Note::new("existing", SourceType::Document, "chunk-1");
        let web_note = Note::new("existing", SourceType::Web, "https://example.com/cap");
        runtime
            .store
            .upsert_note(control.mission_id(), doc_note)
            .await
            .unwrap();
        runtime
            .store
            .upsert_note(control.mission_id(), web_note)
            .await
            .unwrap();
        ctx = runtime.store.get(control.mission_id()).await.unwrap();

        let added = run_cycle(&runtime, &control, &ctx, &section(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn stop_mid_cycle_unwinds_cleanly() {
        let mock = MockLlm::new("note text");
        let (runtime, control, ctx) = setup(ToolSelection::default(), mock).await;
        runtime
            .store
            .update_status(control.mission_id(), MissionStatus::Stopped, None)
            .await
            .unwrap();
        let out = run_cycle(&runtime, &control, &ctx, &section(), 1).await.unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn overlap_score_orders_relevance() {
        let reference = "consistency availability partition tolerance";
        let relevant = "partition tolerance forces choosing consistency or availability";
        let irrelevant = "bananas are yellow";
        assert!(overlap_score(reference, relevant) > overlap_score(reference, irrelevant));
    }
}
