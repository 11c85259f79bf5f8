//! Writing agent: drafts one section at a time, following its research
//! strategy. Research-based sections cite assigned notes with bracketed note
//! ids; content-based sections draw only on sibling drafts; synthesis parents
//! summarize their already-written children.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{MissionContext, Note, ReportSection, RequestAnalysis, ResearchStrategy};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "writer";

/// Placeholder stored when a section has nothing to write from; later passes
/// may replace it.
pub const PLACEHOLDER_TEXT: &str = "No research available for this section.";

const RESEARCH_SYSTEM_PROMPT: &str = "\
You write one section of a research report in markdown. Use only the notes \
given. Every factual claim must end with the bracketed id of its supporting \
note, e.g. [note_ab12] or [note_ab12][note_cd34] for multi-source claims. Do \
not invent sources, do not write headings for other sections.";

const CONTENT_SYSTEM_PROMPT: &str = "\
You write connective sections (introduction, conclusion) of a research \
report in markdown. Use only the content of the sibling sections provided; \
introduce or summarize, add no new factual claims and no citations.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You write a parent section that summarizes its already-written subsections \
in markdown. Stay faithful to the children's content; add no new claims.";

/// Inputs for one section draft.
pub struct SectionDraftInputs<'a> {
    pub section: &'a ReportSection,
    pub assigned_notes: Vec<&'a Note>,
    pub sibling_titles: Vec<String>,
    /// Drafts of other sections this strategy may read from
    /// (siblings for content-based, children for synthesis).
    pub reference_drafts: Vec<(String, String)>,
    pub prior_draft: Option<String>,
    pub pass: u32,
}

/// Writes or revises one section. Returns markdown; failures degrade to the
/// prior draft or the placeholder.
pub async fn write_section(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    analysis: Option<&RequestAnalysis>,
    inputs: SectionDraftInputs<'_>,
) -> AgentStep<String> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let section = inputs.section;
    if section.research_strategy == ResearchStrategy::ResearchBased
        && inputs.assigned_notes.is_empty()
        && inputs.prior_draft.is_none()
    {
        return Ok(Some(PLACEHOLDER_TEXT.to_string()));
    }

    let (system, body) = build_prompt(ctx, analysis, &inputs);
    let messages = vec![Message::system(system), Message::user(body)];
    match runtime
        .dispatcher
        .complete(ModelTier::Intelligent, &messages, control.cancel_token())
        .await
    {
        Ok((markdown, details)) => {
            let known: Vec<&str> = inputs
                .assigned_notes
                .iter()
                .map(|n| n.note_id.as_str())
                .collect();
            let cleaned = sanitize_note_refs(&markdown, &known);
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    if inputs.pass == 1 {
                        "draft section"
                    } else {
                        "revise section"
                    },
                    section.section_id.clone(),
                    format!("{} chars", cleaned.len()),
                    details,
                )
                .await;
            Ok(Some(cleaned))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_failure(
                    control.mission_id(),
                    AGENT_NAME,
                    "draft section",
                    format!("{} ({})", e, section.section_id),
                )
                .await;
            Ok(Some(
                inputs
                    .prior_draft
                    .unwrap_or_else(|| PLACEHOLDER_TEXT.to_string()),
            ))
        }
    }
}

fn build_prompt(
    ctx: &MissionContext,
    analysis: Option<&RequestAnalysis>,
    inputs: &SectionDraftInputs<'_>,
) -> (&'static str, String) {
    let section = inputs.section;
    let mut body = String::new();
    if let Some(analysis) = analysis {
        body.push_str(&format!("Deliverable: {}\n\n", analysis.goal_text()));
    }
    body.push_str(&format!(
        "Request: {}\n\nSection '{}': {}\n\nSibling sections (do not cover their ground): {}\n\n",
        summarize(&ctx.user_request, 300),
        section.title,
        section.description,
        inputs.sibling_titles.join(", ")
    ));
    let system = match section.research_strategy {
        ResearchStrategy::ResearchBased => {
            body.push_str("Notes:\n");
            for note in &inputs.assigned_notes {
                body.push_str(&format!(
                    "[{}] ({}) {}\n",
                    note.note_id,
                    note.source_id,
                    summarize(&note.content, 800)
                ));
            }
            RESEARCH_SYSTEM_PROMPT
        }
        ResearchStrategy::ContentBased => {
            body.push_str("Sibling drafts:\n");
            for (title, draft) in &inputs.reference_drafts {
                body.push_str(&format!("## {}\n{}\n\n", title, summarize(draft, 1500)));
            }
            CONTENT_SYSTEM_PROMPT
        }
        ResearchStrategy::SynthesizeFromSubsections => {
            body.push_str("Subsection drafts:\n");
            for (title, draft) in &inputs.reference_drafts {
                body.push_str(&format!("## {}\n{}\n\n", title, summarize(draft, 1500)));
            }
            SYNTHESIS_SYSTEM_PROMPT
        }
    };
    if let Some(prior) = &inputs.prior_draft {
        body.push_str(&format!(
            "\nPrior draft (pass {}):\n{}\n\nImprove coverage, flow, and citation density.\n",
            inputs.pass - 1,
            summarize(prior, 3000)
        ));
    }
    body.push_str("\nWrite the section body in markdown (no top-level heading).");
    (system, body)
}

static NOTE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(note_[A-Za-z0-9]+)\]").unwrap());

/// Drops bracketed references to unknown note ids, keeping known ones.
pub fn sanitize_note_refs(markdown: &str, known_ids: &[&str]) -> String {
    NOTE_REF_RE
        .replace_all(markdown, |caps: &regex::Captures<'_>| {
            let id = &caps[1];
            if known_ids.contains(&id) {
                format!("[{}]", id)
            } else {
                String::new()
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, MemoryPersistence};
    use crate::dispatch::ModelDispatcher;
    use crate::llm::MockLlm;
    use crate::schemas::{MissionStatus, SourceType, ToolSelection};
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    #[test]
    fn sanitize_drops_unknown_refs() {
        let text = "Claim one [note_good]. Claim two [note_bad].";
        let out = sanitize_note_refs(text, &["note_good"]);
        assert!(out.contains("[note_good]"));
        assert!(!out.contains("note_bad"));
    }

    async fn runtime_with(mock: MockLlm) -> (AgentRuntime, ControlHandle, MissionContext) {
        let store = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
        let created = store
            .create_mission("u", "c", "req", ToolSelection::default(), None, None)
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
        let runtime = AgentRuntime {
            store: store.clone(),
            dispatcher: Arc::new(ModelDispatcher::with_client_for_all(Arc::new(mock))),
            tools: Arc::new(ToolRegistry::new()),
            events: None,
        };
        let control = ControlHandle::new(created.mission_id.clone(), store.clone());
        let ctx = store.get(&created.mission_id).await.unwrap();
        (runtime, control, ctx)
    }

    #[tokio::test]
    async fn research_section_without_notes_gets_placeholder() {
        let (runtime, control, ctx) = runtime_with(MockLlm::new("unused")).await;
        let section = ReportSection::new("s", "S", "d");
        let inputs = SectionDraftInputs {
            section: &section,
            assigned_notes: vec![],
            sibling_titles: vec![],
            reference_drafts: vec![],
            prior_draft: None,
            pass: 1,
        };
        let out = write_section(&runtime, &control, &ctx, None, inputs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, PLACEHOLDER_TEXT);
    }

    #[tokio::test]
    async fn research_section_cites_known_notes() {
        let (runtime, control, ctx) =
            runtime_with(MockLlm::new("CAP forces a trade-off [note_a1]. Bogus [note_zz].")).await;
        let section = ReportSection::new("s", "S", "d");
        let mut note = Note::new("claim", SourceType::Web, "https://x.example");
        note.note_id = "note_a1".into();
        let inputs = SectionDraftInputs {
            section: &section,
            assigned_notes: vec![&note],
            sibling_titles: vec!["Intro".into()],
            reference_drafts: vec![],
            prior_draft: None,
            pass: 1,
        };
        let out = write_section(&runtime, &control, &ctx, None, inputs)
            .await
            .unwrap()
            .unwrap();
        assert!(out.contains("[note_a1]"));
        assert!(!out.contains("note_zz"));
    }

    #[tokio::test]
    async fn transient_failure_degrades_to_prior_draft() {
        let mock = MockLlm::new("unused");
        for _ in 0..3 {
            mock.push_error(crate::llm::LlmError::Server("boom".into()));
        }
        let (runtime, control, ctx) = runtime_with(mock).await;
        let section =
            ReportSection::new("s", "S", "d").with_strategy(ResearchStrategy::ContentBased);
        let inputs = SectionDraftInputs {
            section: &section,
            assigned_notes: vec![],
            sibling_titles: vec![],
            reference_drafts: vec![("Body".into(), "body text".into())],
            prior_draft: Some("previous draft".into()),
            pass: 2,
        };
        let out = write_section(&runtime, &control, &ctx, None, inputs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, "previous draft");
        let log = runtime.store.get(control.mission_id()).await.unwrap().execution_log;
        assert!(matches!(
            log.last().unwrap().status,
            crate::schemas::LogStatus::Failure
        ));
    }
}
