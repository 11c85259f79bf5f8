//! Reflection agent: assesses a section's notes and proposes outline edits,
//! follow-up questions, and note discards. The controller applies at most one
//! outline modification per section per round.

use serde_json::Value;

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{
    MissionContext, ModificationKind, OutlineModification, ReflectionOutput, ReportSection,
    ResearchStrategy,
};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "reflection";

const SYSTEM_PROMPT: &str = "\
You review research notes for one report section. Assess relevance, \
completeness and coherence; raise follow-up questions for the next research \
iteration; flag notes to discard as redundant or irrelevant; propose outline \
changes only when the notes clearly call for them. Finish with one short \
reminder for the shared thought pad.";

/// Reflects over a section's candidate notes. An empty structure (no changes)
/// is the fallback on parse failure.
pub async fn reflect(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    section: &ReportSection,
) -> AgentStep<ReflectionOutput> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let notes_block: String = ctx
        .active_notes()
        .iter()
        .filter(|n| {
            section.associated_note_ids.contains(&n.note_id)
                || n.source_metadata
                    .get("section_hint")
                    .and_then(Value::as_str)
                    .map(|s| s == section.section_id)
                    .unwrap_or(false)
        })
        .map(|n| format!("[{}] {}\n", n.note_id, summarize(&n.content, 400)))
        .collect();
    let goals_block: String = ctx
        .active_goals()
        .iter()
        .map(|g| format!("- {}\n", g.text))
        .collect();
    let outline_json = serde_json::to_string(ctx.plan.as_deref().unwrap_or(&[])).unwrap_or_default();

    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Section '{}' ({}): {}\n\nNotes:\n{}\nGoals:\n{}\nOutline:\n{}",
            section.title,
            section.section_id,
            section.description,
            notes_block,
            goals_block,
            outline_json
        )),
    ];
    match runtime
        .dispatcher
        .complete_structured::<ReflectionOutput>(
            ModelTier::Intelligent,
            &messages,
            ReflectionOutput::schema(),
            control.cancel_token(),
        )
        .await
    {
        Ok((output, details)) => {
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "reflect on section",
                    section.section_id.clone(),
                    summarize(&output.overall_assessment, 150),
                    details,
                )
                .await;
            Ok(Some(output))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "reflect on section",
                    format!("proceeding without reflection output: {}", e),
                )
                .await;
            Ok(Some(ReflectionOutput::default()))
        }
    }
}

/// Applies proposed modifications to the outline, capped at one per section
/// per round. Existing section ids are preserved; only added sections mint
/// new ids. Unsupported or malformed modifications are skipped.
pub fn apply_modifications(
    outline: &mut Vec<ReportSection>,
    modifications: &[OutlineModification],
) -> usize {
    let mut touched: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut applied = 0usize;
    for m in modifications {
        let target = target_section_id(m);
        if let Some(target) = &target {
            if touched.contains(target) {
                continue;
            }
        }
        let ok = match m.modification_type {
            ModificationKind::AddSection => apply_add(outline, &m.details),
            ModificationKind::RemoveSection => apply_remove(outline, &m.details),
            ModificationKind::ReframeSectionTopic => apply_reframe(outline, &m.details),
            // Merge/reorder/split are deferred to the next planning revision;
            // applying them mid-round would invalidate in-flight section work.
            ModificationKind::MergeSections
            | ModificationKind::ReorderSections
            | ModificationKind::SplitSection => false,
        };
        if ok {
            applied += 1;
            if let Some(target) = target {
                touched.insert(target);
            }
        }
    }
    applied
}

fn target_section_id(m: &OutlineModification) -> Option<String> {
    for key in [
        "section_id",
        "section_id_to_remove",
        "after_section_id",
        "target_section_id",
    ] {
        if let Some(id) = m.details.get(key).and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    None
}

fn apply_add(outline: &mut Vec<ReportSection>, details: &Value) -> bool {
    let Some(title) = details.get("new_title").and_then(Value::as_str) else {
        return false;
    };
    let description = details
        .get("topic")
        .or_else(|| details.get("description"))
        .and_then(Value::as_str)
        .unwrap_or(title);
    let mut section = ReportSection::new("", title, description);
    section.research_strategy = ResearchStrategy::ResearchBased;
    let after = details.get("after_section_id").and_then(Value::as_str);
    let position = after
        .and_then(|id| outline.iter().position(|s| s.section_id == id))
        .map(|i| i + 1)
        .unwrap_or(outline.len());
    outline.insert(position, section);
    crate::schemas::ensure_section_ids(outline);
    true
}

fn apply_remove(outline: &mut Vec<ReportSection>, details: &Value) -> bool {
    let Some(id) = details
        .get("section_id_to_remove")
        .or_else(|| details.get("section_id"))
        .and_then(Value::as_str)
    else {
        return false;
    };
    fn remove_in(sections: &mut Vec<ReportSection>, id: &str) -> bool {
        if let Some(i) = sections.iter().position(|s| s.section_id == id) {
            sections.remove(i);
            return true;
        }
        sections.iter_mut().any(|s| remove_in(&mut s.subsections, id))
    }
    // Never remove the last top-level section.
    if outline.len() == 1 && outline[0].section_id == id {
        return false;
    }
    remove_in(outline, id)
}

fn apply_reframe(outline: &mut [ReportSection], details: &Value) -> bool {
    let Some(id) = details.get("section_id").and_then(Value::as_str) else {
        return false;
    };
    fn reframe_in(sections: &mut [ReportSection], id: &str, details: &Value) -> bool {
        for s in sections {
            if s.section_id == id {
                if let Some(topic) = details.get("new_topic").and_then(Value::as_str) {
                    s.description = topic.to_string();
                }
                if let Some(title) = details.get("new_title").and_then(Value::as_str) {
                    s.title = title.to_string();
                }
                return true;
            }
            if reframe_in(&mut s.subsections, id, details) {
                return true;
            }
        }
        false
    }
    reframe_in(outline, id, details)
}
