//! Note assignment: maps every non-discarded note to at most one section,
//! with an overlap pre-filter before the model call when the candidate set is
//! large, and a heuristic fallback when the model output cannot be parsed.

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{
    research_section_ids, walk, MissionContext, Note, NoteAssignments, ReportSection,
};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "note_assignment";

/// Minimum overlap for the guarantee that a research section with candidates
/// above this similarity receives at least one note.
const MIN_SIMILARITY: f32 = 0.15;

const SYSTEM_PROMPT: &str = "\
You organize research notes into a report outline. Assign each note id to \
the single best-fitting section. Sections whose strategy is not \
'research_based' get no notes. Leave a note out entirely when it fits \
nowhere.";

/// Runs the assignment over all non-discarded notes and the current outline.
pub async fn assign_notes(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
) -> AgentStep<NoteAssignments> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let Some(outline) = ctx.plan.as_deref() else {
        return Ok(Some(NoteAssignments::default()));
    };
    let notes = ctx.active_notes();
    if notes.is_empty() {
        return Ok(Some(NoteAssignments::default()));
    }

    let cap = ctx
        .metadata
        .mission_settings
        .max_notes_for_assignment_reranking();
    let candidates = prefilter(&notes, outline, cap);

    let outline_block: String = walk(outline)
        .iter()
        .map(|(s, depth)| {
            format!(
                "{}{} [{}] ({}): {}\n",
                "  ".repeat(depth - 1),
                s.title,
                s.section_id,
                s.research_strategy.as_str(),
                summarize(&s.description, 150)
            )
        })
        .collect();
    let notes_block: String = candidates
        .iter()
        .map(|n| format!("[{}] {}\n", n.note_id, summarize(&n.content, 250)))
        .collect();
    let messages = vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Outline:\n{}\nNotes:\n{}\nReturn assignments as section_id -> [note ids].",
            outline_block, notes_block
        )),
    ];

    let section_order = research_section_ids(outline);
    let mut assignments = match runtime
        .dispatcher
        .complete_structured::<NoteAssignments>(
            ModelTier::Mid,
            &messages,
            NoteAssignments::schema(),
            control.cancel_token(),
        )
        .await
    {
        Ok((assignments, details)) => {
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "assign notes",
                    format!("{} notes, {} sections", candidates.len(), section_order.len()),
                    format!("{} assigned", assignments.assigned_note_ids().len()),
                    details,
                )
                .await;
            assignments
        }
        Err(DispatchError::Cancelled) => return Ok(None),
        Err(e) if e.is_fatal_for_mission() => return Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "assign notes",
                    format!("using similarity fallback: {}", e),
                )
                .await;
            heuristic_assignment(&candidates, outline)
        }
    };

    // Known note ids only, one section per note, research sections only.
    let known: std::collections::HashSet<&str> =
        candidates.iter().map(|n| n.note_id.as_str()).collect();
    let research: std::collections::HashSet<&str> =
        section_order.iter().map(String::as_str).collect();
    assignments
        .assignments
        .retain(|sid, _| research.contains(sid.as_str()));
    for notes in assignments.assignments.values_mut() {
        notes.retain(|n| known.contains(n.as_str()));
    }
    assignments.dedupe(&section_order);
    fill_empty_sections(&mut assignments, &candidates, outline);
    Ok(Some(assignments))
}

/// Overlap-based pre-filter: keeps the `cap` notes scoring highest against
/// the outline as a whole.
fn prefilter<'a>(notes: &[&'a Note], outline: &[ReportSection], cap: usize) -> Vec<&'a Note> {
    if notes.len() <= cap {
        return notes.to_vec();
    }
    let outline_text: String = walk(outline)
        .iter()
        .map(|(s, _)| format!("{} {} ", s.title, s.description))
        .collect();
    let mut scored: Vec<(f32, &Note)> = notes
        .iter()
        .map(|n| (similarity(&outline_text, &n.content), *n))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(cap);
    scored.into_iter().map(|(_, n)| n).collect()
}

/// Pure similarity fallback: each note goes to its best-matching research
/// section above the floor.
fn heuristic_assignment(notes: &[&Note], outline: &[ReportSection]) -> NoteAssignments {
    let sections: Vec<&ReportSection> = walk(outline)
        .into_iter()
        .map(|(s, _)| s)
        .filter(|s| {
            s.research_strategy == crate::schemas::ResearchStrategy::ResearchBased
        })
        .collect();
    let mut out = NoteAssignments::default();
    for note in notes {
        let best = sections
            .iter()
            .map(|s| {
                (
                    similarity(&format!("{} {}", s.title, s.description), &note.content),
                    s.section_id.as_str(),
                )
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((score, sid)) = best {
            if score >= MIN_SIMILARITY {
                out.assignments
                    .entry(sid.to_string())
                    .or_default()
                    .push(note.note_id.clone());
            }
        }
    }
    out
}

/// Invariant: a research section with a non-trivial description receives at
/// least one note when any unassigned candidate clears the similarity floor.
fn fill_empty_sections(
    assignments: &mut NoteAssignments,
    notes: &[&Note],
    outline: &[ReportSection],
) {
    let mut assigned: std::collections::HashSet<String> =
        assignments.assigned_note_ids().into_iter().collect();
    for (section, _) in walk(outline) {
        if section.research_strategy != crate::schemas::ResearchStrategy::ResearchBased {
            continue;
        }
        if section.description.trim().len() < 10 {
            continue;
        }
        let has_notes = assignments
            .assignments
            .get(&section.section_id)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if has_notes {
            continue;
        }
        let reference = format!("{} {}", section.title, section.description);
        let best = notes
            .iter()
            .filter(|n| !assigned.contains(&n.note_id))
            .map(|n| (similarity(&reference, &n.content), n.note_id.clone()))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((score, note_id)) = best {
            if score >= MIN_SIMILARITY {
                assigned.insert(note_id.clone());
                assignments
                    .assignments
                    .entry(section.section_id.clone())
                    .or_default()
                    .push(note_id);
            }
        }
    }
}

fn similarity(reference: &str, text: &str) -> f32 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::SourceType;

    fn note(id: &str, content: &str) -> Note {
        let mut n = Note::new(content, SourceType::Document, format!("chunk-{}", id));
        n.note_id = id.to_string();
        n
    }

    fn outline() -> Vec<ReportSection> {
        vec![
            ReportSection::new("consistency", "Consistency", "consistency models and guarantees in databases"),
            ReportSection::new("availability", "Availability", "availability and uptime under network partition"),
        ]
    }

    #[test]
    fn heuristic_routes_notes_to_best_section() {
        let n1 = note("n1", "strong consistency guarantees in databases require coordination");
        let n2 = note("n2", "availability suffers during a network partition event");
        let notes = vec![&n1, &n2];
        let a = heuristic_assignment(&notes, &outline());
        assert!(a.assignments["consistency"].contains(&"n1".to_string()));
        assert!(a.assignments["availability"].contains(&"n2".to_string()));
    }

    #[test]
    fn prefilter_caps_candidates() {
        let notes: Vec<Note> = (0..10)
            .map(|i| note(&format!("n{}", i), "consistency in databases"))
            .collect();
        let refs: Vec<&Note> = notes.iter().collect();
        let kept = prefilter(&refs, &outline(), 4);
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn fill_empty_sections_respects_floor() {
        let n1 = note("n1", "entirely unrelated content about cooking pasta");
        let notes = vec![&n1];
        let mut a = NoteAssignments::default();
        fill_empty_sections(&mut a, &notes, &outline());
        assert!(a.assignments.is_empty(), "below-floor note must not be forced");

        let n2 = note("n2", "availability and uptime under network partition stress");
        let notes = vec![&n2];
        let mut a = NoteAssignments::default();
        fill_empty_sections(&mut a, &notes, &outline());
        assert!(a.assignments["availability"].contains(&"n2".to_string()));
    }
}
