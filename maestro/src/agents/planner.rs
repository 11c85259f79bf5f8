//! Planner agent: three-phase outline production (draft, note-aware revision)
//! plus the advisory parameter tuning used when `auto_optimize_params` is set.

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{
    ensure_section_ids, validate_outline, MissionContext, MissionSettings, Note, PlanResponse,
    ReportSection, RequestAnalysis, ResearchStrategy,
};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "planner";

const DRAFT_SYSTEM_PROMPT: &str = "\
You plan research reports. Produce an outline: sections with titles, \
descriptions of what each must cover, and a research strategy per section \
('research_based' for sections needing retrieval, 'content_based' for \
intro/conclusion written from sibling content, 'synthesize_from_subsections' \
for parents summarizing their children). Nest at most three levels deep.";

const REVISE_SYSTEM_PROMPT: &str = "\
You revise research report outlines. Given the current outline, the notes \
collected so far, and the research goals, return the improved outline. Keep \
existing section_id values; assign each relevant note id to exactly one \
section via associated_note_ids.";

/// Phase 1: initial outline from the request and its classification.
pub async fn draft_outline(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    analysis: &RequestAnalysis,
) -> AgentStep<Vec<ReportSection>> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let messages = vec![
        Message::system(DRAFT_SYSTEM_PROMPT),
        Message::user(format!(
            "Request:\n{}\n\nDeliverable: {}\n\nDraft the outline.",
            ctx.user_request,
            analysis.goal_text()
        )),
    ];
    match runtime
        .dispatcher
        .complete_structured::<PlanResponse>(
            ModelTier::Intelligent,
            &messages,
            PlanResponse::schema(),
            control.cancel_token(),
        )
        .await
    {
        Ok((plan, details)) => {
            let goal = plan.mission_goal.clone();
            let thought = plan.generated_thought.clone();
            let outline = sanitize_outline(plan.into_outline(), &ctx.user_request);
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "draft outline",
                    summarize(&ctx.user_request, 200),
                    format!("{} top-level sections ({})", outline.len(), goal),
                    details,
                )
                .await;
            if let Some(thought) = thought {
                let _ = runtime
                    .store
                    .add_thought(control.mission_id(), thought, AGENT_NAME)
                    .await;
            }
            Ok(Some(outline))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "draft outline",
                    format!("falling back to default outline: {}", e),
                )
                .await;
            Ok(Some(default_outline(&ctx.user_request)))
        }
    }
}

/// Phase 3: revise the outline with knowledge from the seed notes and assign
/// them to sections. Falls back to the current outline unchanged.
pub async fn revise_outline(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    notes: &[&Note],
) -> AgentStep<Vec<ReportSection>> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let Some(current) = &ctx.plan else {
        return Ok(Some(default_outline(&ctx.user_request)));
    };
    let outline_json = serde_json::to_string_pretty(current).unwrap_or_default();
    let notes_block: String = notes
        .iter()
        .map(|n| format!("- [{}] {}\n", n.note_id, summarize(&n.content, 300)))
        .collect();
    let goals_block: String = ctx
        .active_goals()
        .iter()
        .map(|g| format!("- {}\n", g.text))
        .collect();
    let messages = vec![
        Message::system(REVISE_SYSTEM_PROMPT),
        Message::user(format!(
            "Current outline:\n{}\n\nNotes:\n{}\nGoals:\n{}\nReturn the revised outline.",
            outline_json, notes_block, goals_block
        )),
    ];
    match runtime
        .dispatcher
        .complete_structured::<PlanResponse>(
            ModelTier::Intelligent,
            &messages,
            PlanResponse::schema(),
            control.cancel_token(),
        )
        .await
    {
        Ok((plan, details)) => {
            let revised = sanitize_outline(plan.into_outline(), &ctx.user_request);
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "revise outline",
                    format!("{} notes", notes.len()),
                    format!("{} top-level sections", revised.len()),
                    details,
                )
                .await;
            Ok(Some(revised))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "revise outline",
                    format!("keeping current outline: {}", e),
                )
                .await;
            Ok(Some(current.clone()))
        }
    }
}

/// Advisory settings for `auto_optimize_params`: tuned from the requested
/// length, never overriding explicit user values (the caller merges with
/// [`MissionSettings::apply_advisory`]).
pub fn suggest_params(analysis: &RequestAnalysis) -> MissionSettings {
    let length = analysis.requested_length.to_lowercase();
    let mut suggested = MissionSettings::default();
    if length.contains("short") || length.contains("brief") || length.contains("paragraph") {
        suggested.structured_research_rounds = Some(1);
        suggested.writing_passes = Some(1);
        suggested.initial_research_max_questions = Some(4);
    } else if length.contains("comprehensive") || length.contains("detailed") {
        suggested.structured_research_rounds = Some(3);
        suggested.writing_passes = Some(2);
    }
    suggested
}

/// Repairs model-produced outlines into a valid tree: ids minted, depth
/// clamped, childless synthesis parents downgraded to research sections.
fn sanitize_outline(mut outline: Vec<ReportSection>, user_request: &str) -> Vec<ReportSection> {
    fn clamp_depth(sections: &mut Vec<ReportSection>, depth: usize) {
        for s in sections.iter_mut() {
            if depth >= crate::schemas::MAX_OUTLINE_DEPTH {
                s.subsections.clear();
            } else {
                clamp_depth(&mut s.subsections, depth + 1);
            }
        }
    }
    fn fix_strategies(sections: &mut Vec<ReportSection>) {
        for s in sections.iter_mut() {
            if s.research_strategy == ResearchStrategy::SynthesizeFromSubsections
                && s.subsections.is_empty()
            {
                s.research_strategy = ResearchStrategy::ResearchBased;
            }
            fix_strategies(&mut s.subsections);
        }
    }
    clamp_depth(&mut outline, 1);
    fix_strategies(&mut outline);
    ensure_section_ids(&mut outline);
    if validate_outline(&outline).is_err() || outline.is_empty() {
        return default_outline(user_request);
    }
    outline
}

/// Minimal valid outline used when planning fails entirely.
pub fn default_outline(user_request: &str) -> Vec<ReportSection> {
    vec![
        ReportSection::new("introduction", "Introduction", "Introduce the topic and scope.")
            .with_strategy(ResearchStrategy::ContentBased),
        ReportSection::new(
            "main_findings",
            "Main Findings",
            format!("Address the request: {}", user_request),
        ),
        ReportSection::new("conclusion", "Conclusion", "Summarize the findings.")
            .with_strategy(ResearchStrategy::ContentBased),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_outline_is_valid() {
        let outline = default_outline("explain gradient descent");
        assert!(validate_outline(&outline).is_ok());
        assert_eq!(outline.len(), 3);
        assert_eq!(outline[1].research_strategy, ResearchStrategy::ResearchBased);
    }

    #[test]
    fn sanitize_clamps_depth_and_downgrades_empty_synthesis() {
        let deep = vec![ReportSection::new("a", "A", "").with_subsections(vec![
            ReportSection::new("b", "B", "").with_subsections(vec![ReportSection::new(
                "c", "C", "",
            )
            .with_subsections(vec![ReportSection::new("d", "D", "")])]),
        ])];
        let sanitized = sanitize_outline(deep, "req");
        assert!(validate_outline(&sanitized).is_ok());

        let childless = vec![ReportSection::new("p", "P", "")
            .with_strategy(ResearchStrategy::SynthesizeFromSubsections)];
        let sanitized = sanitize_outline(childless, "req");
        assert_eq!(
            sanitized[0].research_strategy,
            ResearchStrategy::ResearchBased
        );
    }

    #[test]
    fn sanitize_falls_back_on_empty_outline() {
        let sanitized = sanitize_outline(vec![], "the request");
        assert_eq!(sanitized.len(), 3);
    }

    #[test]
    fn suggest_params_for_short_requests() {
        let analysis = RequestAnalysis {
            requested_length: "Short Summary".into(),
            ..Default::default()
        };
        let s = suggest_params(&analysis);
        assert_eq!(s.structured_research_rounds, Some(1));
        assert_eq!(s.writing_passes, Some(1));
    }

    #[test]
    fn suggest_params_neutral_for_unknown_length() {
        let s = suggest_params(&RequestAnalysis::default());
        assert!(s.structured_research_rounds.is_none());
    }
}
