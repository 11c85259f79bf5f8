//! Agent controller: owns the mission run loop.
//!
//! One worker task per mission drives the phase sequence (analyze → plan →
//! initial research → structured rounds → writing passes → citations →
//! finalize). Every phase checkpoints through the mission's [`ControlHandle`]
//! so stop and pause take effect at the next suspension point. Within a
//! phase, per-section work fans out under the per-mission semaphore.

use std::sync::Arc;

use futures::future::join_all;

use crate::agents::{
    self, assignment, citation, messenger, planner, reflection, research, writer, AgentRuntime,
    AgentStep,
};
use crate::bus::EventSink;
use crate::context::ContextStore;
use crate::dispatch::ModelDispatcher;
use crate::error::{ContextError, RunError};
use crate::governor;
use crate::lifecycle::{ControlHandle, LifecycleManager};
use crate::schemas::{
    walk, ExecutionLogEntry, LogStatus, MissionContext, MissionSettings, MissionStats,
    MissionStatus, Note, ReflectionOutput, ReportSection, RequestAnalysis, ResearchReportVersion,
    ResearchStrategy, ToolSelection,
};
use crate::tools::ToolRegistry;

/// Re-runs allowed per section per round when reflection flags it for review.
const MAX_REVIEW_RERUNS: usize = 2;

/// Top-level mission sequencer and the mission control API surface.
pub struct Controller {
    runtime: AgentRuntime,
    lifecycle: Arc<LifecycleManager>,
}

impl Controller {
    pub fn new(
        store: Arc<ContextStore>,
        dispatcher: Arc<ModelDispatcher>,
        tools: Arc<ToolRegistry>,
        lifecycle: Arc<LifecycleManager>,
        events: Option<Arc<dyn EventSink>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime: AgentRuntime {
                store,
                dispatcher,
                tools,
                events,
            },
            lifecycle: lifecycle.clone(),
        })
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.runtime.store
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Creates a mission and starts its worker. Returns the mission id.
    pub async fn create_and_start_mission(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        request: impl Into<String>,
        tool_selection: ToolSelection,
        document_group_id: Option<String>,
        mission_settings: Option<MissionSettings>,
    ) -> Result<String, ContextError> {
        let ctx = self
            .runtime
            .store
            .create_mission(
                user_id,
                chat_id,
                request,
                tool_selection,
                document_group_id,
                mission_settings,
            )
            .await?;
        let mission_id = ctx.mission_id.clone();
        self.start_worker(mission_id.clone());
        Ok(mission_id)
    }

    /// Spawns the worker for an already-created mission and registers it.
    pub fn start_worker(self: &Arc<Self>, mission_id: String) {
        let control = ControlHandle::new(mission_id.clone(), self.runtime.store.clone());
        let cancel = control.cancel_token().clone();
        let resume = control.resume_notify();
        let controller = self.clone();
        let worker_mission_id = mission_id.clone();
        let worker = tokio::spawn(async move {
            controller.run_mission(&control).await;
            controller.lifecycle.cleanup(&worker_mission_id);
        });
        self.lifecycle.register(mission_id, worker, cancel, resume);
    }

    // Mission control API passthroughs consumed by the transports.

    pub async fn pause(&self, mission_id: &str) -> bool {
        self.lifecycle.pause(mission_id).await
    }

    pub async fn resume(&self, mission_id: &str) -> bool {
        self.lifecycle.resume(mission_id).await
    }

    pub async fn stop(&self, mission_id: &str) -> bool {
        self.lifecycle.stop(mission_id).await
    }

    pub async fn get(&self, mission_id: &str) -> Result<MissionContext, ContextError> {
        self.runtime.store.get(mission_id).await
    }

    pub async fn get_stats(&self, mission_id: &str) -> Result<MissionStats, ContextError> {
        self.runtime.store.get_stats(mission_id).await
    }

    pub async fn get_logs(
        &self,
        mission_id: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<ExecutionLogEntry>, ContextError> {
        self.runtime.store.get_logs(mission_id, since).await
    }

    pub async fn get_current_report(
        &self,
        mission_id: &str,
    ) -> Result<Option<ResearchReportVersion>, ContextError> {
        self.runtime.store.get_current_report(mission_id).await
    }

    pub async fn list_report_versions(
        &self,
        mission_id: &str,
    ) -> Result<Vec<ResearchReportVersion>, ContextError> {
        self.runtime.store.list_report_versions(mission_id).await
    }

    pub async fn set_current_report(
        &self,
        mission_id: &str,
        version: u32,
    ) -> Result<(), ContextError> {
        self.runtime
            .store
            .set_current_report_version(mission_id, version)
            .await
    }

    /// Entry point of the worker: runs the phase sequence and settles the
    /// terminal status. Never panics the worker; errors move the mission to
    /// `failed`, cancellation leaves it `stopped`.
    pub async fn run_mission(&self, control: &ControlHandle) {
        let mission_id = control.mission_id().to_string();
        match self.execute(control).await {
            Ok(Some(())) => {
                tracing::info!(mission = %mission_id, "mission completed");
            }
            Ok(None) => {
                tracing::info!(mission = %mission_id, "mission unwound after stop");
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!(mission = %mission_id, error = %message, "mission failed");
                let entry = ExecutionLogEntry::new("controller", "mission failed", LogStatus::Failure)
                    .with_error(format!("{}: {}", e.kind().as_str(), message));
                let _ = self.runtime.store.append_log(&mission_id, entry).await;
                let _ = self
                    .runtime
                    .store
                    .update_status(&mission_id, MissionStatus::Failed, Some(message))
                    .await;
            }
        }
    }

    async fn execute(&self, control: &ControlHandle) -> AgentStep<()> {
        let mission_id = control.mission_id();
        let store = &self.runtime.store;
        let ctx = store.get(mission_id).await?;
        if ctx.status.is_terminal() {
            return Ok(Some(()));
        }
        if ctx.status == MissionStatus::Pending {
            store
                .update_status(mission_id, MissionStatus::Planning, None)
                .await?;
        }

        // Analyze: classify the request, seed the goal pad and the initial questions.
        let ctx = store.get(mission_id).await?;
        let Some(analysis) = messenger::analyze_request(&self.runtime, control, &ctx).await? else {
            return Ok(None);
        };
        store
            .add_goal(mission_id, analysis.goal_text(), messenger::AGENT_NAME)
            .await?;
        let Some(questions) =
            messenger::generate_initial_questions(&self.runtime, control, &ctx, &analysis).await?
        else {
            return Ok(None);
        };
        for q in &questions {
            store.add_goal(mission_id, q, messenger::AGENT_NAME).await?;
        }
        let stored_questions = questions.clone();
        store
            .update_metadata(mission_id, move |m| {
                m.initial_questions = Some(stored_questions);
            })
            .await?;

        if ctx.metadata.mission_settings.auto_optimize_params() {
            let suggested = planner::suggest_params(&analysis);
            store
                .update_metadata(mission_id, move |m| {
                    m.mission_settings.apply_advisory(&suggested);
                })
                .await?;
        }

        // Plan phase a: initial outline.
        let ctx = store.get(mission_id).await?;
        let Some(outline) = planner::draft_outline(&self.runtime, control, &ctx, &analysis).await?
        else {
            return Ok(None);
        };
        store.store_plan(mission_id, outline).await?;
        store
            .update_status(mission_id, MissionStatus::Running, None)
            .await?;

        // Plan phase b: initial exploratory research.
        if self.research_round(control, 0).await?.is_none() {
            return Ok(None);
        }

        // Plan phase c: assign seed notes, revise the outline with them.
        if self.assign_and_store(control).await?.is_none() {
            return Ok(None);
        }
        let ctx = store.get(mission_id).await?;
        let active = ctx.active_notes();
        let Some(revised) = planner::revise_outline(&self.runtime, control, &ctx, &active).await?
        else {
            return Ok(None);
        };
        store.store_plan(mission_id, revised).await?;

        // Structured research rounds.
        let settings = store.get(mission_id).await?.metadata.mission_settings;
        for round in 1..=settings.structured_research_rounds() {
            if self.research_round(control, round).await?.is_none() {
                return Ok(None);
            }
        }

        // Final outline revision, unless disabled or nothing was researched.
        if !settings.skip_final_replanning() && settings.structured_research_rounds() > 0 {
            let ctx = store.get(mission_id).await?;
            let active = ctx.active_notes();
            let Some(revised) =
                planner::revise_outline(&self.runtime, control, &ctx, &active).await?
            else {
                return Ok(None);
            };
            store.store_plan(mission_id, revised).await?;
        }

        // Remaining open goals become the final questions of record.
        let ctx = store.get(mission_id).await?;
        let final_questions: Vec<String> =
            ctx.active_goals().iter().map(|g| g.text.clone()).collect();
        store
            .update_metadata(mission_id, move |m| {
                m.final_questions = Some(final_questions);
            })
            .await?;

        // Writing passes, each preceded by note reassignment.
        for pass in 1..=settings.writing_passes() {
            if self.assign_and_store(control).await?.is_none() {
                return Ok(None);
            }
            if self.writing_pass(control, pass, &analysis).await?.is_none() {
                return Ok(None);
            }
        }

        // Citation processing and final assembly.
        if !control.should_continue().await {
            return Ok(None);
        }
        let ctx = store.get(mission_id).await?;
        let assembled = assemble_report(&ctx);
        let processed = citation::process_report(&assembled, &ctx.notes);
        if processed.dropped > 0 {
            self.runtime
                .log_warning(
                    mission_id,
                    "citation",
                    "process citations",
                    format!("{} citations dropped as unresolvable", processed.dropped),
                )
                .await;
        }
        let final_markdown = format!(
            "{}{}",
            processed.markdown,
            citation::render_references(&processed.references)
        );

        if !control.should_continue().await {
            return Ok(None);
        }
        if ctx.report_content.values().any(|c| !c.trim().is_empty()) {
            store
                .add_report_version(mission_id, report_title(&ctx), final_markdown, None, true)
                .await?;
        }
        store
            .update_status(mission_id, MissionStatus::Completed, None)
            .await?;
        Ok(Some(()))
    }

    /// One research round: run a cycle + reflection per research section with
    /// bounded fan-out, then apply reflection outputs sequentially. Round 0
    /// is the exploration pass (no reflection application beyond thoughts).
    async fn research_round(&self, control: &ControlHandle, round: u32) -> AgentStep<()> {
        let mission_id = control.mission_id();
        let store = &self.runtime.store;
        if !control.should_continue().await {
            return Ok(None);
        }
        let ctx = store.get(mission_id).await?;
        let outline = ctx.plan.clone().unwrap_or_default();
        let sections: Vec<ReportSection> = walk(&outline)
            .into_iter()
            .filter(|(s, _)| s.research_strategy == ResearchStrategy::ResearchBased)
            .map(|(s, _)| s.clone())
            .collect();
        if sections.is_empty() {
            return Ok(Some(()));
        }

        let semaphore =
            governor::mission_semaphore(ctx.metadata.mission_settings.max_concurrent_requests());
        let tasks = sections.into_iter().map(|section| {
            let runtime = self.runtime.clone();
            let control = control.clone();
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (section.section_id.clone(), Ok(None), None),
                };
                let cycle = research::run_cycle(&runtime, &control, &ctx, &section, round).await;
                match cycle {
                    Ok(Some(_)) if round > 0 => {
                        let fresh = match runtime.store.get(control.mission_id()).await {
                            Ok(c) => c,
                            Err(e) => {
                                return (section.section_id.clone(), Err(RunError::from(e)), None)
                            }
                        };
                        let reflected =
                            reflection::reflect(&runtime, &control, &fresh, &section).await;
                        match reflected {
                            Ok(out) => (section.section_id.clone(), Ok(Some(())), out),
                            Err(e) => (section.section_id.clone(), Err(e), None),
                        }
                    }
                    Ok(Some(_)) => (section.section_id.clone(), Ok(Some(())), None),
                    Ok(None) => (section.section_id.clone(), Ok(None), None),
                    Err(e) => (section.section_id.clone(), Err(e), None),
                }
            }
        });
        let results = join_all(tasks).await;

        let mut reflections: Vec<(String, ReflectionOutput)> = Vec::new();
        let mut failures = 0usize;
        let total = results.len();
        for (section_id, outcome, reflected) in results {
            match outcome {
                Ok(Some(())) => {
                    if let Some(r) = reflected {
                        reflections.push((section_id, r));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) if matches!(&e, RunError::Dispatch(d) if d.is_fatal_for_mission()) => {
                    return Err(e);
                }
                Err(e) => {
                    failures += 1;
                    self.runtime
                        .log_warning(
                            mission_id,
                            research::AGENT_NAME,
                            "research cycle",
                            format!("section {}: {}", section_id, e),
                        )
                        .await;
                }
            }
        }
        if failures == total && total > 0 {
            return Err(RunError::Internal(format!(
                "all {} research cycles failed in round {}",
                total, round
            )));
        }

        let review_ids = self.apply_reflections(control, reflections).await?;
        let Some(review_ids) = review_ids else {
            return Ok(None);
        };

        // Sections flagged for review re-cycle within the round, capped.
        for section_id in review_ids {
            for _ in 0..MAX_REVIEW_RERUNS {
                if !control.should_continue().await {
                    return Ok(None);
                }
                let fresh = store.get(mission_id).await?;
                let Some(section) = fresh
                    .plan
                    .as_deref()
                    .and_then(|p| crate::schemas::find_section(p, &section_id))
                    .cloned()
                else {
                    break;
                };
                match research::run_cycle(&self.runtime, control, &fresh, &section, round).await? {
                    Some(added) if added > 0 => continue,
                    Some(_) => break,
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(()))
    }

    /// Applies reflection outputs: thoughts, goals, note discards, and at most
    /// one outline modification per section. Returns sections needing review.
    async fn apply_reflections(
        &self,
        control: &ControlHandle,
        reflections: Vec<(String, ReflectionOutput)>,
    ) -> AgentStep<Vec<String>> {
        let mission_id = control.mission_id();
        let store = &self.runtime.store;
        let mut review: Vec<String> = Vec::new();
        for (section_id, output) in reflections {
            if !control.should_continue().await {
                return Ok(None);
            }
            if let Some(thought) = &output.generated_thought {
                store
                    .add_thought(mission_id, thought, reflection::AGENT_NAME)
                    .await?;
            }
            for q in &output.new_questions {
                store.add_goal(mission_id, q, reflection::AGENT_NAME).await?;
            }
            if !output.discard_note_ids.is_empty() {
                store
                    .discard_notes(mission_id, &output.discard_note_ids)
                    .await?;
            }
            if !output.proposed_modifications.is_empty() {
                let ctx = store.get(mission_id).await?;
                if let Some(mut outline) = ctx.plan {
                    let applied =
                        reflection::apply_modifications(&mut outline, &output.proposed_modifications);
                    if applied > 0 && crate::schemas::validate_outline(&outline).is_ok() {
                        store.store_plan(mission_id, outline).await?;
                    }
                }
            }
            for id in output.sections_needing_review {
                if id == section_id && !review.contains(&id) {
                    review.push(id);
                }
            }
        }
        Ok(Some(review))
    }

    /// Runs note assignment and writes the result into the plan.
    async fn assign_and_store(&self, control: &ControlHandle) -> AgentStep<()> {
        let mission_id = control.mission_id();
        let store = &self.runtime.store;
        let ctx = store.get(mission_id).await?;
        let Some(assignments) = assignment::assign_notes(&self.runtime, control, &ctx).await?
        else {
            return Ok(None);
        };
        let Some(plan) = ctx.plan.as_deref() else {
            return Ok(Some(()));
        };
        for (section, _) in walk(plan) {
            let notes = assignments
                .assignments
                .get(&section.section_id)
                .cloned()
                .unwrap_or_default();
            store
                .set_section_notes(mission_id, &section.section_id, notes)
                .await?;
        }
        Ok(Some(()))
    }

    /// One writing pass over the outline: research/synthesis sections in
    /// child-first order, connective sections last so they can read siblings.
    async fn writing_pass(
        &self,
        control: &ControlHandle,
        pass: u32,
        analysis: &RequestAnalysis,
    ) -> AgentStep<()> {
        let mission_id = control.mission_id();
        let store = &self.runtime.store;
        let ctx = store.get(mission_id).await?;
        let outline = ctx.plan.clone().unwrap_or_default();
        let order = writing_order(&outline);

        for section_id in order {
            if !control.should_continue().await {
                return Ok(None);
            }
            let fresh = store.get(mission_id).await?;
            let Some(section) = fresh
                .plan
                .as_deref()
                .and_then(|p| crate::schemas::find_section(p, &section_id))
                .cloned()
            else {
                continue;
            };
            let assigned_notes: Vec<&Note> = section
                .associated_note_ids
                .iter()
                .filter_map(|id| fresh.note(id))
                .filter(|n| !n.discarded)
                .collect();
            let sibling_titles: Vec<String> = walk(&outline)
                .iter()
                .filter(|(s, _)| s.section_id != section.section_id)
                .map(|(s, _)| s.title.clone())
                .collect();
            let reference_drafts = match section.research_strategy {
                ResearchStrategy::SynthesizeFromSubsections => section
                    .subsections
                    .iter()
                    .filter_map(|s| {
                        fresh
                            .report_content
                            .get(&s.section_id)
                            .map(|d| (s.title.clone(), d.clone()))
                    })
                    .collect(),
                ResearchStrategy::ContentBased => walk(&outline)
                    .iter()
                    .filter(|(s, _)| s.section_id != section.section_id)
                    .filter_map(|(s, _)| {
                        fresh
                            .report_content
                            .get(&s.section_id)
                            .map(|d| (s.title.clone(), d.clone()))
                    })
                    .collect(),
                ResearchStrategy::ResearchBased => Vec::new(),
            };
            let inputs = writer::SectionDraftInputs {
                section: &section,
                assigned_notes,
                sibling_titles,
                reference_drafts,
                prior_draft: fresh.report_content.get(&section.section_id).cloned(),
                pass,
            };
            let Some(markdown) =
                writer::write_section(&self.runtime, control, &fresh, Some(analysis), inputs)
                    .await?
            else {
                return Ok(None);
            };
            store
                .set_section_content(mission_id, &section.section_id, markdown)
                .await?;
        }
        Ok(Some(()))
    }
}

/// Section ids in writing order: research and synthesis sections child-first,
/// then connective (content-based) sections in outline order.
pub fn writing_order(outline: &[ReportSection]) -> Vec<String> {
    let mut first = Vec::new();
    fn post_order(sections: &[ReportSection], out: &mut Vec<String>) {
        for s in sections {
            post_order(&s.subsections, out);
            if s.research_strategy != ResearchStrategy::ContentBased {
                out.push(s.section_id.clone());
            }
        }
    }
    post_order(outline, &mut first);
    let mut last: Vec<String> = walk(outline)
        .into_iter()
        .filter(|(s, _)| s.research_strategy == ResearchStrategy::ContentBased)
        .map(|(s, _)| s.section_id.clone())
        .collect();
    first.append(&mut last);
    first
}

/// Assembles the per-section drafts into one markdown document in outline
/// order, heading level following outline depth.
pub fn assemble_report(ctx: &MissionContext) -> String {
    let mut out = format!("# {}\n", report_title(ctx));
    let Some(plan) = ctx.plan.as_deref() else {
        return out;
    };
    for (section, depth) in walk(plan) {
        out.push_str(&format!(
            "\n{} {}\n\n",
            "#".repeat(depth + 1),
            section.title
        ));
        match ctx.report_content.get(&section.section_id) {
            Some(body) => {
                out.push_str(body);
                out.push('\n');
            }
            None => {
                out.push_str(writer::PLACEHOLDER_TEXT);
                out.push('\n');
            }
        }
    }
    out
}

fn report_title(ctx: &MissionContext) -> String {
    agents::summarize(ctx.user_request.trim(), 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline() -> Vec<ReportSection> {
        vec![
            ReportSection::new("intro", "Introduction", "d")
                .with_strategy(ResearchStrategy::ContentBased),
            ReportSection::new("body", "Body", "d")
                .with_strategy(ResearchStrategy::SynthesizeFromSubsections)
                .with_subsections(vec![
                    ReportSection::new("body_a", "Part A", "d"),
                    ReportSection::new("body_b", "Part B", "d"),
                ]),
            ReportSection::new("conclusion", "Conclusion", "d")
                .with_strategy(ResearchStrategy::ContentBased),
        ]
    }

    #[test]
    fn writing_order_children_before_parents_connectives_last() {
        let order = writing_order(&outline());
        assert_eq!(order, vec!["body_a", "body_b", "body", "intro", "conclusion"]);
    }

    #[test]
    fn assemble_report_uses_outline_order_and_depth() {
        let mut ctx = MissionContext::new("m", "c", "u", "Explain CAP");
        ctx.plan = Some(outline());
        ctx.report_content
            .insert("intro".into(), "intro text".into());
        ctx.report_content
            .insert("body_a".into(), "part a text".into());
        let md = assemble_report(&ctx);
        assert!(md.starts_with("# Explain CAP"));
        assert!(md.contains("## Introduction"));
        assert!(md.contains("### Part A"));
        let intro_pos = md.find("## Introduction").unwrap();
        let body_pos = md.find("## Body").unwrap();
        assert!(intro_pos < body_pos);
        assert!(md.contains(writer::PLACEHOLDER_TEXT));
    }
}
