//! Messenger agent: classifies the research request (tone, audience, length,
//! format, sources) and produces the initial exploration questions.

use crate::dispatch::ModelTier;
use crate::error::DispatchError;
use crate::lifecycle::ControlHandle;
use crate::llm::Message;
use crate::schemas::{MissionContext, QuestionSet, RequestAnalysis};

use super::{summarize, AgentRuntime, AgentStep};

pub const AGENT_NAME: &str = "messenger";

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You classify research requests. Given the user's request, determine the type \
of output wanted, the tone, the audience, the expected length and format, and \
any preferred source types. Prioritize what the user explicitly asked for; \
infer the rest conservatively.";

const QUESTIONS_SYSTEM_PROMPT: &str = "\
You generate focused research questions. Given a research request and its \
classification, produce the initial questions an exploratory research pass \
should answer. Questions must be specific and non-overlapping.";

/// Classifies the request. Falls back to a generic classification when the
/// model output cannot be parsed.
pub async fn analyze_request(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
) -> AgentStep<RequestAnalysis> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let messages = vec![
        Message::system(ANALYSIS_SYSTEM_PROMPT),
        Message::user(format!("Research request:\n{}", ctx.user_request)),
    ];
    let result = runtime
        .dispatcher
        .complete_structured::<RequestAnalysis>(
            ModelTier::Fast,
            &messages,
            RequestAnalysis::schema(),
            control.cancel_token(),
        )
        .await;
    match result {
        Ok((analysis, details)) => {
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "analyze request",
                    summarize(&ctx.user_request, 200),
                    analysis.goal_text(),
                    details,
                )
                .await;
            Ok(Some(analysis))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "analyze request",
                    format!("falling back to default classification: {}", e),
                )
                .await;
            Ok(Some(default_analysis()))
        }
    }
}

/// Generates the initial exploration questions, capped by
/// `initial_research_max_questions`. Falls back to the request itself.
pub async fn generate_initial_questions(
    runtime: &AgentRuntime,
    control: &ControlHandle,
    ctx: &MissionContext,
    analysis: &RequestAnalysis,
) -> AgentStep<Vec<String>> {
    if !control.should_continue().await {
        return Ok(None);
    }
    let cap = ctx.metadata.mission_settings.initial_research_max_questions() as usize;
    let messages = vec![
        Message::system(QUESTIONS_SYSTEM_PROMPT),
        Message::user(format!(
            "Request:\n{}\n\nClassification: {}\n\nProduce at most {} questions.",
            ctx.user_request,
            analysis.goal_text(),
            cap
        )),
    ];
    let result = runtime
        .dispatcher
        .complete_structured::<QuestionSet>(
            ModelTier::Mid,
            &messages,
            QuestionSet::schema(),
            control.cancel_token(),
        )
        .await;
    match result {
        Ok((set, details)) => {
            let mut questions = set.questions;
            questions.retain(|q| !q.trim().is_empty());
            questions.truncate(cap);
            if questions.is_empty() {
                questions.push(ctx.user_request.clone());
            }
            runtime
                .log_model_call(
                    control.mission_id(),
                    AGENT_NAME,
                    "generate initial questions",
                    summarize(&ctx.user_request, 200),
                    format!("{} questions", questions.len()),
                    details,
                )
                .await;
            if let Some(thought) = set.generated_thought {
                let _ = runtime
                    .store
                    .add_thought(control.mission_id(), thought, AGENT_NAME)
                    .await;
            }
            Ok(Some(questions))
        }
        Err(DispatchError::Cancelled) => Ok(None),
        Err(e) if e.is_fatal_for_mission() => Err(e.into()),
        Err(e) => {
            runtime
                .log_warning(
                    control.mission_id(),
                    AGENT_NAME,
                    "generate initial questions",
                    format!("falling back to the raw request: {}", e),
                )
                .await;
            Ok(Some(vec![ctx.user_request.clone()]))
        }
    }
}

fn default_analysis() -> RequestAnalysis {
    RequestAnalysis {
        request_type: "Research Report".into(),
        target_tone: "Neutral".into(),
        target_audience: "General Public".into(),
        requested_length: "Comprehensive Report".into(),
        requested_format: "Full Report".into(),
        preferred_source_types: String::new(),
        analysis_reasoning: "default classification after parse failure".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextStore, MemoryPersistence};
    use crate::dispatch::ModelDispatcher;
    use crate::llm::MockLlm;
    use crate::schemas::ToolSelection;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    async fn runtime_with(mock: MockLlm) -> (AgentRuntime, ControlHandle, MissionContext) {
        let store = Arc::new(ContextStore::new(Arc::new(MemoryPersistence::new())));
        let ctx = store
            .create_mission("u", "c", "Explain CAP", ToolSelection::default(), None, None)
            .await
            .unwrap();
        store
            .update_status(&ctx.mission_id, crate::schemas::MissionStatus::Planning, None)
            .await
            .unwrap();
        let runtime = AgentRuntime {
            store: store.clone(),
            dispatcher: Arc::new(ModelDispatcher::with_client_for_all(Arc::new(mock))),
            tools: Arc::new(ToolRegistry::new()),
            events: None,
        };
        let control = ControlHandle::new(ctx.mission_id.clone(), store.clone());
        let ctx = store.get(&ctx.mission_id).await.unwrap();
        (runtime, control, ctx)
    }

    #[tokio::test]
    async fn analysis_parses_structured_output() {
        let mock = MockLlm::new(
            r#"{"request_type":"Informal Explanation","target_tone":"Casual",
                "target_audience":"General Public","requested_length":"Short Summary",
                "requested_format":"Summary Paragraph","preferred_source_types":"",
                "analysis_reasoning":"short request"}"#,
        );
        let (runtime, control, ctx) = runtime_with(mock).await;
        let analysis = analyze_request(&runtime, &control, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.request_type, "Informal Explanation");
        let log = runtime.store.get(&ctx.mission_id).await.unwrap().execution_log;
        assert_eq!(log.len(), 1);
        assert!(log[0].model_details.is_some());
    }

    #[tokio::test]
    async fn unparseable_analysis_degrades_with_warning() {
        let mock = MockLlm::new("definitely not json");
        let (runtime, control, ctx) = runtime_with(mock).await;
        let analysis = analyze_request(&runtime, &control, &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.request_type, "Research Report");
        let log = runtime.store.get(&ctx.mission_id).await.unwrap().execution_log;
        assert!(matches!(
            log.last().unwrap().status,
            crate::schemas::LogStatus::Warning
        ));
    }

    #[tokio::test]
    async fn questions_capped_by_settings() {
        let mock = MockLlm::new(
            r#"{"questions": ["q1","q2","q3","q4"], "generated_thought": "start broad"}"#,
        );
        let (runtime, control, mut ctx) = runtime_with(mock).await;
        ctx.metadata.mission_settings.initial_research_max_questions = Some(2);
        let questions =
            generate_initial_questions(&runtime, &control, &ctx, &default_analysis())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(questions, vec!["q1", "q2"]);
        // thought landed on the pad
        let stored = runtime.store.get(&ctx.mission_id).await.unwrap();
        assert_eq!(stored.thought_pad.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_mission_unwinds() {
        let mock = MockLlm::new("{}");
        let (runtime, control, ctx) = runtime_with(mock).await;
        runtime
            .store
            .update_status(&ctx.mission_id, crate::schemas::MissionStatus::Stopped, None)
            .await
            .unwrap();
        let out = analyze_request(&runtime, &control, &ctx).await.unwrap();
        assert!(out.is_none());
    }
}
