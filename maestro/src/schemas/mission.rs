//! Mission data model: status, context, notes, pads, execution log, stats.
//!
//! [`MissionContext`] is the single source of truth per mission. It is owned
//! by the context store; agents read snapshots and submit typed updates, they
//! never hold a mutable reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::outline::ReportSection;
use super::settings::MissionSettings;

/// Mission status. Edges of the state machine are enforced by
/// [`MissionStatus::can_transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Pending,
    Planning,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Planning => "planning",
            MissionStatus::Running => "running",
            MissionStatus::Paused => "paused",
            MissionStatus::Stopped => "stopped",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Stopped | MissionStatus::Completed | MissionStatus::Failed
        )
    }

    /// Legal transitions:
    /// `pending → planning → running ↔ paused`, `running → stopped|completed`,
    /// any non-terminal `→ failed`.
    pub fn can_transition(&self, to: MissionStatus) -> bool {
        use MissionStatus::*;
        if *self == to {
            return false;
        }
        match (*self, to) {
            (_, Failed) => !self.is_terminal(),
            (Pending, Planning) => true,
            (Planning, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Stopped) => true,
            // A pause must not make a mission unstoppable.
            (Paused, Stopped) => true,
            (Planning, Stopped) => true,
            (Pending, Stopped) => true,
            (Running, Completed) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MissionStatus::Pending),
            "planning" => Ok(MissionStatus::Planning),
            "running" => Ok(MissionStatus::Running),
            "paused" => Ok(MissionStatus::Paused),
            "stopped" => Ok(MissionStatus::Stopped),
            "completed" => Ok(MissionStatus::Completed),
            "failed" => Ok(MissionStatus::Failed),
            other => Err(format!("unknown mission status: {}", other)),
        }
    }
}

/// Which retrieval tools a mission may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub local_rag: bool,
    pub web_search: bool,
}

impl Default for ToolSelection {
    fn default() -> Self {
        Self {
            local_rag: true,
            web_search: true,
        }
    }
}

/// Where a note's claim came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Local corpus chunk; `source_id` is the chunk id.
    Document,
    /// Web page; `source_id` is the URL.
    Web,
    /// Synthesized from other notes; `source_id` is the synthesis id.
    Internal,
}

/// A self-contained sourced claim extracted from a document chunk or web page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Note {
    pub note_id: String,
    pub content: String,
    pub source_type: SourceType,
    pub source_id: String,
    #[serde(default)]
    pub source_metadata: BTreeMap<String, Value>,
    /// Set by reflection; discarded notes stay in the record but are excluded
    /// from assignment and writing.
    #[serde(default)]
    pub discarded: bool,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn new(
        content: impl Into<String>,
        source_type: SourceType,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            note_id: format!("note_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            content: content.into(),
            source_type,
            source_id: source_id.into(),
            source_metadata: BTreeMap::new(),
            discarded: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.source_metadata.insert(key.into(), value);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Addressed,
    Obsolete,
}

/// One active research objective on the goal pad.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalEntry {
    pub goal_id: String,
    pub text: String,
    pub status: GoalStatus,
    pub source_agent: String,
    pub created_at: DateTime<Utc>,
}

/// One agent-generated reminder on the thought pad. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThoughtEntry {
    pub thought_id: String,
    pub text: String,
    pub source_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Thought pad capacity: oldest entries are evicted beyond this.
pub const THOUGHT_PAD_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failure,
    Warning,
}

/// Provider/model/cost breakdown attached to log entries for LLM calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelCallDetails {
    pub model_name: String,
    pub provider: String,
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub native_tokens: u64,
}

/// Append-only record of one agent/tool action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_details: Option<ModelCallDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_interactions: Option<Vec<String>>,
}

impl ExecutionLogEntry {
    pub fn new(
        agent_name: impl Into<String>,
        action: impl Into<String>,
        status: LogStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_name: agent_name.into(),
            action: action.into(),
            input_summary: None,
            output_summary: None,
            status,
            error_message: None,
            full_input: None,
            full_output: None,
            model_details: None,
            tool_calls: None,
            file_interactions: None,
        }
    }

    pub fn with_input_summary(mut self, s: impl Into<String>) -> Self {
        self.input_summary = Some(s.into());
        self
    }

    pub fn with_output_summary(mut self, s: impl Into<String>) -> Self {
        self.output_summary = Some(s.into());
        self
    }

    pub fn with_error(mut self, s: impl Into<String>) -> Self {
        self.error_message = Some(s.into());
        self
    }

    pub fn with_model_details(mut self, details: ModelCallDetails) -> Self {
        self.model_details = Some(details);
        self
    }
}

/// Running totals of cost, tokens, and tool usage for one mission.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MissionStats {
    pub total_cost: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_native_tokens: u64,
    pub total_web_search_calls: u64,
    pub total_doc_search_calls: u64,
}

impl MissionStats {
    /// Folds one call's usage in. Cached calls report zero usage and leave the
    /// totals untouched, so retries that hit a cache cannot double count.
    pub fn absorb(&mut self, details: &ModelCallDetails) {
        self.total_cost += details.cost;
        self.total_prompt_tokens += details.prompt_tokens;
        self.total_completion_tokens += details.completion_tokens;
        self.total_native_tokens += details.native_tokens;
    }
}

/// Recognized metadata carried by a mission.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MissionMetadata {
    #[serde(default)]
    pub tool_selection: ToolSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_group_id: Option<String>,
    #[serde(default)]
    pub mission_settings: MissionSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_questions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_questions: Option<Vec<String>>,
}

/// The mutable bag of state for one mission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissionContext {
    pub mission_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub user_request: String,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<ReportSection>>,
    /// Insertion-ordered; note ids are stable once minted.
    #[serde(default)]
    pub notes: Vec<Note>,
    /// Most recent draft per section.
    #[serde(default)]
    pub report_content: BTreeMap<String, String>,
    #[serde(default)]
    pub goal_pad: Vec<GoalEntry>,
    #[serde(default)]
    pub thought_pad: Vec<ThoughtEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_scratchpad: Option<String>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub stats: MissionStats,
    #[serde(default)]
    pub metadata: MissionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_report_version: Option<u32>,
}

impl MissionContext {
    pub fn new(
        mission_id: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        user_request: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            mission_id: mission_id.into(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_request: user_request.into(),
            status: MissionStatus::Pending,
            created_at: now,
            updated_at: now,
            error_info: None,
            plan: None,
            notes: Vec::new(),
            report_content: BTreeMap::new(),
            goal_pad: Vec::new(),
            thought_pad: Vec::new(),
            agent_scratchpad: None,
            execution_log: Vec::new(),
            stats: MissionStats::default(),
            metadata: MissionMetadata::default(),
            current_report_version: None,
        }
    }

    pub fn note(&self, note_id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.note_id == note_id)
    }

    /// Notes not discarded by reflection, in insertion order.
    pub fn active_notes(&self) -> Vec<&Note> {
        self.notes.iter().filter(|n| !n.discarded).collect()
    }

    /// Active goals in insertion order.
    pub fn active_goals(&self) -> Vec<&GoalEntry> {
        self.goal_pad
            .iter()
            .filter(|g| g.status == GoalStatus::Active)
            .collect()
    }

    /// The `limit` most recent thoughts, oldest first.
    pub fn recent_thoughts(&self, limit: usize) -> Vec<&ThoughtEntry> {
        let start = self.thought_pad.len().saturating_sub(limit);
        self.thought_pad[start..].iter().collect()
    }
}

/// One stored report version. `(mission_id, version)` is unique; at most one
/// version per mission has `is_current = true`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchReportVersion {
    pub mission_id: String,
    pub version: u32,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_notes: Option<String>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_accepts_documented_edges() {
        use MissionStatus::*;
        assert!(Pending.can_transition(Planning));
        assert!(Planning.can_transition(Running));
        assert!(Running.can_transition(Paused));
        assert!(Paused.can_transition(Running));
        assert!(Running.can_transition(Stopped));
        assert!(Running.can_transition(Completed));
        assert!(Planning.can_transition(Failed));
    }

    #[test]
    fn status_machine_rejects_bad_edges() {
        use MissionStatus::*;
        assert!(!Completed.can_transition(Running));
        assert!(!Stopped.can_transition(Running));
        assert!(!Pending.can_transition(Running));
        assert!(!Failed.can_transition(Failed));
        assert!(!Completed.can_transition(Failed));
    }

    #[test]
    fn stats_absorb_zero_usage_is_noop() {
        let mut stats = MissionStats::default();
        stats.absorb(&ModelCallDetails::default());
        assert_eq!(stats, MissionStats::default());
    }

    #[test]
    fn recent_thoughts_returns_tail() {
        let mut ctx = MissionContext::new("m", "c", "u", "req");
        for i in 0..5 {
            ctx.thought_pad.push(ThoughtEntry {
                thought_id: format!("t{}", i),
                text: format!("thought {}", i),
                source_agent: "test".into(),
                created_at: Utc::now(),
            });
        }
        let recent = ctx.recent_thoughts(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].thought_id, "t3");
        assert_eq!(recent[1].thought_id, "t4");
    }

    #[test]
    fn active_notes_excludes_discarded() {
        let mut ctx = MissionContext::new("m", "c", "u", "req");
        let mut a = Note::new("claim a", SourceType::Web, "https://a.example");
        a.discarded = true;
        let b = Note::new("claim b", SourceType::Document, "chunk-1");
        ctx.notes.push(a);
        ctx.notes.push(b);
        let active = ctx.active_notes();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "claim b");
    }

    #[test]
    fn context_round_trips_through_json() {
        let mut ctx = MissionContext::new("m1", "c1", "u1", "explain CAP");
        ctx.notes
            .push(Note::new("claim", SourceType::Web, "https://x.example"));
        ctx.report_content
            .insert("intro".into(), "# Intro".into());
        let json = serde_json::to_string(&ctx).unwrap();
        let back: MissionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mission_id, "m1");
        assert_eq!(back.notes.len(), 1);
        assert_eq!(back.report_content.get("intro").unwrap(), "# Intro");
    }
}
