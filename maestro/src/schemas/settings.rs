//! Per-mission settings. All fields are optional so the planner's
//! auto-optimization can distinguish user-set values from defaults; effective
//! values come from the accessor methods.

use serde::{Deserialize, Serialize};

/// Mission-level tuning knobs. Unset fields fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_research_max_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_research_max_questions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_research_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_passes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_pad_context_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_exploration_doc_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_exploration_web_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_research_doc_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_research_web_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_notes_for_assignment_reranking: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_final_replanning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_optimize_params: Option<bool>,
}

impl MissionSettings {
    pub fn initial_research_max_depth(&self) -> u32 {
        self.initial_research_max_depth.unwrap_or(2)
    }

    pub fn initial_research_max_questions(&self) -> u32 {
        self.initial_research_max_questions.unwrap_or(10)
    }

    pub fn structured_research_rounds(&self) -> u32 {
        self.structured_research_rounds.unwrap_or(2)
    }

    pub fn writing_passes(&self) -> u32 {
        self.writing_passes.unwrap_or(2).max(1)
    }

    pub fn thought_pad_context_limit(&self) -> usize {
        self.thought_pad_context_limit.unwrap_or(10)
    }

    pub fn initial_exploration_doc_results(&self) -> usize {
        self.initial_exploration_doc_results.unwrap_or(5)
    }

    pub fn initial_exploration_web_results(&self) -> usize {
        self.initial_exploration_web_results.unwrap_or(3)
    }

    pub fn main_research_doc_results(&self) -> usize {
        self.main_research_doc_results.unwrap_or(5)
    }

    pub fn main_research_web_results(&self) -> usize {
        self.main_research_web_results.unwrap_or(3)
    }

    pub fn max_notes_for_assignment_reranking(&self) -> usize {
        self.max_notes_for_assignment_reranking.unwrap_or(80)
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests.unwrap_or(5).max(1)
    }

    pub fn skip_final_replanning(&self) -> bool {
        self.skip_final_replanning.unwrap_or(false)
    }

    pub fn auto_optimize_params(&self) -> bool {
        self.auto_optimize_params.unwrap_or(false)
    }

    /// Applies advisory tuning: sets only fields the user left unset.
    /// Explicit user values always win.
    pub fn apply_advisory(&mut self, suggested: &MissionSettings) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = suggested.$field.clone();
                }
            };
        }
        fill!(initial_research_max_depth);
        fill!(initial_research_max_questions);
        fill!(structured_research_rounds);
        fill!(writing_passes);
        fill!(thought_pad_context_limit);
        fill!(initial_exploration_doc_results);
        fill!(initial_exploration_web_results);
        fill!(main_research_doc_results);
        fill!(main_research_web_results);
        fill!(max_notes_for_assignment_reranking);
        fill!(max_concurrent_requests);
        fill!(skip_final_replanning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = MissionSettings::default();
        assert_eq!(s.structured_research_rounds(), 2);
        assert_eq!(s.writing_passes(), 2);
        assert_eq!(s.max_concurrent_requests(), 5);
        assert!(!s.auto_optimize_params());
    }

    #[test]
    fn writing_passes_floor_is_one() {
        let s = MissionSettings {
            writing_passes: Some(0),
            ..Default::default()
        };
        assert_eq!(s.writing_passes(), 1);
    }

    #[test]
    fn zero_research_rounds_is_respected() {
        let s = MissionSettings {
            structured_research_rounds: Some(0),
            ..Default::default()
        };
        assert_eq!(s.structured_research_rounds(), 0);
    }

    #[test]
    fn advisory_never_overrides_user_values() {
        let mut user = MissionSettings {
            structured_research_rounds: Some(4),
            ..Default::default()
        };
        let suggested = MissionSettings {
            structured_research_rounds: Some(1),
            writing_passes: Some(3),
            ..Default::default()
        };
        user.apply_advisory(&suggested);
        assert_eq!(user.structured_research_rounds(), 4);
        assert_eq!(user.writing_passes(), 3);
    }

    #[test]
    fn unknown_keys_are_rejected_gracefully() {
        // serde default: unknown keys are ignored, recognized keys parse.
        let s: MissionSettings =
            serde_json::from_str(r#"{"writing_passes": 1, "not_a_key": true}"#).unwrap();
        assert_eq!(s.writing_passes(), 1);
    }
}
