//! Reflection output: assessment of a section's notes plus proposed outline
//! edits, questions, note discards, and one thought-pad line.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kinds of outline edits reflection may propose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationKind {
    AddSection,
    RemoveSection,
    MergeSections,
    ReorderSections,
    ReframeSectionTopic,
    SplitSection,
}

/// One proposed outline edit. `details` carries kind-specific parameters
/// (section ids, new titles, target order).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutlineModification {
    pub modification_type: ModificationKind,
    #[serde(default)]
    pub details: Value,
    pub reasoning: String,
}

/// A candidate new subsection grounded in existing notes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuggestedSubsectionTopic {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub relevant_note_ids: Vec<String>,
    pub reasoning: String,
}

/// Output of one reflection cycle over a section's candidate notes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReflectionOutput {
    #[serde(default)]
    pub overall_assessment: String,
    /// Questions guiding the next research iteration for this section.
    #[serde(default)]
    pub new_questions: Vec<String>,
    #[serde(default)]
    pub suggested_subsection_topics: Vec<SuggestedSubsectionTopic>,
    #[serde(default)]
    pub proposed_modifications: Vec<OutlineModification>,
    /// Section ids needing a full re-research cycle.
    #[serde(default)]
    pub sections_needing_review: Vec<String>,
    /// Notes deemed redundant or irrelevant.
    #[serde(default)]
    pub discard_note_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_thought: Option<String>,
}

impl ReflectionOutput {
    /// True when reflection found nothing to change.
    pub fn is_empty(&self) -> bool {
        self.new_questions.is_empty()
            && self.suggested_subsection_topics.is_empty()
            && self.proposed_modifications.is_empty()
            && self.sections_needing_review.is_empty()
            && self.discard_note_ids.is_empty()
            && self.generated_thought.is_none()
    }

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["overall_assessment", "new_questions", "discard_note_ids"],
            "properties": {
                "overall_assessment": { "type": "string" },
                "new_questions": { "type": "array", "items": { "type": "string" }, "maxItems": 5 },
                "suggested_subsection_topics": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["title", "description", "reasoning"],
                        "properties": {
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "relevant_note_ids": { "type": "array", "items": { "type": "string" } },
                            "reasoning": { "type": "string" }
                        }
                    }
                },
                "proposed_modifications": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["modification_type", "details", "reasoning"],
                        "properties": {
                            "modification_type": {
                                "type": "string",
                                "enum": [
                                    "ADD_SECTION", "REMOVE_SECTION", "MERGE_SECTIONS",
                                    "REORDER_SECTIONS", "REFRAME_SECTION_TOPIC", "SPLIT_SECTION"
                                ]
                            },
                            "details": { "type": "object" },
                            "reasoning": { "type": "string" }
                        }
                    }
                },
                "sections_needing_review": { "type": "array", "items": { "type": "string" } },
                "discard_note_ids": { "type": "array", "items": { "type": "string" } },
                "generated_thought": { "type": "string" }
            }
        })
    }
}
