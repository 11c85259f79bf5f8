//! Planner output shapes: the outline as the LLM returns it (ids optional)
//! and conversion into the validated [`ReportSection`] tree.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::outline::{ensure_section_ids, ReportSection, ResearchStrategy};

/// One outline section as drafted by the planner; `section_id` may be absent
/// (minted during finalization) and subsections nest to the depth cap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub research_strategy: ResearchStrategy,
    #[serde(default)]
    pub associated_note_ids: Vec<String>,
    #[serde(default)]
    pub subsections: Vec<SectionDraft>,
}

impl SectionDraft {
    fn into_section(self) -> ReportSection {
        ReportSection {
            section_id: self.section_id.unwrap_or_default(),
            title: self.title,
            description: self.description,
            subsections: self
                .subsections
                .into_iter()
                .map(SectionDraft::into_section)
                .collect(),
            associated_note_ids: self.associated_note_ids,
            research_strategy: self.research_strategy,
        }
    }
}

/// Planner response for all three planning phases (draft, note-assign, revise).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    pub mission_goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_thought: Option<String>,
    pub report_outline: Vec<SectionDraft>,
}

impl PlanResponse {
    /// Converts drafts into the concrete outline, minting ids where missing.
    pub fn into_outline(self) -> Vec<ReportSection> {
        let mut outline: Vec<ReportSection> = self
            .report_outline
            .into_iter()
            .map(SectionDraft::into_section)
            .collect();
        ensure_section_ids(&mut outline);
        outline
    }

    pub fn schema() -> Value {
        // Recursion is expressed to the model via $defs; depth is enforced
        // later by outline validation.
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["mission_goal", "report_outline"],
            "properties": {
                "mission_goal": { "type": "string" },
                "generated_thought": { "type": "string" },
                "report_outline": {
                    "type": "array",
                    "items": { "$ref": "#/$defs/section" }
                }
            },
            "$defs": {
                "section": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["title", "description", "research_strategy", "subsections"],
                    "properties": {
                        "section_id": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "research_strategy": {
                            "type": "string",
                            "enum": ["research_based", "content_based", "synthesize_from_subsections"]
                        },
                        "associated_note_ids": {
                            "type": "array", "items": { "type": "string" }
                        },
                        "subsections": {
                            "type": "array",
                            "items": { "$ref": "#/$defs/section" }
                        }
                    }
                }
            }
        })
    }
}
