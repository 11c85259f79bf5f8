//! Request analysis: the messenger's classification of a research request
//! (tone, audience, length, format, source preferences).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Classification of the user's request, persisted as a goal entry and fed
/// into writer prompts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestAnalysis {
    /// e.g. "Academic Literature Review", "Informal Explanation".
    pub request_type: String,
    /// e.g. "Formal Academic", "Conversational".
    pub target_tone: String,
    /// e.g. "Researchers/Experts", "General Public".
    pub target_audience: String,
    /// e.g. "Short Summary", "Comprehensive Report".
    pub requested_length: String,
    /// e.g. "Full Paper", "Bullet Points".
    pub requested_format: String,
    /// Preferred source types; empty when the user stated none.
    #[serde(default)]
    pub preferred_source_types: String,
    pub analysis_reasoning: String,
}

impl RequestAnalysis {
    /// One-line summary stored on the goal pad.
    pub fn goal_text(&self) -> String {
        format!(
            "Produce a {} in {} tone for {} ({}, {} format)",
            self.request_type,
            self.target_tone,
            self.target_audience,
            self.requested_length,
            self.requested_format
        )
    }

    /// JSON schema for constrained decoding.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": [
                "request_type", "target_tone", "target_audience",
                "requested_length", "requested_format",
                "preferred_source_types", "analysis_reasoning"
            ],
            "properties": {
                "request_type": { "type": "string" },
                "target_tone": { "type": "string" },
                "target_audience": { "type": "string" },
                "requested_length": { "type": "string" },
                "requested_format": { "type": "string" },
                "preferred_source_types": { "type": "string" },
                "analysis_reasoning": { "type": "string" }
            }
        })
    }
}

/// Initial exploration questions produced alongside the analysis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuestionSet {
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_thought: Option<String>,
}

impl QuestionSet {
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["questions"],
            "properties": {
                "questions": { "type": "array", "items": { "type": "string" } },
                "generated_thought": { "type": "string" }
            }
        })
    }
}
