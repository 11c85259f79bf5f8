//! Note assignment: mapping `section_id → [note_id]` with the uniqueness
//! invariant (a note appears under at most one section).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Assignment of notes to sections as returned by the assignment agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NoteAssignments {
    #[serde(default)]
    pub assignments: BTreeMap<String, Vec<String>>,
}

impl NoteAssignments {
    /// Enforces the at-most-one-section invariant. `section_order` breaks
    /// ties: the first section in depth-first outline order keeps the note,
    /// later occurrences are dropped. Sections absent from `section_order`
    /// lose conflicts to listed ones and order among themselves by id.
    pub fn dedupe(&mut self, section_order: &[String]) {
        let rank = |sid: &str| {
            section_order
                .iter()
                .position(|s| s == sid)
                .unwrap_or(usize::MAX)
        };
        let mut owner: BTreeMap<String, String> = BTreeMap::new();
        for (sid, notes) in &self.assignments {
            for note in notes {
                match owner.get(note) {
                    None => {
                        owner.insert(note.clone(), sid.clone());
                    }
                    Some(existing) => {
                        let (er, nr) = (rank(existing), rank(sid));
                        if nr < er || (nr == er && sid < existing) {
                            owner.insert(note.clone(), sid.clone());
                        }
                    }
                }
            }
        }
        for (sid, notes) in self.assignments.iter_mut() {
            notes.retain(|n| owner.get(n).map(|o| o == sid).unwrap_or(false));
            notes.dedup();
        }
    }

    /// All assigned note ids across sections.
    pub fn assigned_note_ids(&self) -> Vec<String> {
        self.assignments.values().flatten().cloned().collect()
    }

    pub fn schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["assignments"],
            "properties": {
                "assignments": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignments(pairs: &[(&str, &[&str])]) -> NoteAssignments {
        let mut a = NoteAssignments::default();
        for (sid, notes) in pairs {
            a.assignments.insert(
                sid.to_string(),
                notes.iter().map(|n| n.to_string()).collect(),
            );
        }
        a
    }

    #[test]
    fn dedupe_keeps_earliest_section_in_outline_order() {
        let mut a = assignments(&[("late", &["n1", "n2"]), ("early", &["n1"])]);
        a.dedupe(&["early".to_string(), "late".to_string()]);
        assert_eq!(a.assignments["early"], vec!["n1"]);
        assert_eq!(a.assignments["late"], vec!["n2"]);
    }

    #[test]
    fn dedupe_tie_breaks_lexicographically_for_unlisted_sections() {
        let mut a = assignments(&[("b_sec", &["n1"]), ("a_sec", &["n1"])]);
        a.dedupe(&[]);
        assert_eq!(a.assignments["a_sec"], vec!["n1"]);
        assert!(a.assignments["b_sec"].is_empty());
    }

    #[test]
    fn no_note_appears_twice_after_dedupe() {
        let mut a = assignments(&[
            ("s1", &["n1", "n2", "n3"]),
            ("s2", &["n2", "n3"]),
            ("s3", &["n3", "n4"]),
        ]);
        a.dedupe(&["s1".into(), "s2".into(), "s3".into()]);
        let mut all = a.assigned_note_ids();
        all.sort();
        let mut deduped = all.clone();
        deduped.dedup();
        assert_eq!(all, deduped);
    }
}
