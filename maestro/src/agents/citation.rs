//! Citation processing: the final pass that turns bracketed note ids into
//! stable citation tokens and builds the reference list.
//!
//! Document notes cite by a short hash of the source document id; web notes
//! by a hash of the URL, so the same source always yields the same token.
//! Internal (synthesis) notes resolve through their `synthesized_from_notes`
//! metadata to the underlying document/web sources; unresolvable citations
//! are dropped with a warning count. References are ordered by first
//! appearance; runs of adjacent brackets collapse into one comma-separated
//! bracket.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::schemas::{Note, SourceType};

/// Result of the citation pass over an assembled report.
pub struct ProcessedReport {
    pub markdown: String,
    /// Reference lines in first-appearance order.
    pub references: Vec<String>,
    /// Citations dropped because no document/web source could be resolved.
    pub dropped: usize,
}

static NOTE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(note_[A-Za-z0-9]+)\]").unwrap());
static BRACKET_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]\s*\[").unwrap());

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Stable citation token for a resolvable source.
fn citation_token(note: &Note) -> Option<String> {
    match note.source_type {
        SourceType::Document => {
            let doc_id = note
                .source_metadata
                .get("doc_id")
                .and_then(Value::as_str)
                .unwrap_or(&note.source_id);
            Some(format!("doc_{}", short_hash(doc_id)))
        }
        SourceType::Web => Some(format!("web_{}", short_hash(&note.source_id))),
        SourceType::Internal => None,
    }
}

/// Reference line built from source metadata.
fn reference_line(note: &Note, token: &str) -> String {
    let meta = |key: &str| {
        note.source_metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    match note.source_type {
        SourceType::Document => {
            let title = meta("title").unwrap_or("Untitled document");
            let mut line = format!("[{}] {}", token, title);
            if let Some(authors) = meta("authors") {
                line.push_str(&format!(", {}", authors));
            }
            if let Some(year) = meta("year") {
                line.push_str(&format!(" ({})", year));
            }
            if let Some(journal) = meta("journal") {
                line.push_str(&format!(". {}", journal));
            }
            line
        }
        SourceType::Web => {
            let title = meta("title").unwrap_or("Untitled page");
            format!("[{}] {}. {}", token, title, note.source_id)
        }
        SourceType::Internal => format!("[{}] internal synthesis", token),
    }
}

/// Resolves an internal note to its underlying document/web notes, recursing
/// through `synthesized_from_notes`. Cycles terminate via the visited set.
fn resolve_internal<'a>(
    note: &'a Note,
    notes_by_id: &HashMap<&str, &'a Note>,
    visited: &mut std::collections::HashSet<&'a str>,
) -> Vec<&'a Note> {
    if !visited.insert(note.note_id.as_str()) {
        return Vec::new();
    }
    match note.source_type {
        SourceType::Document | SourceType::Web => vec![note],
        SourceType::Internal => note
            .source_metadata
            .get("synthesized_from_notes")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|id| notes_by_id.get(id).copied())
                    .flat_map(|n| resolve_internal(n, notes_by_id, visited))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Walks the markdown, replaces note-id brackets with citation tokens, and
/// returns the report with its ordered reference list appended to the struct
/// (not the markdown; the caller decides how to render references).
pub fn process_report(markdown: &str, notes: &[Note]) -> ProcessedReport {
    let notes_by_id: HashMap<&str, &Note> =
        notes.iter().map(|n| (n.note_id.as_str(), n)).collect();
    let mut token_order: Vec<String> = Vec::new();
    let mut reference_by_token: HashMap<String, String> = HashMap::new();
    let mut dropped = 0usize;

    let replaced = NOTE_REF_RE.replace_all(markdown, |caps: &regex::Captures<'_>| {
        let note_id = &caps[1];
        let Some(note) = notes_by_id.get(note_id) else {
            dropped += 1;
            return String::new();
        };
        let mut visited = std::collections::HashSet::new();
        let sources = resolve_internal(note, &notes_by_id, &mut visited);
        if sources.is_empty() {
            dropped += 1;
            return String::new();
        }
        let mut tokens = Vec::new();
        for source in sources {
            let Some(token) = citation_token(source) else {
                continue;
            };
            if !reference_by_token.contains_key(&token) {
                reference_by_token.insert(token.clone(), reference_line(source, &token));
                token_order.push(token.clone());
            }
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        if tokens.is_empty() {
            dropped += 1;
            String::new()
        } else {
            format!("[{}]", tokens.join(", "))
        }
    });

    // Adjacent brackets from multi-source claims become one bracket.
    let collapsed = BRACKET_RUN_RE.replace_all(&replaced, ", ").to_string();

    let references = token_order
        .iter()
        .map(|t| reference_by_token[t].clone())
        .collect();
    ProcessedReport {
        markdown: collapsed,
        references,
        dropped,
    }
}

/// Renders the reference list as a markdown section; empty list yields an
/// empty string.
pub fn render_references(references: &[String]) -> String {
    if references.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## References\n\n");
    for r in references {
        out.push_str(&format!("- {}\n", r));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn web_note(id: &str, url: &str, title: &str) -> Note {
        let mut n = Note::new("claim", SourceType::Web, url).with_metadata("title", json!(title));
        n.note_id = id.to_string();
        n
    }

    fn doc_note(id: &str, chunk: &str, doc: &str, title: &str) -> Note {
        let mut n = Note::new("claim", SourceType::Document, chunk)
            .with_metadata("doc_id", json!(doc))
            .with_metadata("title", json!(title));
        n.note_id = id.to_string();
        n
    }

    #[test]
    fn tokens_are_deterministic_per_source() {
        let a = web_note("note_a", "https://x.example/page", "X");
        let b = web_note("note_b", "https://x.example/page", "X");
        assert_eq!(citation_token(&a), citation_token(&b));
    }

    #[test]
    fn references_ordered_by_first_appearance() {
        let notes = vec![
            web_note("note_a", "https://a.example", "A"),
            doc_note("note_b", "chunk-1", "doc-1", "B"),
        ];
        let md = "Second source first [note_b]. Then the web one [note_a]. Repeat [note_b].";
        let processed = process_report(md, &notes);
        assert_eq!(processed.references.len(), 2);
        assert!(processed.references[0].contains("B"));
        assert!(processed.references[1].contains("https://a.example"));
        assert_eq!(processed.dropped, 0);
    }

    #[test]
    fn multi_source_brackets_collapse() {
        let notes = vec![
            web_note("note_a", "https://a.example", "A"),
            web_note("note_b", "https://b.example", "B"),
        ];
        let processed = process_report("Claim [note_a][note_b].", &notes);
        let open = processed.markdown.matches('[').count();
        assert_eq!(open, 1, "expected one collapsed bracket: {}", processed.markdown);
        assert!(processed.markdown.contains(", "));
    }

    #[test]
    fn internal_note_resolves_to_sources() {
        let web = web_note("note_w", "https://w.example", "W");
        let mut internal = Note::new("synthesis", SourceType::Internal, "syn-1")
            .with_metadata("synthesized_from_notes", json!(["note_w"]));
        internal.note_id = "note_i".into();
        let notes = vec![web, internal];
        let processed = process_report("Synthesized claim [note_i].", &notes);
        assert_eq!(processed.references.len(), 1);
        assert!(processed.references[0].contains("https://w.example"));
        assert_eq!(processed.dropped, 0);
    }

    #[test]
    fn unresolvable_internal_note_is_dropped() {
        let mut internal = Note::new("synthesis", SourceType::Internal, "syn-1");
        internal.note_id = "note_i".into();
        let processed = process_report("Claim [note_i].", &[internal]);
        assert_eq!(processed.dropped, 1);
        assert!(processed.references.is_empty());
        assert!(!processed.markdown.contains("note_i"));
    }

    #[test]
    fn unknown_note_id_is_dropped() {
        let processed = process_report("Claim [note_ghost].", &[]);
        assert_eq!(processed.dropped, 1);
        assert!(!processed.markdown.contains("note_ghost"));
    }

    #[test]
    fn render_references_formats_section() {
        assert_eq!(render_references(&[]), "");
        let out = render_references(&["[web_aaaa] Title. https://a.example".into()]);
        assert!(out.contains("## References"));
        assert!(out.contains("- [web_aaaa]"));
    }
}
