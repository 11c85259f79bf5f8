//! Report outline: recursive section tree (max depth 3) with per-section
//! research strategy.

use serde::{Deserialize, Serialize};

/// How the research/writing for a section is approached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStrategy {
    /// Standard research process: search, take notes, reflect, write from notes.
    #[default]
    ResearchBased,
    /// Written from sibling sections' content only (intro / conclusion).
    ContentBased,
    /// Parent section summarizing its already-written children.
    SynthesizeFromSubsections,
}

impl ResearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStrategy::ResearchBased => "research_based",
            ResearchStrategy::ContentBased => "content_based",
            ResearchStrategy::SynthesizeFromSubsections => "synthesize_from_subsections",
        }
    }
}

/// Maximum nesting of the outline tree (top level = depth 1).
pub const MAX_OUTLINE_DEPTH: usize = 3;

/// One section in the report outline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSection {
    /// Stable unique identifier (e.g. "introduction", "sec_2_1").
    pub section_id: String,
    pub title: String,
    /// What this section should cover; drives query generation and writing.
    pub description: String,
    #[serde(default)]
    pub subsections: Vec<ReportSection>,
    /// Notes assigned to this section; rewritten by each assignment pass.
    #[serde(default)]
    pub associated_note_ids: Vec<String>,
    #[serde(default)]
    pub research_strategy: ResearchStrategy,
}

impl ReportSection {
    pub fn new(
        section_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            section_id: section_id.into(),
            title: title.into(),
            description: description.into(),
            subsections: Vec::new(),
            associated_note_ids: Vec::new(),
            research_strategy: ResearchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: ResearchStrategy) -> Self {
        self.research_strategy = strategy;
        self
    }

    pub fn with_subsections(mut self, subsections: Vec<ReportSection>) -> Self {
        self.subsections = subsections;
        self
    }
}

/// Depth-first walk over an outline, yielding `(section, depth)` with the top
/// level at depth 1.
pub fn walk(outline: &[ReportSection]) -> Vec<(&ReportSection, usize)> {
    fn visit<'a>(
        sections: &'a [ReportSection],
        depth: usize,
        out: &mut Vec<(&'a ReportSection, usize)>,
    ) {
        for s in sections {
            out.push((s, depth));
            visit(&s.subsections, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    visit(outline, 1, &mut out);
    out
}

/// Finds a section anywhere in the tree by id.
pub fn find_section<'a>(outline: &'a [ReportSection], section_id: &str) -> Option<&'a ReportSection> {
    walk(outline)
        .into_iter()
        .map(|(s, _)| s)
        .find(|s| s.section_id == section_id)
}

/// Section ids with `research_based` strategy, depth-first order.
pub fn research_section_ids(outline: &[ReportSection]) -> Vec<String> {
    walk(outline)
        .into_iter()
        .filter(|(s, _)| s.research_strategy == ResearchStrategy::ResearchBased)
        .map(|(s, _)| s.section_id.clone())
        .collect()
}

/// Validates the outline invariants: unique ids across the whole tree,
/// depth ≤ [`MAX_OUTLINE_DEPTH`], and `synthesize_from_subsections` sections
/// have at least one subsection.
pub fn validate_outline(outline: &[ReportSection]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for (section, depth) in walk(outline) {
        if depth > MAX_OUTLINE_DEPTH {
            return Err(format!(
                "section '{}' exceeds max outline depth {}",
                section.section_id, MAX_OUTLINE_DEPTH
            ));
        }
        if section.section_id.trim().is_empty() {
            return Err(format!("section '{}' has an empty id", section.title));
        }
        if !seen.insert(section.section_id.clone()) {
            return Err(format!("duplicate section id '{}'", section.section_id));
        }
        if section.research_strategy == ResearchStrategy::SynthesizeFromSubsections
            && section.subsections.is_empty()
        {
            return Err(format!(
                "section '{}' synthesizes from subsections but has none",
                section.section_id
            ));
        }
    }
    Ok(())
}

/// Fills in missing or duplicate section ids, preserving ids already present.
/// New ids derive from the title slug, suffixed on collision.
pub fn ensure_section_ids(outline: &mut [ReportSection]) {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    fn visit(
        sections: &mut [ReportSection],
        seen: &mut std::collections::HashSet<String>,
    ) {
        for s in sections {
            let base = if s.section_id.trim().is_empty() {
                slugify(&s.title)
            } else {
                s.section_id.clone()
            };
            let mut id = base.clone();
            let mut n = 1;
            while !seen.insert(id.clone()) {
                n += 1;
                id = format!("{}_{}", base, n);
            }
            s.section_id = id;
            visit(&mut s.subsections, seen);
        }
    }
    visit(outline, &mut seen);
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_').to_string();
    let mut out = String::new();
    let mut prev_underscore = false;
    for c in slug.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push(c);
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    if out.is_empty() {
        "section".to_string()
    } else {
        out.chars().take(48).collect()
    }
}
