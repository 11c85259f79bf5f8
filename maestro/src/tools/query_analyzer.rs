//! Query analysis for intelligent web search: date expressions, domain hints,
//! and depth/volume keywords extracted from the query text.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Search depth requested from the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SearchDepth {
    #[default]
    Standard,
    Advanced,
}

/// Parameters derived from the query text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryAnalysis {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub depth: SearchDepth,
    /// Suggested result count when volume keywords are present.
    pub max_results: Option<usize>,
}

static LAST_N: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:last|past)\s+(\d+)\s+(day|month|year)s?\b").unwrap());
static SINCE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bsince\s+((?:19|20)\d{2})\b").unwrap());
static AFTER_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bafter\s+((?:19|20)\d{2})\b").unwrap());
static BEFORE_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbefore\s+((?:19|20)\d{2})\b").unwrap());
static BETWEEN_YEARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbetween\s+((?:19|20)\d{2})\s+and\s+((?:19|20)\d{2})\b").unwrap());
static BARE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());
static RECENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:recent|recently|latest|newest)\b").unwrap());

const ACADEMIC_DOMAINS: &[&str] = &[
    "arxiv.org",
    "scholar.google.com",
    "pubmed.ncbi.nlm.nih.gov",
    "ieee.org",
    "acm.org",
];
const NEWS_DOMAINS: &[&str] = &[
    "reuters.com",
    "bloomberg.com",
    "nytimes.com",
    "bbc.com",
    "cnn.com",
];
const TECH_DOMAINS: &[&str] = &["github.com", "stackoverflow.com", "medium.com"];
const MEDICAL_DOMAINS: &[&str] = &["pubmed.ncbi.nlm.nih.gov", "nih.gov", "who.int", "nejm.org"];
const LEGAL_DOMAINS: &[&str] = &["law.cornell.edu", "justia.com", "findlaw.com"];

const ADVANCED_KEYWORDS: &[&str] = &[
    "comprehensive",
    "detailed",
    "in-depth",
    "thorough",
    "extensive",
    "complete",
];
const STANDARD_KEYWORDS: &[&str] = &["quick", "brief", "summary", "overview", "basic", "simple"];
const HIGH_VOLUME: &[&str] = &["many", "multiple", "various", "several", "numerous"];
const LOW_VOLUME: &[&str] = &["few", "couple", "single", "specific"];

/// Analyzes a query against `today` (injected so results are deterministic).
pub fn analyze_query(query: &str, today: NaiveDate) -> QueryAnalysis {
    let lower = query.to_lowercase();
    let mut analysis = QueryAnalysis::default();

    let (from, to) = extract_date_range(&lower, today);
    analysis.from_date = from;
    analysis.to_date = to;

    for (keywords, domains) in [
        (
            &["academic", "research paper", "journal", "peer-reviewed", "scholarly"][..],
            ACADEMIC_DOMAINS,
        ),
        (&["news", "headline", "current events"][..], NEWS_DOMAINS),
        (&["code", "programming", "library", "framework"][..], TECH_DOMAINS),
        (&["medical", "clinical", "disease", "treatment"][..], MEDICAL_DOMAINS),
        (&["legal", "law", "statute", "court"][..], LEGAL_DOMAINS),
    ] {
        if keywords.iter().any(|k| lower.contains(k)) {
            for d in domains {
                if !analysis.include_domains.contains(&d.to_string()) {
                    analysis.include_domains.push(d.to_string());
                }
            }
        }
    }

    if ADVANCED_KEYWORDS.iter().any(|k| lower.contains(k)) {
        analysis.depth = SearchDepth::Advanced;
    } else if STANDARD_KEYWORDS.iter().any(|k| lower.contains(k)) {
        analysis.depth = SearchDepth::Standard;
    }

    if HIGH_VOLUME.iter().any(|k| lower.contains(k)) {
        analysis.max_results = Some(10);
    } else if LOW_VOLUME.iter().any(|k| lower.contains(k)) {
        analysis.max_results = Some(3);
    }

    analysis
}

fn extract_date_range(lower: &str, today: NaiveDate) -> (Option<String>, Option<String>) {
    if let Some(caps) = LAST_N.captures(lower) {
        let n: i64 = caps[1].parse().unwrap_or(1);
        let days = match &caps[2] {
            "day" => n,
            "month" => n * 30,
            _ => n * 365,
        };
        return (Some((today - Duration::days(days)).to_string()), None);
    }
    if let Some(caps) = BETWEEN_YEARS.captures(lower) {
        return (
            Some(format!("{}-01-01", &caps[1])),
            Some(format!("{}-12-31", &caps[2])),
        );
    }
    if let Some(caps) = SINCE_YEAR.captures(lower) {
        return (Some(format!("{}-01-01", &caps[1])), None);
    }
    if let Some(caps) = AFTER_YEAR.captures(lower) {
        return (Some(format!("{}-12-31", &caps[1])), None);
    }
    if let Some(caps) = BEFORE_YEAR.captures(lower) {
        return (None, Some(format!("{}-01-01", &caps[1])));
    }
    if RECENT.is_match(lower) {
        return (Some((today - Duration::days(180)).to_string()), None);
    }
    if let Some(caps) = BARE_YEAR.captures(lower) {
        let year = &caps[1];
        return (
            Some(format!("{}-01-01", year)),
            Some(format!("{}-12-31", year)),
        );
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[test]
    fn last_n_years_sets_from_date() {
        let a = analyze_query("advances in batteries over the last 5 years", today());
        assert_eq!(a.from_date.as_deref(), Some("2021-08-02"));
        assert!(a.to_date.is_none());
    }

    #[test]
    fn since_year() {
        let a = analyze_query("transformer models since 2020", today());
        assert_eq!(a.from_date.as_deref(), Some("2020-01-01"));
    }

    #[test]
    fn between_years() {
        let a = analyze_query("studies between 2015 and 2018", today());
        assert_eq!(a.from_date.as_deref(), Some("2015-01-01"));
        assert_eq!(a.to_date.as_deref(), Some("2018-12-31"));
    }

    #[test]
    fn before_year_sets_only_to_date() {
        let a = analyze_query("theories before 1990", today());
        assert!(a.from_date.is_none());
        assert_eq!(a.to_date.as_deref(), Some("1990-01-01"));
    }

    #[test]
    fn recent_means_last_six_months() {
        let a = analyze_query("recent results on fusion", today());
        assert_eq!(a.from_date.as_deref(), Some("2026-02-02"));
    }

    #[test]
    fn bare_year_bounds_that_year() {
        let a = analyze_query("what happened in 2019", today());
        assert_eq!(a.from_date.as_deref(), Some("2019-01-01"));
        assert_eq!(a.to_date.as_deref(), Some("2019-12-31"));
    }

    #[test]
    fn academic_hint_adds_domains() {
        let a = analyze_query("peer-reviewed studies on sleep", today());
        assert!(a.include_domains.iter().any(|d| d == "arxiv.org"));
    }

    #[test]
    fn depth_and_volume_keywords() {
        let a = analyze_query("comprehensive review of many approaches", today());
        assert_eq!(a.depth, SearchDepth::Advanced);
        assert_eq!(a.max_results, Some(10));

        let b = analyze_query("quick overview, just a few examples", today());
        assert_eq!(b.depth, SearchDepth::Standard);
        assert_eq!(b.max_results, Some(3));
    }

    #[test]
    fn plain_query_is_neutral() {
        let a = analyze_query("how do plants photosynthesize", today());
        assert_eq!(a, QueryAnalysis::default());
    }
}
