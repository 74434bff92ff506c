//! Fab copilot: keyword intent routing over recent wafer history
//!
//! ```text
//! query ──► intent (yield | tool | pattern | trend | unknown)
//!       ──► aggregate over the most recent N records
//!       ──► templated answer + follow-up suggestions
//! ```
//!
//! Never fails on content: unknown questions, empty questions and an empty
//! store all produce a usable answer.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CopilotConfig;
use crate::storage::{HistoryFilter, StorageError, WaferRepository};
use crate::types::{DefectPattern, WaferAnalysis};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Yield,
    ToolPerformance,
    PatternFocus,
    Trend,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopilotAnswer {
    pub intent: QueryIntent,
    pub response: String,
    pub suggestions: Vec<String>,
    pub data_sources: Vec<String>,
}

// ============================================================================
// Intent classification
// ============================================================================

/// Checked in order; first match wins.
const INTENT_PATTERNS: &[(&str, QueryIntent)] = &[
    (r"(?i)\b(yield|pass[\s-]?rate)\b", QueryIntent::Yield),
    (r"(?i)\b(tools?|equipment|chambers?)\b", QueryIntent::ToolPerformance),
    (r"(?i)\b(defects?|patterns?|scratch(es)?|edge|center|donut)\b", QueryIntent::PatternFocus),
    (r"(?i)\b(trends?|recent|history|over\s+time)\b", QueryIntent::Trend),
];

fn intent_table() -> &'static [(Regex, QueryIntent)] {
    static TABLE: OnceLock<Vec<(Regex, QueryIntent)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .map(|(pattern, intent)| (Regex::new(pattern).expect("intent patterns are valid"), *intent))
            .collect()
    })
}

pub fn classify(query: &str) -> QueryIntent {
    intent_table()
        .iter()
        .find(|(re, _)| re.is_match(query))
        .map_or(QueryIntent::Unknown, |(_, intent)| *intent)
}

// ============================================================================
// Suggestions
// ============================================================================

const SUGGESTION_POOL: &[&str] = &[
    "What's the current yield rate?",
    "Which tool has the most defects?",
    "Show recent defect trends",
    "Show defect distribution",
    "Which tool is causing failures?",
    "Show trend over time",
    "Which defect pattern is most common?",
    "How are the chambers performing?",
];

const ONBOARDING_SUGGESTIONS: &[&str] = &[
    "Upload a wafer map for analysis",
    "Submit a lot for batch analysis",
    "Check system health",
];

fn suggestions(intent: QueryIntent) -> Vec<String> {
    let picks: &[usize] = match intent {
        QueryIntent::Yield => &[4, 3, 5],
        QueryIntent::ToolPerformance => &[7, 3, 0],
        QueryIntent::PatternFocus => &[1, 5],
        QueryIntent::Trend => &[0, 1, 6],
        QueryIntent::Unknown => &[0, 1, 2],
    };
    picks.iter().map(|&i| SUGGESTION_POOL[i].to_string()).collect()
}

/// Yield quality band.
pub fn quality_band(yield_rate: f64) -> &'static str {
    if yield_rate >= 90.0 {
        "Excellent"
    } else if yield_rate >= 75.0 {
        "Good"
    } else {
        "Concerning"
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Counts over the records a query sees.
struct Snapshot<'a> {
    records: &'a [WaferAnalysis],
    passed: usize,
    failed: usize,
    /// Predicted pattern counts over all records, most common first
    patterns: Vec<(DefectPattern, usize)>,
    /// FAIL counts per tool, most failures first
    tool_failures: Vec<(String, usize)>,
}

fn ranked<K: Ord>(counts: BTreeMap<K, usize>) -> Vec<(K, usize)> {
    let mut v: Vec<_> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1));
    v
}

impl<'a> Snapshot<'a> {
    fn new(records: &'a [WaferAnalysis]) -> Self {
        let failed = records.iter().filter(|r| r.is_defective()).count();
        let mut patterns = BTreeMap::new();
        let mut tools = BTreeMap::new();
        for record in records {
            *patterns.entry(record.pattern).or_insert(0) += 1;
            if record.is_defective() {
                let tool = record.tool_id.clone().unwrap_or_else(|| "Unknown".to_string());
                *tools.entry(tool).or_insert(0) += 1;
            }
        }
        Self {
            records,
            passed: records.len() - failed,
            failed,
            patterns: ranked(patterns),
            tool_failures: ranked(tools),
        }
    }

    fn total(&self) -> usize {
        self.records.len()
    }

    fn pct(&self, n: usize) -> f64 {
        n as f64 / self.total().max(1) as f64 * 100.0
    }

    fn yield_rate(&self) -> f64 {
        self.pct(self.passed)
    }

    fn defect_patterns(&self) -> impl Iterator<Item = &(DefectPattern, usize)> {
        self.patterns.iter().filter(|(p, _)| p.is_defect())
    }
}

/// Defect pattern named in the query. A bare "edge" resolves to whichever
/// edge pattern is more frequent in the data.
fn mentioned_pattern(query: &str, snapshot: &Snapshot<'_>) -> Option<DefectPattern> {
    let normalized: String = query
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let joined = words.join("");

    let named = DefectPattern::ALL
        .iter()
        .filter(|p| p.is_defect())
        .filter(|p| {
            let key: String = p.as_str().to_ascii_lowercase().chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            // Multi-word names match on the joined form, single words on tokens
            if key.len() > 6 && p.as_str().contains('-') {
                joined.contains(&key)
            } else {
                words.iter().any(|w| w.trim_end_matches("es").trim_end_matches('s') == key || *w == key)
            }
        })
        .copied()
        .next();
    if named.is_some() {
        return named;
    }

    if words.contains(&"edge") {
        let count = |p: DefectPattern| {
            snapshot
                .patterns
                .iter()
                .find(|(q, _)| *q == p)
                .map_or(0, |(_, n)| *n)
        };
        return Some(if count(DefectPattern::EdgeLoc) > count(DefectPattern::EdgeRing) {
            DefectPattern::EdgeLoc
        } else {
            DefectPattern::EdgeRing
        });
    }
    None
}

// ============================================================================
// Copilot
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Copilot {
    config: CopilotConfig,
}

impl Copilot {
    pub fn new(config: CopilotConfig) -> Self {
        Self { config }
    }

    /// Answer `query` from the most recent records in `store`.
    pub fn answer(&self, store: &dyn WaferRepository, query: &str) -> Result<CopilotAnswer, StorageError> {
        if query.trim().is_empty() {
            return Ok(self.respond(query, &[]));
        }
        let records = store.history(&HistoryFilter::recent(self.config.recent_records.max(1)))?;
        Ok(self.respond(query, &records))
    }

    /// Answer `query` from `records` (newest first).
    pub fn respond(&self, query: &str, records: &[WaferAnalysis]) -> CopilotAnswer {
        if query.trim().is_empty() {
            return CopilotAnswer {
                intent: QueryIntent::Unknown,
                response: "Please ask a question about your wafer data.".to_string(),
                suggestions: suggestions(QueryIntent::Unknown),
                data_sources: Vec::new(),
            };
        }

        let intent = classify(query);
        if records.is_empty() {
            return CopilotAnswer {
                intent,
                response: "No wafer data available yet. Analyze some wafers to start building insights.".to_string(),
                suggestions: ONBOARDING_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
                data_sources: Vec::new(),
            };
        }

        let snapshot = Snapshot::new(records);
        let response = match intent {
            QueryIntent::Yield => yield_answer(&snapshot),
            QueryIntent::ToolPerformance => tool_answer(&snapshot, query),
            QueryIntent::PatternFocus => pattern_answer(&snapshot, mentioned_pattern(query, &snapshot)),
            QueryIntent::Trend => trend_answer(&snapshot),
            QueryIntent::Unknown => status_answer(&snapshot),
        };
        debug!(intent = ?intent, records = snapshot.total(), "Copilot query answered");

        CopilotAnswer {
            intent,
            response,
            suggestions: suggestions(intent),
            data_sources: vec![format!("Last {} wafer analyses", snapshot.total())],
        }
    }
}

// Writing into a String cannot fail; results of `writeln!` are ignored below.

fn yield_answer(s: &Snapshot<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Yield Analysis (last {} wafers)", s.total());
    let _ = writeln!(out, "Current yield rate: {:.1}% ({})", s.yield_rate(), quality_band(s.yield_rate()));
    let _ = writeln!(out, "- Passed: {} wafers ({:.1}%)", s.passed, s.pct(s.passed));
    let _ = write!(out, "- Failed: {} wafers ({:.1}%)", s.failed, s.pct(s.failed));

    if s.failed == 0 {
        out.push_str("\n\nAll wafers passed quality checks.");
        return out;
    }
    out.push_str("\n\nTop failure patterns:");
    for (pattern, count) in s.defect_patterns().take(3) {
        let _ = write!(out, "\n- {pattern}: {count} wafers ({:.1}%)", s.pct(*count));
    }
    if let Some((tool, count)) = s.tool_failures.first() {
        let _ = write!(out, "\n\nTool alert: {tool} has {count} failures");
    }
    out
}

fn tool_answer(s: &Snapshot<'_>, query: &str) -> String {
    if s.tool_failures.is_empty() {
        return format!(
            "Tool Performance Analysis\n\nAll tools performing well. No failures detected in the last {} wafers.",
            s.total()
        );
    }

    let mut out = format!("Tool Performance Analysis (last {} wafers)\n\nTools ranked by failures:", s.total());
    for (tool, count) in s.tool_failures.iter().take(5) {
        let share = *count as f64 / s.failed.max(1) as f64 * 100.0;
        let _ = write!(out, "\n- {tool}: {count} failures ({share:.1}% of all failures)");
    }

    let lowered = query.to_ascii_lowercase();
    if let Some((tool, _)) = s.tool_failures.iter().find(|(t, _)| lowered.contains(&t.to_ascii_lowercase())) {
        let mut patterns = BTreeMap::new();
        for record in s.records.iter().filter(|r| r.is_defective() && r.tool_id.as_deref() == Some(tool.as_str())) {
            *patterns.entry(record.pattern).or_insert(0) += 1;
        }
        let _ = write!(out, "\n\n{tool} defect patterns:");
        for (pattern, count) in ranked(patterns).into_iter().take(3) {
            let _ = write!(out, "\n- {pattern}: {count} wafers");
        }
    }

    let mut chambers = BTreeMap::new();
    for record in s.records.iter().filter(|r| r.is_defective()) {
        if let Some(chamber) = record.chamber_id.as_deref() {
            *chambers.entry(chamber).or_insert(0) += 1;
        }
    }
    if let Some((chamber, count)) = ranked(chambers).first() {
        let _ = write!(out, "\n\nMost failures by chamber: {chamber} ({count})");
    }
    out
}

fn pattern_answer(s: &Snapshot<'_>, focus: Option<DefectPattern>) -> String {
    let mut out = format!("Defect Pattern Analysis (last {} wafers)\n\nDistribution:", s.total());
    for (pattern, count) in s.patterns.iter().take(10) {
        let _ = write!(out, "\n- {pattern}: {count} wafers ({:.1}%)", s.pct(*count));
    }

    let Some(pattern) = focus else {
        return out;
    };
    let matching: Vec<&WaferAnalysis> = s.records.iter().filter(|r| r.pattern == pattern).collect();
    let _ = write!(out, "\n\nFocus: {pattern} defects");
    let _ = write!(out, "\n- Occurrences: {} wafers", matching.len());
    let _ = write!(out, "\n- Percentage: {:.1}% of total", s.pct(matching.len()));

    let mut tools = BTreeMap::new();
    for tool in matching.iter().filter_map(|r| r.tool_id.as_deref()) {
        *tools.entry(tool).or_insert(0) += 1;
    }
    if let Some((tool, _)) = ranked(tools).first() {
        let _ = write!(out, "\n- Most affected tool: {tool}");
    }
    out
}

fn trend_answer(s: &Snapshot<'_>) -> String {
    let newest = s.records.iter().map(WaferAnalysis::timestamp).max();
    let oldest = s.records.iter().map(WaferAnalysis::timestamp).min();
    let mut out = format!("Trend Analysis (last {} wafers)", s.total());
    if let (Some(oldest), Some(newest)) = (oldest, newest) {
        let _ = write!(
            out,
            "\n\nTime range: {} to {}",
            oldest.format("%Y-%m-%d %H:%M"),
            newest.format("%Y-%m-%d %H:%M")
        );
    }
    let _ = write!(out, "\n\nRecent activity:\n- Total analyzed: {} wafers", s.total());
    let _ = write!(out, "\n- Yield rate: {:.1}%", s.yield_rate());
    if let Some((pattern, count)) = s.defect_patterns().next() {
        let _ = write!(out, "\n- Most common defect: {pattern} ({count} wafers)");
    }

    let band = quality_band(s.yield_rate());
    let detail = match band {
        "Excellent" => "yield at or above 90%",
        "Good" => "yield 75-90%, room for improvement",
        _ => "yield below 75%, action needed",
    };
    let _ = write!(out, "\n\nQuality trend: {band} - {detail}");
    out
}

fn status_answer(s: &Snapshot<'_>) -> String {
    let avg_confidence = s.records.iter().map(|r| r.confidence).sum::<f64>() / s.total().max(1) as f64;
    let mut out = format!("Inspection Status (last {} analyses)", s.total());
    let _ = write!(out, "\n- Yield rate: {:.1}%", s.yield_rate());
    let _ = write!(out, "\n- Passed: {} wafers", s.passed);
    let _ = write!(out, "\n- Failed: {} wafers", s.failed);
    let _ = write!(out, "\n- Average confidence: {:.1}%", avg_confidence * 100.0);

    out.push_str("\n\nTop defect types:");
    for (pattern, count) in s.patterns.iter().take(3) {
        let _ = write!(out, "\n- {pattern}: {count} wafers");
    }
    if !s.tool_failures.is_empty() {
        out.push_str("\n\nTools needing attention:");
        for (tool, count) in s.tool_failures.iter().take(2) {
            let _ = write!(out, "\n- {tool}: {count} failures");
        }
    }
    out.push_str("\n\nAsk about yield, tools, defect patterns or trends.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{fail, pass};
    use crate::storage::InMemoryWaferStore;
    use chrono::{Duration, Utc};

    fn records() -> Vec<WaferAnalysis> {
        let now = Utc::now();
        let mut v = Vec::new();
        for i in 0..6 {
            v.push(pass(&format!("p{i}"), now - Duration::minutes(i), "TOOL-1"));
        }
        v.push(fail("f0", now, "TOOL-3", DefectPattern::Scratch));
        v.push(fail("f1", now, "TOOL-3", DefectPattern::Scratch));
        v.push(fail("f2", now, "TOOL-2", DefectPattern::EdgeRing));
        v.push(pass("p9", now, "TOOL-2"));
        v
    }

    #[test]
    fn test_intent_routing_order() {
        assert_eq!(classify("What's our yield this week?"), QueryIntent::Yield);
        assert_eq!(classify("pass rate on TOOL-3"), QueryIntent::Yield);
        assert_eq!(classify("Which tool is worst?"), QueryIntent::ToolPerformance);
        assert_eq!(classify("chamber B status"), QueryIntent::ToolPerformance);
        assert_eq!(classify("show me scratches"), QueryIntent::PatternFocus);
        assert_eq!(classify("trend for edge-ring defects"), QueryIntent::PatternFocus);
        assert_eq!(classify("how did things go over time"), QueryIntent::Trend);
        assert_eq!(classify("hello there"), QueryIntent::Unknown);
    }

    #[test]
    fn test_empty_query() {
        let answer = Copilot::default().respond("   ", &records());
        assert_eq!(answer.response, "Please ask a question about your wafer data.");
        assert_eq!(answer.intent, QueryIntent::Unknown);
        assert_eq!(answer.suggestions.len(), 3);
    }

    #[test]
    fn test_empty_store_onboarding() {
        let store = InMemoryWaferStore::new();
        let answer = Copilot::default().answer(&store, "what is the yield?").unwrap();
        assert!(answer.response.starts_with("No wafer data available yet"));
        assert_eq!(answer.suggestions[0], "Upload a wafer map for analysis");
    }

    #[test]
    fn test_yield_answer_bands() {
        let answer = Copilot::default().respond("yield?", &records());
        assert!(answer.response.contains("Current yield rate: 70.0% (Concerning)"));
        assert!(answer.response.contains("- Scratch: 2 wafers (20.0%)"));
        assert!(answer.response.contains("Tool alert: TOOL-3 has 2 failures"));
        assert_eq!(quality_band(90.0), "Excellent");
        assert_eq!(quality_band(75.0), "Good");
        assert_eq!(quality_band(74.9), "Concerning");
    }

    #[test]
    fn test_tool_answer_names_tool() {
        let answer = Copilot::default().respond("what's wrong with tool-3", &records());
        assert_eq!(answer.intent, QueryIntent::ToolPerformance);
        assert!(answer.response.contains("- TOOL-3: 2 failures (66.7% of all failures)"));
        assert!(answer.response.contains("TOOL-3 defect patterns:\n- Scratch: 2 wafers"));
    }

    #[test]
    fn test_pattern_focus_resolves_edge() {
        let answer = Copilot::default().respond("any edge defects?", &records());
        assert!(answer.response.contains("Focus: Edge-Ring defects"));
        assert!(answer.response.contains("Most affected tool: TOOL-2"));

        let answer = Copilot::default().respond("show scratches", &records());
        assert!(answer.response.contains("Focus: Scratch defects"));
    }

    #[test]
    fn test_suggestions_come_from_pool() {
        for query in ["yield", "tool", "defect", "trend", "hi"] {
            let answer = Copilot::default().respond(query, &records());
            assert!((2..=3).contains(&answer.suggestions.len()));
            assert!(answer.suggestions.iter().all(|s| SUGGESTION_POOL.contains(&s.as_str())));
        }
    }
}
