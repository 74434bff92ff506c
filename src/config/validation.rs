//! Unknown-key detection for `inspection.toml`
//!
//! serde ignores fields it does not know, so a misspelled key silently falls
//! back to its default. Before deserializing, the raw document is flattened
//! into dotted paths and each path is checked against [`SCHEMA`]. Anything
//! unrecognised is logged with the nearest known path as a hint. Nothing here
//! ever rejects a config.

use std::collections::BTreeSet;
use std::fmt;

/// Section path and the leaf fields it accepts.
const SCHEMA: &[(&str, &[&str])] = &[
    ("server", &["addr", "cors_origins", "max_upload_bytes"]),
    ("storage", &["data_dir"]),
    ("grid", &["size"]),
    ("photo", &["size", "mean", "std"]),
    (
        "models",
        &["grid_linear", "grid_prototype", "photo_linear", "inference_timeout_secs"],
    ),
    (
        "analysis",
        &[
            "ambiguity_threshold",
            "high_severity_confidence",
            "medium_severity_confidence",
            "major_issue_probability",
            "pass_score",
            "escalation_share",
            "escalation_min_records",
            "history_window",
        ],
    ),
    (
        "analysis.penalties",
        &[
            "low_confidence_below",
            "low_confidence",
            "moderate_confidence_below",
            "moderate_confidence",
            "multiple_issues",
            "max_major_issues",
            "prediction_mismatch",
            "margin_weight",
        ],
    ),
    (
        "validation",
        &["max_attempts", "min_confidence", "min_consistency", "require_unambiguous"],
    ),
    ("spc", &["default_window_days", "max_window_days"]),
    ("rca", &["lookback_days", "trend_weeks"]),
    ("copilot", &["recent_records"]),
    ("lot", &["defect_rate_alert_pct", "max_concurrency"]),
    ("notifications", &["enabled", "alert_severity", "recipients"]),
    ("notifications.transport", &["kind", "url", "timeout_secs"]),
    ("notifications.digest", &["enabled", "hour_utc"]),
];

/// Furthest a hint may be from the unknown key, in single-character edits.
const MAX_HINT_DISTANCE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKey {
    pub path: String,
    pub closest: Option<String>,
}

impl fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.closest {
            Some(hint) => write!(f, "Unknown config key '{}' (closest match: '{}')", self.path, hint),
            None => write!(f, "Unknown config key '{}'", self.path),
        }
    }
}

/// Every dotted path the config accepts, sections included.
fn accepted_paths() -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for (section, fields) in SCHEMA {
        // "a.b" also implies "a"
        let mut prefix = String::new();
        for part in section.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            paths.insert(prefix.clone());
        }
        paths.extend(fields.iter().map(|field| format!("{section}.{field}")));
    }
    paths
}

/// Flatten a document into the dotted path of every key, tables included.
fn flatten(doc: &toml::Table) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending: Vec<(String, &toml::Table)> = vec![(String::new(), doc)];
    while let Some((prefix, table)) = pending.pop() {
        for (key, value) in table {
            let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
            if let toml::Value::Table(child) = value {
                pending.push((path.clone(), child));
            }
            out.push(path);
        }
    }
    out.sort();
    out
}

/// Optimal string alignment distance restricted to insert, delete, substitute.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut diagonal = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let above = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j - 1])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Nearest accepted path; ties go to the alphabetically first.
fn closest<'a>(path: &str, accepted: &'a BTreeSet<String>) -> Option<&'a str> {
    let mut best: Option<(usize, &str)> = None;
    for candidate in accepted {
        let d = edit_distance(path, candidate);
        if d <= MAX_HINT_DISTANCE && best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, candidate));
        }
    }
    best.map(|(_, c)| c)
}

/// Keys in `raw_toml` the config does not recognise.
///
/// Unparseable input yields nothing; the real parse reports it.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<UnknownKey> {
    let Ok(doc) = raw_toml.parse::<toml::Table>() else {
        return Vec::new();
    };
    let accepted = accepted_paths();
    flatten(&doc)
        .into_iter()
        .filter(|path| !accepted.contains(path))
        .map(|path| UnknownKey {
            closest: closest(&path, &accepted).map(str::to_owned),
            path,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("grid", "grid"), 0);
        assert_eq!(edit_distance("lot.max_concurency", "lot.max_concurrency"), 1);
        assert_eq!(edit_distance("spc", ""), 3);
        assert_eq!(edit_distance("", "rca"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_nested_sections_are_accepted() {
        let accepted = accepted_paths();
        assert!(accepted.contains("analysis"));
        assert!(accepted.contains("analysis.penalties"));
        assert!(accepted.contains("notifications.transport.url"));
    }

    #[test]
    fn test_flatten_reaches_every_level() {
        let doc: toml::Table = "[notifications.digest]\nhour_utc = 6\n".parse().unwrap();
        assert_eq!(
            flatten(&doc),
            vec!["notifications", "notifications.digest", "notifications.digest.hour_utc"]
        );
    }

    #[test]
    fn test_misspelled_field_is_reported_with_hint() {
        let unknown = validate_unknown_keys("[validation]\nmax_atempts = 3\n");
        assert_eq!(
            unknown,
            vec![UnknownKey {
                path: "validation.max_atempts".into(),
                closest: Some("validation.max_attempts".into()),
            }]
        );
        assert!(unknown[0].to_string().contains("closest match"));
    }

    #[test]
    fn test_default_config_is_clean() {
        let text = crate::config::InspectionConfig::default().to_toml().unwrap();
        let unknown = validate_unknown_keys(&text);
        assert!(unknown.is_empty(), "unexpected keys: {unknown:?}");
    }

    #[test]
    fn test_far_off_key_gets_no_hint() {
        let unknown = validate_unknown_keys("wafer_map_colours = \"viridis\"\n");
        assert_eq!(unknown.len(), 1);
        assert!(unknown[0].closest.is_none());
    }

    #[test]
    fn test_broken_toml_is_left_to_serde() {
        assert!(validate_unknown_keys("[[[broken").is_empty());
    }
}
