//! Trend narrative generation
//!
//! The narrative is free text for humans reading a lot report. It sits
//! behind an async port so a language-generation backend can replace the
//! template implementation without touching the batch runner.

use async_trait::async_trait;

use crate::playbook;
use crate::types::LotAnalysis;

/// Share of defects above which one pattern counts as systematic.
const DOMINANCE_SHARE: f64 = 0.5;

/// Port for turning a lot aggregate into a narrative.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn narrate(&self, lot: &LotAnalysis) -> anyhow::Result<String>;
}

/// Deterministic narrative from the pattern knowledge tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

impl TemplateNarrator {
    pub fn render(lot: &LotAnalysis) -> String {
        let total_defects: usize = lot.distribution.iter().map(|d| d.count).sum();
        let Some(top) = lot.distribution.first().filter(|_| total_defects > 0) else {
            return if lot.total_wafers == 0 {
                "No wafer data available for trend analysis.".to_string()
            } else {
                "No defects detected in this lot. Process is stable.".to_string()
            };
        };

        let share = top.count as f64 / total_defects as f64;
        let mut lines = Vec::new();
        if share > DOMINANCE_SHARE {
            let book = playbook::pattern(top.pattern);
            lines.push(format!("SYSTEMATIC ISSUE DETECTED: '{}'", top.pattern));
            lines.push(format!("This pattern accounts for {:.0}% of all defects.", share * 100.0));
            lines.push(String::new());
            lines.push("Root cause analysis:".to_string());
            lines.push(format!("- {}", book.lot_hypothesis));
            lines.push(format!("- {}", book.mechanism));
            lines.push(String::new());
            lines.push("Priority actions:".to_string());
            lines.extend(book.lot_actions.iter().enumerate().map(|(i, a)| format!("{}. {a}", i + 1)));
        } else {
            let leaders: Vec<String> = lot.distribution.iter().take(2).map(|d| d.pattern.to_string()).collect();
            lines.push("MULTIPLE DEFECT PATTERNS DETECTED".to_string());
            lines.push(format!("No single dominant cause. Top issues: {}", leaders.join(", ")));
            lines.push(String::new());
            lines.push("Root cause analysis:".to_string());
            lines.push("- Likely a general environment or multiple-tool drift.".to_string());
            lines.push("- Possible cleanroom particle count spike.".to_string());
            lines.push(String::new());
            lines.push("Priority actions:".to_string());
            lines.push("- Review daily particle counts.".to_string());
            lines.push("- Check preventive maintenance (PM) schedules.".to_string());
        }
        if lot.alert {
            lines.push(String::new());
            lines.push(format!("Lot defect rate {:.1}% exceeds the alert threshold.", lot.defect_rate));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl NarrativeGenerator for TemplateNarrator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn narrate(&self, lot: &LotAnalysis) -> anyhow::Result<String> {
        Ok(Self::render(lot))
    }
}
