//! Trigger Stage - decides *that* an alert is due and *what* it says
//!
//! Delivery is the notifier's job (`crate::notify`); this stage only builds
//! the checklist and the alert draft.

use tracing::debug;

use super::Stage;
use crate::error::InspectionError;
use crate::notify::NotificationConfig;
use crate::playbook;
use crate::types::{AlertDraft, DefectPattern, Severity, TriggerDetail, Verdict};

pub struct TriggerInput<'a> {
    pub wafer_id: &'a str,
    pub file_name: &'a str,
    pub lot_id: Option<&'a str>,
    pub tool_id: Option<&'a str>,
    pub verdict: Verdict,
    pub severity: Severity,
    pub pattern: DefectPattern,
    pub confidence: f64,
    /// Set when the pipeline could not classify the wafer
    pub failure: Option<&'a str>,
    pub policy: &'a NotificationConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerStage;

impl<'a> Stage<TriggerInput<'a>, TriggerDetail> for TriggerStage {
    fn name(&self) -> &'static str {
        "trigger"
    }

    fn run(&self, input: TriggerInput<'a>) -> Result<TriggerDetail, InspectionError> {
        let mut reasons = Vec::new();
        if input.verdict == Verdict::Fail {
            reasons.push("verdict is FAIL".to_string());
        }
        if input.severity >= input.policy.alert_severity {
            reasons.push(format!(
                "severity {} at or above threshold {}",
                input.severity, input.policy.alert_severity
            ));
        }
        let alert_due = !reasons.is_empty();

        let checklist: Vec<String> = match input.failure {
            Some(_) => playbook::ANALYSIS_FAILURE_CHECKLIST,
            None => playbook::trigger_checklist(input.severity),
        }
        .iter()
        .map(|s| s.to_string())
        .collect();

        let alert = alert_due.then(|| {
            let mut body = vec![
                format!("Wafer: {} ({})", input.wafer_id, input.file_name),
                format!("Pattern: {}", input.pattern),
                format!("Confidence: {:.1}%", input.confidence * 100.0),
                format!("Severity: {}", input.severity),
                format!("Verdict: {}", input.verdict),
            ];
            if let Some(lot) = input.lot_id {
                body.push(format!("Lot: {lot}"));
            }
            if let Some(tool) = input.tool_id {
                body.push(format!("Tool: {tool}"));
            }
            if let Some(reason) = input.failure {
                body.push(format!("Analysis failure: {reason}"));
            }
            body.push("Checklist:".to_string());
            body.extend(checklist.iter().map(|item| format!("  - {item}")));

            let subject = match input.failure {
                Some(_) => format!("[ALERT] Wafer Analysis Failed - {}", input.file_name),
                None => format!("[ALERT] Wafer Defect Detected - {}", input.pattern),
            };
            AlertDraft {
                subject,
                recipients: input.policy.recipients.clone(),
                body: body.join("\n"),
                severity: input.severity,
            }
        });

        debug!(wafer_id = %input.wafer_id, alert_due, reasons = ?reasons, "Trigger evaluated");
        Ok(TriggerDetail {
            alert_due,
            reasons,
            checklist,
            alert,
        })
    }
}
