//! Inspection Coordinator - per-wafer stage sequence
//!
//! ```text
//! STAGE 1: Preprocessor        artifact → tensor + counts
//! STAGE 2: Classifier ports    one member per loaded classifier (blocking pool, timeout)
//! STAGE 3: Ensemble arbiter    best-confidence member
//! STAGE 4: Analysis            consistency, ambiguity, severity
//! STAGE 5: Validation          RETRYING loops back to STAGE 2
//! STAGE 6: Explanation         narrative
//! STAGE 7: Trigger             alert decision + checklist
//! STAGE 8: Storage             one record per wafer, alert dispatched off-path
//! ```
//!
//! Stages run strictly in order. Any `InspectionError` ends the run with a
//! FAIL record at zero confidence; it never escapes to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agents::{
    AnalysisInput, AnalysisStage, Arbitration, ClassifierSet, EnsembleArbiter, ExplanationInput, ExplanationStage,
    MemberOutcome, PatternHistory, Stage, TriggerInput, TriggerStage, ValidationMachine, ValidationStage,
};
use crate::config::InspectionConfig;
use crate::error::InspectionError;
use crate::ingestion::Preprocessor;
use crate::notify::NotificationService;
use crate::storage::{HistoryFilter, WaferRepository};
use crate::types::{
    AnalysisDetail, ArtifactInput, DefectPattern, FailureDetail, IngestionDetail, PreparedArtifact, Severity,
    StageDetails, ValidationState, Verdict, WaferAnalysis, WaferContext,
};

/// Running counters, exposed on the health endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    wafers: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    alerts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub wafers_processed: u64,
    pub analysis_failures: u64,
    pub validation_retries: u64,
    pub alerts_raised: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            wafers_processed: self.wafers.load(Ordering::Relaxed),
            analysis_failures: self.failures.load(Ordering::Relaxed),
            validation_retries: self.retries.load(Ordering::Relaxed),
            alerts_raised: self.alerts.load(Ordering::Relaxed),
        }
    }
}

/// Candidate carried through the validation loop.
type Attempt = (Arbitration, AnalysisDetail);

/// Coordinates one wafer through every stage.
///
/// Cheap to share behind an `Arc`; holds only read-only stages and handles.
pub struct InspectionCoordinator {
    preprocessor: Preprocessor,
    classifiers: ClassifierSet,
    arbiter: EnsembleArbiter,
    analysis: AnalysisStage,
    validation: ValidationStage,
    store: Arc<dyn WaferRepository>,
    notifier: Arc<NotificationService>,
    inference_timeout: Duration,
    history_window: usize,
    stats: PipelineStats,
}

impl InspectionCoordinator {
    pub fn new(
        config: &InspectionConfig,
        classifiers: ClassifierSet,
        store: Arc<dyn WaferRepository>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.grid.clone(), config.photo.clone()),
            classifiers,
            arbiter: EnsembleArbiter::new(config.analysis.ambiguity_threshold),
            analysis: AnalysisStage::new(config.analysis.clone()),
            validation: ValidationStage::new(config.validation.clone()),
            store,
            notifier,
            inference_timeout: Duration::from_secs(config.models.inference_timeout_secs.max(1)),
            history_window: config.analysis.history_window,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn WaferRepository> {
        &self.store
    }

    /// Run the full pipeline for one artifact and persist the record.
    pub async fn inspect(&self, artifact: ArtifactInput, context: WaferContext) -> WaferAnalysis {
        let started = Instant::now();
        let wafer_id = wafer_id_for(&context);

        let record = match self.run_stages(&wafer_id, &artifact, &context).await {
            Ok(record) => record,
            Err((error, ingestion)) => self.failure_record(&wafer_id, artifact.file_name(), &context, error, ingestion),
        };
        self.complete(record, started)
    }

    /// Record an upload that never reached the pipeline (for example one
    /// whose kind could not be determined) as a FAIL record.
    pub fn reject(&self, file_name: &str, context: WaferContext, error: InspectionError) -> WaferAnalysis {
        let started = Instant::now();
        let wafer_id = wafer_id_for(&context);
        let record = self.failure_record(&wafer_id, file_name, &context, error, None);
        self.complete(record, started)
    }

    /// Count, persist and alert for a finished record.
    fn complete(&self, record: WaferAnalysis, started: Instant) -> WaferAnalysis {
        self.stats.wafers.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.store.insert(&record) {
            warn!(wafer_id = %record.wafer_id, "Failed to persist wafer record: {}", e);
        }
        if let Some(alert) = &record.stages.trigger.alert {
            self.stats.alerts.fetch_add(1, Ordering::Relaxed);
            self.notifier.dispatch_alert(&record.wafer_id, alert);
        }

        info!(
            wafer_id = %record.wafer_id,
            file = %record.file_name,
            pattern = %record.pattern,
            confidence = record.confidence,
            verdict = %record.verdict,
            severity = %record.severity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Wafer analyzed"
        );
        record
    }

    async fn run_stages(
        &self,
        wafer_id: &str,
        artifact: &ArtifactInput,
        context: &WaferContext,
    ) -> Result<WaferAnalysis, (InspectionError, Option<IngestionDetail>)> {
        let prepared = Arc::new(self.prepare(artifact).await.map_err(|e| (e, None))?);
        let ingestion = IngestionDetail {
            kind: prepared.kind,
            digest: prepared.digest.clone(),
            source_width: prepared.source_dims.0,
            source_height: prepared.source_dims.1,
            tensor_shape: prepared.tensor.shape(),
            pixel_counts: prepared.pixel_counts,
        };
        let fail = |e: InspectionError| (e, Some(ingestion.clone()));

        let history = self.pattern_history();
        let mut machine: ValidationMachine<Attempt> = ValidationMachine::new(self.validation.clone());

        loop {
            let outcomes = self.classify(&prepared).await;
            let arbitration = match self.arbiter.run(outcomes) {
                Ok(a) => a,
                // A retry that loses every member keeps the best earlier attempt
                Err(e) if machine.attempts() > 0 => {
                    warn!(wafer_id, "Retry classification failed, keeping best attempt: {}", e);
                    machine.abandon();
                    break;
                }
                Err(e) => return Err(fail(e)),
            };
            let analysis = self
                .analysis
                .run(AnalysisInput {
                    probabilities: &arbitration.selected().probabilities,
                    history: &history,
                })
                .map_err(fail)?;
            let confidence = arbitration.selected().confidence;
            let state = machine.observe((arbitration, analysis.clone()), confidence, &analysis);
            if state != ValidationState::Retrying {
                break;
            }
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
        }

        let ((arbitration, analysis), validation) = machine
            .finish()
            .ok_or_else(|| fail(InspectionError::InferenceUnavailable("no classification attempt completed".into())))?;

        let selected = arbitration.selected().clone();
        let verdict = if selected.pattern.is_defect() { Verdict::Fail } else { Verdict::Pass };
        let severity = analysis.severity;

        let explanation = ExplanationStage
            .run(ExplanationInput {
                file_name: artifact.file_name(),
                verdict,
                severity,
                selected: &selected,
                members: &arbitration.members,
                analysis: &analysis,
                validation: &validation,
            })
            .map_err(fail)?;

        let policy = self.notifier.config();
        let trigger = TriggerStage
            .run(TriggerInput {
                wafer_id,
                file_name: artifact.file_name(),
                lot_id: context.lot_id.as_deref(),
                tool_id: context.tool_id.as_deref(),
                verdict,
                severity,
                pattern: selected.pattern,
                confidence: selected.confidence,
                failure: None,
                policy: &policy,
            })
            .map_err(fail)?;

        Ok(WaferAnalysis {
            wafer_id: wafer_id.to_string(),
            file_name: artifact.file_name().to_string(),
            lot_id: context.lot_id.clone(),
            tool_id: context.tool_id.clone(),
            chamber_id: context.chamber_id.clone(),
            processed_at: context.processed_at,
            analyzed_at: Utc::now(),
            selected_agent: Some(selected.agent.clone()),
            pattern: selected.pattern,
            confidence: selected.confidence,
            verdict,
            severity,
            probabilities: Some(selected.probabilities.clone()),
            explanation,
            stages: StageDetails {
                ingestion: Some(ingestion),
                analysis: Some(analysis),
                validation: Some(validation),
                trigger,
            },
            agents: arbitration.members,
            failure: None,
        })
    }

    /// Preprocess on the blocking pool; image decoding is CPU bound.
    async fn prepare(&self, artifact: &ArtifactInput) -> Result<PreparedArtifact, InspectionError> {
        let preprocessor = self.preprocessor.clone();
        let artifact = artifact.clone();
        tokio::task::spawn_blocking(move || preprocessor.run(&artifact))
            .await
            .map_err(|e| InspectionError::UnsupportedFormat(format!("preprocessing aborted: {e}")))?
    }

    /// Run every member for the artifact kind, one after another.
    async fn classify(&self, prepared: &Arc<PreparedArtifact>) -> Vec<MemberOutcome> {
        let members = self.classifiers.for_kind(prepared.kind);
        let mut outcomes = Vec::with_capacity(members.len());
        for member in members {
            let classifier = Arc::clone(member);
            let input = Arc::clone(prepared);
            let call = tokio::task::spawn_blocking(move || classifier.classify(&input.tensor));

            let result = match tokio::time::timeout(self.inference_timeout, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(InspectionError::InferenceUnavailable(format!(
                    "{} aborted: {join}",
                    member.name()
                ))),
                Err(_) => Err(InspectionError::InferenceUnavailable(format!(
                    "{} timed out after {}s",
                    member.name(),
                    self.inference_timeout.as_secs()
                ))),
            };
            debug!(classifier = member.name(), ok = result.is_ok(), "Classifier member finished");
            outcomes.push(MemberOutcome {
                agent: member.name().to_string(),
                model_id: member.model_id().to_string(),
                result,
            });
        }
        outcomes
    }

    /// Recent FAIL pattern counts for severity escalation.
    fn pattern_history(&self) -> PatternHistory {
        match self.store.history(&HistoryFilter::recent(self.history_window)) {
            Ok(records) => PatternHistory::from_records(&records),
            Err(e) => {
                warn!("Pattern history unavailable, severity will not escalate: {}", e);
                PatternHistory::default()
            }
        }
    }

    fn failure_record(
        &self,
        wafer_id: &str,
        file_name: &str,
        context: &WaferContext,
        error: InspectionError,
        ingestion: Option<IngestionDetail>,
    ) -> WaferAnalysis {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        warn!(wafer_id = %wafer_id, file = %file_name, kind = error.kind(), "Wafer analysis failed: {}", error);
        let message = error.to_string();
        let policy = self.notifier.config();
        let trigger = TriggerStage
            .run(TriggerInput {
                wafer_id,
                file_name: file_name,
                lot_id: context.lot_id.as_deref(),
                tool_id: context.tool_id.as_deref(),
                verdict: Verdict::Fail,
                severity: Severity::None,
                pattern: DefectPattern::NoDefect,
                confidence: 0.0,
                failure: Some(&message),
                policy: &policy,
            })
            .unwrap_or_default();

        WaferAnalysis {
            wafer_id: wafer_id.to_string(),
            file_name: file_name.to_string(),
            lot_id: context.lot_id.clone(),
            tool_id: context.tool_id.clone(),
            chamber_id: context.chamber_id.clone(),
            processed_at: context.processed_at,
            analyzed_at: Utc::now(),
            agents: Vec::new(),
            selected_agent: None,
            pattern: DefectPattern::NoDefect,
            confidence: 0.0,
            verdict: Verdict::Fail,
            severity: Severity::None,
            probabilities: None,
            explanation: ExplanationStage::failure(file_name, &error),
            stages: StageDetails {
                ingestion,
                analysis: None,
                validation: None,
                trigger,
            },
            failure: Some(FailureDetail {
                kind: error.kind().to_string(),
                message,
            }),
        }
    }
}

fn wafer_id_for(context: &WaferContext) -> String {
    context
        .wafer_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
