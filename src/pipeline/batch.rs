//! Lot batch runner
//!
//! Runs every artifact of a lot through the coordinator with bounded
//! concurrency. Results keep submission order. Cancellation is checked
//! before each wafer starts; wafers already in flight finish and are kept.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::InspectionCoordinator;
use crate::config::LotConfig;
use crate::error::InspectionError;
use crate::trend::{analyze_lot, NarrativeGenerator, TemplateNarrator};
use crate::types::{ArtifactInput, LotAnalysis, WaferAnalysis, WaferContext};

/// One upload within a lot.
#[derive(Debug, Clone)]
pub enum LotItem {
    Artifact(ArtifactInput),
    /// Could not be turned into an artifact; recorded as a FAIL in place
    Rejected { file_name: String, error: InspectionError },
}

impl From<ArtifactInput> for LotItem {
    fn from(artifact: ArtifactInput) -> Self {
        LotItem::Artifact(artifact)
    }
}

/// One lot as submitted.
#[derive(Debug, Clone, Default)]
pub struct LotSubmission {
    pub lot_id: Option<String>,
    pub tool_id: Option<String>,
    pub chamber_id: Option<String>,
    pub items: Vec<LotItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// One record per processed artifact, in submission order
    pub records: Vec<WaferAnalysis>,
    pub lot: LotAnalysis,
    pub narrative: String,
    /// True when cancellation stopped the lot early
    pub cancelled: bool,
}

pub struct BatchRunner {
    coordinator: Arc<InspectionCoordinator>,
    narrator: Arc<dyn NarrativeGenerator>,
    lot_config: LotConfig,
}

impl BatchRunner {
    pub fn new(coordinator: Arc<InspectionCoordinator>, lot_config: LotConfig) -> Self {
        Self {
            coordinator,
            narrator: Arc::new(TemplateNarrator),
            lot_config,
        }
    }

    /// Swap the narrative backend.
    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeGenerator>) -> Self {
        self.narrator = narrator;
        self
    }

    pub async fn run(&self, submission: LotSubmission, cancel: &CancellationToken) -> BatchOutcome {
        let LotSubmission {
            lot_id,
            tool_id,
            chamber_id,
            items,
        } = submission;
        let submitted = items.len();
        let concurrency = self.lot_config.max_concurrency.max(1);

        info!(lot_id = lot_id.as_deref().unwrap_or("-"), wafers = submitted, concurrency, "Lot started");

        let records: Vec<WaferAnalysis> = stream::iter(items)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|item| {
                let context = WaferContext {
                    lot_id: lot_id.clone(),
                    tool_id: tool_id.clone(),
                    chamber_id: chamber_id.clone(),
                    ..WaferContext::default()
                };
                let coordinator = &self.coordinator;
                async move {
                    match item {
                        LotItem::Artifact(artifact) => coordinator.inspect(artifact, context).await,
                        LotItem::Rejected { file_name, error } => coordinator.reject(&file_name, context, error),
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let cancelled = records.len() < submitted;
        if cancelled {
            warn!(
                lot_id = lot_id.as_deref().unwrap_or("-"),
                processed = records.len(),
                submitted,
                "Lot cancelled before completion"
            );
        }

        let lot = analyze_lot(lot_id.as_deref(), &records, &self.lot_config);
        let narrative = match self.narrator.narrate(&lot).await {
            Ok(text) => text,
            Err(e) => {
                warn!(narrator = self.narrator.name(), "Narrative generation failed, using template: {}", e);
                TemplateNarrator::render(&lot)
            }
        };

        info!(
            lot_id = lot_id.as_deref().unwrap_or("-"),
            processed = records.len(),
            yield_rate = lot.yield_rate,
            alert = lot.alert,
            "Lot finished"
        );

        BatchOutcome {
            records,
            lot,
            narrative,
            cancelled,
        }
    }
}
