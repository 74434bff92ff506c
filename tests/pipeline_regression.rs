//! Pipeline Regression Tests
//!
//! Drives the full coordinator (ingestion, ensemble, analysis, validation,
//! explanation, trigger, persistence) with fixed-output classifiers so every
//! verdict is predictable. Uses the in-memory store; no files or network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wafer_sentinel::agents::Classifier;
use wafer_sentinel::config::{InspectionConfig, LotConfig};
use wafer_sentinel::error::InspectionError;
use wafer_sentinel::ingestion::npy::encode_u8_grid;
use wafer_sentinel::storage::{InMemoryWaferStore, WaferRepository};
use wafer_sentinel::types::{
    ArtifactInput, ArtifactKind, DefectPattern, Layout, Severity, Tensor, ValidationState, Verdict, Vocabulary,
    WaferContext,
};
use wafer_sentinel::{BatchRunner, ClassifierSet, InspectionCoordinator, LotItem, LotSubmission, NotificationService};

const EDGE_RING: usize = 3;
const SCRATCH: usize = 7;

/// Classifier returning the same scores for every tensor.
struct FixedClassifier {
    name: &'static str,
    vocabulary: Vocabulary,
    scores: Vec<f64>,
    calls: AtomicUsize,
}

impl FixedClassifier {
    fn new(name: &'static str, vocabulary: Vocabulary, scores: Vec<f64>) -> Arc<Self> {
        Arc::new(Self {
            name,
            vocabulary,
            scores,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        self.name
    }

    fn model_id(&self) -> &str {
        "fixed-v1"
    }

    fn vocabulary(&self) -> Vocabulary {
        self.vocabulary
    }

    fn layout(&self) -> Layout {
        Layout::Chw
    }

    fn infer(&self, _tensor: &Tensor) -> Result<Vec<f64>, InspectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }
}

/// How a [`FaultyClassifier`] misbehaves.
enum Fault {
    /// Every call errors
    Down,
    /// First call returns these scores, later calls error
    FirstCallOnly(Vec<f64>),
    /// Blocks for this long, then returns a clean result
    Stall(Duration),
}

struct FaultyClassifier {
    name: &'static str,
    fault: Fault,
    calls: AtomicUsize,
}

impl FaultyClassifier {
    fn new(name: &'static str, fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            name,
            fault,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Classifier for FaultyClassifier {
    fn name(&self) -> &str {
        self.name
    }

    fn model_id(&self) -> &str {
        "faulty-v1"
    }

    fn vocabulary(&self) -> Vocabulary {
        Vocabulary::Grid
    }

    fn layout(&self) -> Layout {
        Layout::Chw
    }

    fn infer(&self, _tensor: &Tensor) -> Result<Vec<f64>, InspectionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fault {
            Fault::Down => Err(InspectionError::InferenceUnavailable(format!("{} weights not loaded", self.name))),
            Fault::FirstCallOnly(scores) if call == 0 => Ok(scores.clone()),
            Fault::FirstCallOnly(_) => Err(InspectionError::InferenceUnavailable("device lost".into())),
            Fault::Stall(delay) => {
                std::thread::sleep(*delay);
                Ok(peaked(8, 0.95))
            }
        }
    }
}

/// Nine scores with `p` at `index` and the rest spread evenly.
fn peaked(index: usize, p: f64) -> Vec<f64> {
    let rest = (1.0 - p) / 8.0;
    (0..9).map(|i| if i == index { p } else { rest }).collect()
}

fn grid_artifact(name: &str) -> ArtifactInput {
    let size = 56;
    let cells: Vec<u8> = (0..size * size)
        .map(|i| {
            let (y, x) = (i / size, i % size);
            if y < 3 || x < 3 || y >= size - 3 || x >= size - 3 {
                2
            } else {
                1
            }
        })
        .collect();
    ArtifactInput::new(name, ArtifactKind::Grid, encode_u8_grid(size, &cells))
}

fn coordinator(grid: Vec<Arc<dyn Classifier>>) -> (Arc<InspectionCoordinator>, Arc<InMemoryWaferStore>) {
    coordinator_with(&InspectionConfig::default(), grid)
}

fn coordinator_with(
    config: &InspectionConfig,
    grid: Vec<Arc<dyn Classifier>>,
) -> (Arc<InspectionCoordinator>, Arc<InMemoryWaferStore>) {
    let store = Arc::new(InMemoryWaferStore::new());
    let notifier = Arc::new(NotificationService::new(Default::default(), store.clone()).unwrap());
    let photo: Arc<dyn Classifier> = FixedClassifier::new("photo-fixed", Vocabulary::Photo, peaked(8, 0.9));
    let coordinator = InspectionCoordinator::new(
        config,
        ClassifierSet::new(grid, photo),
        store.clone(),
        notifier,
    );
    (Arc::new(coordinator), store)
}

#[tokio::test]
async fn test_edge_ring_selects_higher_confidence_member() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.887));
    let b = FixedClassifier::new("grid-b", Vocabulary::Grid, peaked(EDGE_RING, 0.912));
    let (coordinator, store) = coordinator(vec![a.clone(), b.clone()]);

    let context = WaferContext {
        wafer_id: Some("W-EDGE".into()),
        lot_id: Some("LOT-1".into()),
        tool_id: Some("TOOL-3".into()),
        ..WaferContext::default()
    };
    let record = coordinator.inspect(grid_artifact("edge.npy"), context).await;

    assert_eq!(record.pattern, DefectPattern::EdgeRing);
    assert!((record.confidence - 0.912).abs() < 1e-9);
    assert_eq!(record.selected_agent.as_deref(), Some("grid-b"));
    assert_eq!(record.agents.len(), 2);
    assert_eq!(record.verdict, Verdict::Fail);
    assert_eq!(record.severity, Severity::High);
    assert!(record.failure.is_none());

    let validation = record.stages.validation.as_ref().unwrap();
    assert_eq!(validation.state, ValidationState::Passed);
    assert_eq!(validation.attempts, 1);

    let stored = store.get("W-EDGE").unwrap().unwrap();
    assert_eq!(stored.lot_id.as_deref(), Some("LOT-1"));
    assert_eq!(coordinator.stats().wafers_processed, 1);
}

#[tokio::test]
async fn test_ambiguous_result_exhausts_retries_and_keeps_best() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(SCRATCH, 0.5));
    let b = FixedClassifier::new("grid-b", Vocabulary::Grid, peaked(SCRATCH, 0.45));
    let (coordinator, _store) = coordinator(vec![a.clone(), b.clone()]);

    let record = coordinator.inspect(grid_artifact("vague.npy"), WaferContext::default()).await;

    let validation = record.stages.validation.as_ref().unwrap();
    assert_eq!(validation.state, ValidationState::Failed);
    assert_eq!(validation.attempts, 3);
    assert_eq!(a.calls.load(Ordering::SeqCst), 3);
    assert_eq!(b.calls.load(Ordering::SeqCst), 3);

    // Best attempt is still emitted as the verdict
    assert_eq!(record.pattern, DefectPattern::Scratch);
    assert_eq!(record.selected_agent.as_deref(), Some("grid-a"));
    assert_eq!(record.verdict, Verdict::Fail);
    assert_eq!(coordinator.stats().validation_retries, 2);
}

#[tokio::test]
async fn test_wrong_grid_size_becomes_fail_record() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.9));
    let (coordinator, store) = coordinator(vec![a.clone()]);

    let artifact = ArtifactInput::new("small.npy", ArtifactKind::Grid, encode_u8_grid(10, &[1; 100]));
    let record = coordinator.inspect(artifact, WaferContext::default()).await;

    assert_eq!(record.verdict, Verdict::Fail);
    assert_eq!(record.pattern, DefectPattern::NoDefect);
    assert_eq!(record.confidence, 0.0);
    assert_eq!(record.failure.as_ref().unwrap().kind, "ShapeMismatch");
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(coordinator.stats().analysis_failures, 1);
}

#[tokio::test]
async fn test_photo_bytes_declared_as_grid_are_rejected() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.9));
    let (coordinator, _store) = coordinator(vec![a]);

    let artifact = ArtifactInput::new("fake.npy", ArtifactKind::Grid, b"\x89PNG\r\n\x1a\nnot really".to_vec());
    let record = coordinator.inspect(artifact, WaferContext::default()).await;
    assert_eq!(record.failure.as_ref().unwrap().kind, "UnsupportedFormat");
    assert!(record.explanation.contains("fake.npy"));
}

#[tokio::test]
async fn test_lot_keeps_submission_order() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.95));
    let (coordinator, store) = coordinator(vec![a]);
    let runner = BatchRunner::new(
        coordinator,
        LotConfig {
            max_concurrency: 2,
            ..LotConfig::default()
        },
    );

    let names: Vec<String> = (0..5).map(|i| format!("w{i}.npy")).collect();
    let submission = LotSubmission {
        lot_id: Some("LOT-9".into()),
        tool_id: Some("TOOL-1".into()),
        chamber_id: Some("B".into()),
        items: names.iter().map(|n| grid_artifact(n).into()).collect(),
    };
    let outcome = runner.run(submission, &CancellationToken::new()).await;

    assert!(!outcome.cancelled);
    let got: Vec<&str> = outcome.records.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(got, names.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(outcome.records.iter().all(|r| r.chamber_id.as_deref() == Some("B")));
    assert_eq!(outcome.lot.total_wafers, 5);
    assert_eq!(outcome.lot.fail_count, 5);
    assert!(outcome.lot.alert);
    assert!(outcome.narrative.contains("SYSTEMATIC ISSUE DETECTED"));
    assert_eq!(store.count().unwrap(), 5);
}

#[tokio::test]
async fn test_cancelled_lot_stops_before_starting() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.95));
    let (coordinator, store) = coordinator(vec![a]);
    let runner = BatchRunner::new(coordinator, LotConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let submission = LotSubmission {
        items: vec![grid_artifact("a.npy").into(), grid_artifact("b.npy").into()],
        ..LotSubmission::default()
    };
    let outcome = runner.run(submission, &cancel).await;

    assert!(outcome.cancelled);
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.narrative, "No wafer data available for trend analysis.");
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_every_member_down_yields_failed_analysis_record() {
    let a = FaultyClassifier::new("grid-a", Fault::Down);
    let b = FaultyClassifier::new("grid-b", Fault::Down);
    let (coordinator, store) = coordinator(vec![a.clone(), b.clone()]);

    let context = WaferContext {
        wafer_id: Some("W-DOWN".into()),
        ..WaferContext::default()
    };
    let record = coordinator.inspect(grid_artifact("down.npy"), context).await;

    assert_eq!(record.verdict, Verdict::Fail);
    assert_eq!(record.confidence, 0.0);
    assert!(record.selected_agent.is_none());
    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "InferenceUnavailable");
    assert!(failure.message.contains("grid-a") && failure.message.contains("grid-b"));
    assert!(record.explanation.starts_with("Analysis failed for down.npy"));
    assert_eq!(record.stages.trigger.checklist[0], "Hold wafer for manual inspection");
    // Ingestion succeeded, so its detail is kept
    assert!(record.stages.ingestion.is_some());
    assert!(record.stages.validation.is_none());

    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    assert!(store.get("W-DOWN").unwrap().is_some());
    assert_eq!(coordinator.stats().analysis_failures, 1);
}

#[tokio::test]
async fn test_stalled_classifier_times_out_as_inference_unavailable() {
    let mut config = InspectionConfig::default();
    config.models.inference_timeout_secs = 1;
    let slow = FaultyClassifier::new("grid-slow", Fault::Stall(Duration::from_millis(1500)));
    let (coordinator, _store) = coordinator_with(&config, vec![slow.clone()]);

    let record = coordinator.inspect(grid_artifact("slow.npy"), WaferContext::default()).await;

    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "InferenceUnavailable");
    assert!(failure.message.contains("grid-slow timed out after 1s"), "{}", failure.message);
    assert_eq!(record.verdict, Verdict::Fail);
}

#[tokio::test]
async fn test_member_lost_during_retry_ends_validation_failed() {
    let flaky = FaultyClassifier::new("grid-flaky", Fault::FirstCallOnly(peaked(SCRATCH, 0.5)));
    let (coordinator, _store) = coordinator(vec![flaky.clone()]);

    let record = coordinator.inspect(grid_artifact("flaky.npy"), WaferContext::default()).await;

    // First attempt is ambiguous, the retry loses the only member
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    let validation = record.stages.validation.as_ref().unwrap();
    assert_eq!(validation.state, ValidationState::Failed);
    assert_eq!(validation.attempts, 1);
    assert!(record.failure.is_none());
    assert_eq!(record.pattern, DefectPattern::Scratch);
    assert_eq!(record.selected_agent.as_deref(), Some("grid-flaky"));
}

#[tokio::test]
async fn test_bad_wafers_do_not_abort_the_lot() {
    let a = FixedClassifier::new("grid-a", Vocabulary::Grid, peaked(EDGE_RING, 0.95));
    let (coordinator, store) = coordinator(vec![a.clone()]);
    let runner = BatchRunner::new(coordinator, LotConfig::default());

    let submission = LotSubmission {
        lot_id: Some("LOT-MIX".into()),
        items: vec![
            grid_artifact("good-1.npy").into(),
            ArtifactInput::new("corrupt.npy", ArtifactKind::Grid, b"\x93NUMPY\x01\x00garbage".to_vec()).into(),
            LotItem::Rejected {
                file_name: "scan.dat".into(),
                error: InspectionError::UnsupportedFormat("cannot infer artifact kind".into()),
            },
            grid_artifact("good-2.npy").into(),
        ],
        ..LotSubmission::default()
    };
    let outcome = runner.run(submission, &CancellationToken::new()).await;

    assert!(!outcome.cancelled);
    let summary: Vec<(&str, Option<&str>)> = outcome
        .records
        .iter()
        .map(|r| (r.file_name.as_str(), r.failure.as_ref().map(|f| f.kind.as_str())))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("good-1.npy", None),
            ("corrupt.npy", Some("UnsupportedFormat")),
            ("scan.dat", Some("UnsupportedFormat")),
            ("good-2.npy", None),
        ]
    );
    assert!(outcome.records.iter().all(|r| r.lot_id.as_deref() == Some("LOT-MIX")));
    assert_eq!(outcome.lot.total_wafers, 4);
    assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.count().unwrap(), 4);
}
