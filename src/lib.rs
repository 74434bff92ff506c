//! Wafer Sentinel: wafer defect inspection and fab analytics
//!
//! Classifies wafer maps and photos through a staged multi-agent pipeline,
//! persists one record per wafer, and derives lot, SPC, RCA and copilot
//! views from that history.
//!
//! ## Architecture
//!
//! - **Ingestion**: decode `.npy` grids and photos into normalized tensors
//! - **Agents**: classifier ensemble, analysis, validation, explanation, trigger
//! - **Pipeline**: per-wafer coordinator and bounded-concurrency lot runner
//! - **Analytics**: lot trends, SPC control charts, RCA reports, copilot Q&A
//! - **Notify**: alert, digest and test delivery over log or webhook transports

pub mod agents;
pub mod api;
pub mod background;
pub mod config;
pub mod copilot;
pub mod error;
pub mod ingestion;
pub mod notify;
pub mod pipeline;
pub mod playbook;
pub mod rca;
pub mod spc;
pub mod storage;
pub mod trend;
pub mod types;

pub use config::InspectionConfig;
pub use error::InspectionError;

pub use types::{
    ArtifactInput, ArtifactKind, DefectPattern, LotAnalysis, Severity, Verdict, WaferAnalysis, WaferContext,
};

pub use agents::ClassifierSet;
pub use notify::{NotificationConfig, NotificationService};
pub use pipeline::{BatchOutcome, BatchRunner, InspectionCoordinator, LotItem, LotSubmission};
pub use storage::{HistoryFilter, InMemoryWaferStore, SledWaferStore, StorageError, WaferRepository};
