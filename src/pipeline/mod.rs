//! Inspection Pipeline Module
//!
//! ```text
//! single wafer ──► InspectionCoordinator ──► WaferAnalysis (persisted)
//! lot          ──► BatchRunner ──► N × coordinator ──► LotAnalysis + narrative
//! ```
//!
//! A wafer's stages never overlap. Wafers of one lot share nothing mutable
//! apart from the store, so the batch runner may run several at once.

mod batch;
mod coordinator;

pub use batch::{BatchOutcome, BatchRunner, LotItem, LotSubmission};
pub use coordinator::{InspectionCoordinator, PipelineStats, PipelineStatsSnapshot};
