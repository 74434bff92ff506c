//! Lot/Trend stage
//!
//! - `lot`: pure aggregation of a batch into a [`LotAnalysis`](crate::types::LotAnalysis)
//! - `narrative`: free-text trend narrative behind the [`NarrativeGenerator`] port

pub mod lot;
pub mod narrative;

pub use lot::{analyze_lot, count_severity};
pub use narrative::{NarrativeGenerator, TemplateNarrator};
