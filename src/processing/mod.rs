//! Pure transformation core: raw records → canonical rows → period summaries.
//!
//! Nothing in here performs I/O or keeps state between calls; the same inputs
//! always produce the same outputs.

pub mod aggregator;
pub mod breakdown;
pub mod comparison;
pub mod merger;
pub mod metrics;
pub mod normalizer;
pub mod reconciler;
pub mod rolling;

pub use aggregator::{PartialOutcome, aggregate_by_year, aggregate_partial};
pub use merger::{Absence, Coverage, JoinMode, MergedFlows, merge_flows};
pub use metrics::{MetricsCalculator, PeriodTotals};
pub use normalizer::{NormalizedBatch, normalize, normalize_outcome};
pub use reconciler::{Reconciliation, reconcile};
