//! Outer join of export and import fragments on the time key.

use super::normalizer::NormalizedBatch;
use crate::models::{CanonicalRow, FlowDirection, TimeKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Join on year; monthly fragments of the same year are collapsed.
    Annual,
    /// Join on (year, month).
    Monthly,
}

impl JoinMode {
    fn key(self, tk: TimeKey) -> TimeKey {
        match self {
            Self::Annual => TimeKey::annual(tk.year),
            Self::Monthly => tk,
        }
    }
}

/// Why one flow contributed no rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absence {
    NoRecords,
    UpstreamError(String),
}

impl Absence {
    fn of(batch: &NormalizedBatch) -> Option<Self> {
        if !batch.is_empty() {
            return None;
        }
        Some(match &batch.upstream_error {
            Some(e) => Self::UpstreamError(e.clone()),
            None => Self::NoRecords,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Full,
    Partial { missing: FlowDirection, cause: Absence },
    NoData { export: Absence, import: Absence },
}

impl Coverage {
    pub fn has_data(&self) -> bool {
        !matches!(self, Self::NoData { .. })
    }

    /// Upstream error messages behind this coverage, export first.
    pub fn errors(&self) -> Vec<&str> {
        let absences: Vec<&Absence> = match self {
            Self::Full => vec![],
            Self::Partial { cause, .. } => vec![cause],
            Self::NoData { export, import } => vec![export, import],
        };
        absences
            .into_iter()
            .filter_map(|a| match a {
                Absence::UpstreamError(e) => Some(e.as_str()),
                Absence::NoRecords => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedFlows {
    pub rows: Vec<CanonicalRow>,
    pub coverage: Coverage,
}

/// One row per distinct time key of either side, ascending. Keys present on
/// one side only are zero-filled on the other; duplicate keys are summed.
pub fn merge_flows(export: &NormalizedBatch, import: &NormalizedBatch, mode: JoinMode) -> MergedFlows {
    debug_assert_eq!(export.flow, FlowDirection::Export);
    debug_assert_eq!(import.flow, FlowDirection::Import);

    let mut by_key: BTreeMap<TimeKey, CanonicalRow> = BTreeMap::new();
    let mut duplicates = 0usize;

    for batch in [export, import] {
        let mut seen = BTreeSet::new();
        for fragment in &batch.fragments {
            if !seen.insert(fragment.time_key) {
                duplicates += 1;
            }
            let key = mode.key(fragment.time_key);
            by_key
                .entry(key)
                .or_insert_with(|| CanonicalRow::zeroed(key))
                .absorb(fragment);
        }
    }

    if duplicates > 0 {
        info!("{} duplicate time keys within a flow were summed", duplicates);
    }

    let coverage = match (Absence::of(export), Absence::of(import)) {
        (None, None) => Coverage::Full,
        (Some(cause), None) => Coverage::Partial { missing: FlowDirection::Export, cause },
        (None, Some(cause)) => Coverage::Partial { missing: FlowDirection::Import, cause },
        (Some(export), Some(import)) => Coverage::NoData { export, import },
    };

    let rows: Vec<CanonicalRow> = by_key.into_values().collect();
    debug!("merged into {} rows ({:?})", rows.len(), coverage);

    MergedFlows { rows, coverage }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeRecord;
    use crate::processing::normalizer::normalize;
    use serde_json::json;

    fn batch(flow: FlowDirection, rows: serde_json::Value) -> NormalizedBatch {
        let recs: Vec<TradeRecord> = serde_json::from_value(rows).unwrap();
        normalize(flow, &recs)
    }

    #[test]
    fn test_disjoint_years_are_zero_filled() {
        let exp = batch(FlowDirection::Export, json!([{"year": 2023, "metricFOB": 100, "metricKG": 10}]));
        let imp = batch(FlowDirection::Import, json!([{"year": 2024, "metricFOB": 50, "metricKG": 5}]));
        let merged = merge_flows(&exp, &imp, JoinMode::Annual);

        assert_eq!(merged.coverage, Coverage::Full);
        assert_eq!(merged.rows.len(), 2);

        let r23 = merged.rows[0];
        assert_eq!(r23.time_key, TimeKey::annual(2023));
        assert_eq!((r23.export_fob, r23.export_kg), (100.0, 10.0));
        assert_eq!((r23.import_fob, r23.import_kg), (0.0, 0.0));

        let r24 = merged.rows[1];
        assert_eq!(r24.time_key, TimeKey::annual(2024));
        assert_eq!((r24.export_fob, r24.export_kg), (0.0, 0.0));
        assert_eq!((r24.import_fob, r24.import_kg), (50.0, 5.0));
    }

    #[test]
    fn test_shared_key_joins_into_one_row() {
        let exp = batch(FlowDirection::Export, json!([{"year": 2023, "metricFOB": 1000, "metricKG": 100}]));
        let imp = batch(FlowDirection::Import, json!([{"year": 2023, "metricFOB": 400, "metricKG": 50}]));
        let merged = merge_flows(&exp, &imp, JoinMode::Annual);
        assert_eq!(merged.rows.len(), 1);
        assert_eq!(merged.rows[0].export_fob, 1000.0);
        assert_eq!(merged.rows[0].import_fob, 400.0);
    }

    #[test]
    fn test_duplicate_keys_are_summed() {
        let exp = batch(
            FlowDirection::Export,
            json!([
                {"year": 2023, "monthNumber": 1, "metricFOB": 10, "metricKG": 1},
                {"year": 2023, "monthNumber": 1, "metricFOB": 15, "metricKG": 2}
            ]),
        );
        let imp = batch(FlowDirection::Import, json!([]));
        let merged = merge_flows(&exp, &imp, JoinMode::Monthly);
        assert_eq!(merged.rows.len(), 1);
        assert_eq!(merged.rows[0].export_fob, 25.0);
        assert_eq!(merged.rows[0].export_kg, 3.0);
    }

    #[test]
    fn test_annual_mode_collapses_months() {
        let exp = batch(
            FlowDirection::Export,
            json!([
                {"year": 2023, "monthNumber": 1, "metricFOB": 10},
                {"year": 2023, "monthNumber": 2, "metricFOB": 20},
                {"year": 2024, "monthNumber": 1, "metricFOB": 5}
            ]),
        );
        let imp = batch(FlowDirection::Import, json!([{"year": 2023, "monthNumber": 2, "metricFOB": 7}]));

        let annual = merge_flows(&exp, &imp, JoinMode::Annual);
        assert_eq!(annual.rows.len(), 2);
        assert_eq!(annual.rows[0].export_fob, 30.0);
        assert_eq!(annual.rows[0].import_fob, 7.0);

        let monthly = merge_flows(&exp, &imp, JoinMode::Monthly);
        assert_eq!(monthly.rows.len(), 3);
        assert_eq!(monthly.rows[1].time_key, TimeKey::monthly(2023, 2));
        assert_eq!(monthly.rows[1].import_fob, 7.0);
    }

    #[test]
    fn test_partial_and_no_data_are_distinguished() {
        let exp = batch(FlowDirection::Export, json!([{"year": 2023, "metricFOB": 1}]));
        let empty_imp = NormalizedBatch::empty(FlowDirection::Import);
        let merged = merge_flows(&exp, &empty_imp, JoinMode::Annual);
        assert_eq!(
            merged.coverage,
            Coverage::Partial { missing: FlowDirection::Import, cause: Absence::NoRecords }
        );
        assert!(merged.coverage.has_data());

        let failed_exp = NormalizedBatch::failed(FlowDirection::Export, "HTTP 500");
        let none = merge_flows(&failed_exp, &empty_imp, JoinMode::Annual);
        assert!(none.rows.is_empty());
        assert!(!none.coverage.has_data());
        assert_eq!(
            none.coverage,
            Coverage::NoData {
                export: Absence::UpstreamError("HTTP 500".into()),
                import: Absence::NoRecords,
            }
        );
        assert_eq!(none.coverage.errors(), vec!["HTTP 500"]);
    }
}
