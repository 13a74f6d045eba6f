//! Assembly of one code's analysis from already-fetched flows.

use crate::error::FetchError;
use crate::models::{AggregatedRow, FlowDirection, LastUpdate, NcmCode, TradeRecord, YearMonth};
use crate::processing::comparison::{PartialComparison, YearOverYear, compare_partials, year_over_year};
use crate::processing::{
    Coverage, JoinMode, MetricsCalculator, NormalizedBatch, PartialOutcome, aggregate_by_year,
    aggregate_partial, merge_flows, normalize_outcome,
};
use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

/// The year pair and month window every partial comparison is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePeriod {
    pub current_year: i32,
    pub previous_year: i32,
    pub through_month: u32,
}

impl ReferencePeriod {
    pub fn new(current_year: i32, through_month: u32) -> Self {
        Self {
            current_year,
            previous_year: current_year - 1,
            through_month: through_month.clamp(1, 12),
        }
    }

    pub fn from_update(update: &LastUpdate) -> Self {
        Self::new(update.year, update.month)
    }

    /// Last complete month before `today`, for when the publication date is
    /// unavailable.
    pub fn fallback(today: NaiveDate) -> Self {
        match today.month() {
            1 => Self::new(today.year() - 1, 12),
            m => Self::new(today.year(), m - 1),
        }
    }

    pub fn through(&self) -> YearMonth {
        YearMonth::new(self.current_year, self.through_month)
    }
}

/// Fetch outcome of both flows of one query.
#[derive(Debug)]
pub struct FlowPair {
    pub export: Result<Vec<TradeRecord>, FetchError>,
    pub import: Result<Vec<TradeRecord>, FetchError>,
}

impl FlowPair {
    fn normalize(&self) -> (NormalizedBatch, NormalizedBatch) {
        (
            normalize_outcome(FlowDirection::Export, &self.export),
            normalize_outcome(FlowDirection::Import, &self.import),
        )
    }
}

/// Everything fetched for one code.
#[derive(Debug)]
pub struct FetchedFlows {
    pub history: FlowPair,
    pub previous: FlowPair,
    pub current: FlowPair,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub ncm: NcmCode,
    pub description: Option<String>,
    pub reference: ReferencePeriod,
    pub history: Vec<AggregatedRow>,
    pub history_coverage: Coverage,
    pub year_over_year: Vec<YearOverYear>,
    pub previous: PartialOutcome,
    pub previous_coverage: Coverage,
    pub current: PartialOutcome,
    pub current_coverage: Coverage,
    pub comparison: Option<PartialComparison>,
    /// Values coerced to zero and records dropped during normalization.
    pub issues: usize,
    pub errors: Vec<String>,
}

impl AnalysisReport {
    /// Rows worth persisting: every year plus the partial windows that had data.
    pub fn summaries(&self) -> Vec<AggregatedRow> {
        let mut rows = self.history.clone();
        rows.extend(self.previous.summary().cloned());
        rows.extend(self.current.summary().cloned());
        rows
    }

    pub fn has_data(&self) -> bool {
        self.history_coverage.has_data()
            || self.previous_coverage.has_data()
            || self.current_coverage.has_data()
    }
}

/// Build the report of one code. Pure: equal inputs give equal reports.
pub fn build_report(
    ncm: &NcmCode,
    reference: ReferencePeriod,
    fetched: &FetchedFlows,
    calc: &MetricsCalculator,
) -> AnalysisReport {
    let (hist_exp, hist_imp) = fetched.history.normalize();
    let (prev_exp, prev_imp) = fetched.previous.normalize();
    let (cur_exp, cur_imp) = fetched.current.normalize();

    let issues = [&hist_exp, &hist_imp, &prev_exp, &prev_imp, &cur_exp, &cur_imp]
        .iter()
        .map(|b| b.issues.len())
        .sum::<usize>();

    let history_merged = merge_flows(&hist_exp, &hist_imp, JoinMode::Annual);
    let history = aggregate_by_year(&history_merged.rows, calc);
    let yoy = year_over_year(&history, reference.through());

    let previous_merged = merge_flows(&prev_exp, &prev_imp, JoinMode::Annual);
    let previous = aggregate_partial(
        &previous_merged.rows,
        reference.previous_year,
        reference.through_month,
        calc,
    );

    let current_merged = merge_flows(&cur_exp, &cur_imp, JoinMode::Annual);
    let current = aggregate_partial(
        &current_merged.rows,
        reference.current_year,
        reference.through_month,
        calc,
    );

    let comparison = match (previous.summary(), current.summary()) {
        (Some(prev), Some(cur)) => compare_partials(prev, cur),
        _ => None,
    };

    let mut errors: Vec<String> = Vec::new();
    for coverage in [&history_merged.coverage, &previous_merged.coverage, &current_merged.coverage] {
        for e in coverage.errors() {
            if !errors.iter().any(|seen| seen == e) {
                errors.push(e.to_string());
            }
        }
    }
    if !errors.is_empty() {
        warn!("{}: {} upstream errors", ncm, errors.len());
    }
    debug!("{}: {} years, {} issues", ncm, history.len(), issues);

    AnalysisReport {
        ncm: ncm.clone(),
        description: None,
        reference,
        history,
        history_coverage: history_merged.coverage,
        year_over_year: yoy,
        previous,
        previous_coverage: previous_merged.coverage,
        current,
        current_coverage: current_merged.coverage,
        comparison,
        issues,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, PriceUnit};
    use crate::processing::Absence;
    use serde_json::json;

    fn recs(v: serde_json::Value) -> Result<Vec<TradeRecord>, FetchError> {
        Ok(serde_json::from_value(v).unwrap())
    }

    fn pair(export: serde_json::Value, import: serde_json::Value) -> FlowPair {
        FlowPair { export: recs(export), import: recs(import) }
    }

    fn scenario() -> FetchedFlows {
        FetchedFlows {
            history: pair(
                json!([{"year": "2023", "metricFOB": "1000", "metricKG": "100"}]),
                json!([{"year": 2023, "metricFOB": 400, "metricKG": 50}]),
            ),
            previous: pair(
                json!([{"year": "2023", "metricFOB": "500", "metricKG": "50"}]),
                json!([]),
            ),
            current: FlowPair {
                export: recs(json!([{"year": "2024", "metricFOB": "750", "metricKG": "50"}])),
                import: Err(FetchError::Status { status: 503, url: "general".into() }),
            },
        }
    }

    fn ncm() -> NcmCode {
        NcmCode::parse("3926.90.90").unwrap()
    }

    #[test]
    fn test_end_to_end_history_values() {
        let calc = MetricsCalculator::new(PriceUnit::PerKilogram);
        let report = build_report(&ncm(), ReferencePeriod::new(2024, 6), &scenario(), &calc);

        assert_eq!(report.history.len(), 1);
        let row = &report.history[0];
        assert_eq!(row.period, Period::Year(2023));
        assert_eq!(row.trade_balance_fob, 600.0);
        assert_eq!(row.trade_balance_kg, 50.0);
        assert_eq!(row.avg_price_export, 10.0);
        assert_eq!(row.avg_price_import, 8.0);
        assert_eq!(report.history_coverage, Coverage::Full);
    }

    #[test]
    fn test_partials_coverage_and_comparison() {
        let calc = MetricsCalculator::new(PriceUnit::PerKilogram);
        let report = build_report(&ncm(), ReferencePeriod::new(2024, 6), &scenario(), &calc);

        assert_eq!(
            report.previous_coverage,
            Coverage::Partial { missing: FlowDirection::Import, cause: Absence::NoRecords }
        );
        assert!(matches!(
            report.current_coverage,
            Coverage::Partial { missing: FlowDirection::Import, cause: Absence::UpstreamError(_) }
        ));
        assert_eq!(report.errors, vec!["HTTP 503 from general".to_string()]);

        let prev = report.previous.summary().unwrap();
        assert_eq!(prev.period, Period::PartialYear { year: 2023, from_month: 1, to_month: 6 });
        let cmp = report.comparison.as_ref().unwrap();
        assert_eq!(cmp.export.fob_pct, Some(50.0));
        assert_eq!(cmp.export.kg_pct, Some(0.0));
        assert_eq!(report.summaries().len(), 3);
        assert!(report.has_data());
    }

    #[test]
    fn test_build_report_is_idempotent() {
        let calc = MetricsCalculator::new(PriceUnit::PerTon);
        let fetched = scenario();
        let a = build_report(&ncm(), ReferencePeriod::new(2024, 6), &fetched, &calc);
        let b = build_report(&ncm(), ReferencePeriod::new(2024, 6), &fetched, &calc);
        assert_eq!(a, b);
        assert!((a.history[0].avg_price_export - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_windows_are_insufficient_data() {
        let calc = MetricsCalculator::default();
        let fetched = FetchedFlows {
            history: pair(json!([]), json!([])),
            previous: pair(json!([]), json!([])),
            current: pair(json!([]), json!([])),
        };
        let report = build_report(&ncm(), ReferencePeriod::new(2025, 3), &fetched, &calc);
        assert!(report.history.is_empty());
        assert!(matches!(report.current, PartialOutcome::InsufficientData { .. }));
        assert!(report.comparison.is_none());
        assert!(report.summaries().is_empty());
        assert!(!report.has_data());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_reference_period() {
        let update = LastUpdate { updated: "2025-07-04".into(), year: 2025, month: 6 };
        let r = ReferencePeriod::from_update(&update);
        assert_eq!((r.previous_year, r.current_year, r.through_month), (2024, 2025, 6));

        let jan = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert_eq!(ReferencePeriod::fallback(jan), ReferencePeriod::new(2025, 12));
        let oct = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(ReferencePeriod::fallback(oct).through(), YearMonth::new(2026, 9));
    }
}
