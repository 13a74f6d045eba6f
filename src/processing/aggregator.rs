use super::metrics::{MetricsCalculator, PeriodTotals};
use crate::models::{AggregatedRow, CanonicalRow, Period};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of a partial-year aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialOutcome {
    Summary(AggregatedRow),
    /// No row fell inside the window. Not the same thing as zero trade.
    InsufficientData { period: Period },
}

impl PartialOutcome {
    pub fn period(&self) -> Period {
        match self {
            Self::Summary(row) => row.period,
            Self::InsufficientData { period } => *period,
        }
    }

    pub fn summary(&self) -> Option<&AggregatedRow> {
        match self {
            Self::Summary(row) => Some(row),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// One row per year present in `rows`, ascending. Years without rows are not
/// synthesized.
pub fn aggregate_by_year(rows: &[CanonicalRow], calc: &MetricsCalculator) -> Vec<AggregatedRow> {
    let mut by_year: BTreeMap<i32, PeriodTotals> = BTreeMap::new();
    for row in rows {
        by_year.entry(row.time_key.year).or_default().add_row(row);
    }

    let result: Vec<AggregatedRow> = by_year
        .into_iter()
        .map(|(year, totals)| calc.finish(Period::Year(year), &totals))
        .collect();

    debug!("aggregated {} rows into {} years", rows.len(), result.len());
    result
}

/// Sum `rows` of `year` from January through `through_month` into one row.
/// Rows without a month are taken as already restricted to the window.
pub fn aggregate_partial(
    rows: &[CanonicalRow],
    year: i32,
    through_month: u32,
    calc: &MetricsCalculator,
) -> PartialOutcome {
    let to_month = through_month.clamp(1, 12);
    let period = Period::PartialYear { year, from_month: 1, to_month };

    let mut totals = PeriodTotals::default();
    let mut contributing = 0usize;
    for row in rows {
        let in_window = row.time_key.year == year
            && row.time_key.month.is_none_or(|m| m <= to_month);
        if in_window {
            totals.add_row(row);
            contributing += 1;
        }
    }

    if contributing < rows.len() {
        debug!(
            "{}: {} of {} rows outside the window were ignored",
            period,
            rows.len() - contributing,
            rows.len()
        );
    }

    if contributing == 0 {
        info!("{}: insufficient data", period);
        return PartialOutcome::InsufficientData { period };
    }

    PartialOutcome::Summary(calc.finish(period, &totals))
}
