use crate::models::{AggregatedRow, Period, YearMonth};
use serde::Serialize;
use tracing::warn;

/// Percentage change from `previous` to `current`; undefined when the base is 0.
pub fn variation_pct(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let v = (current / previous - 1.0) * 100.0;
    v.is_finite().then_some(v)
}

/// Changes of one side of the trade between two rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FlowVariation {
    pub fob_pct: Option<f64>,
    pub kg_pct: Option<f64>,
    pub price_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearOverYear {
    pub period: Period,
    /// The year is still open at `through`; its totals are not comparable.
    pub partial: bool,
    pub export: FlowVariation,
    pub import: FlowVariation,
}

fn export_variation(prev: &AggregatedRow, cur: &AggregatedRow) -> FlowVariation {
    FlowVariation {
        fob_pct: variation_pct(prev.export_fob, cur.export_fob),
        kg_pct: variation_pct(prev.export_kg, cur.export_kg),
        price_pct: variation_pct(prev.avg_price_export, cur.avg_price_export),
    }
}

fn import_variation(prev: &AggregatedRow, cur: &AggregatedRow) -> FlowVariation {
    FlowVariation {
        fob_pct: variation_pct(prev.import_fob, cur.import_fob),
        kg_pct: variation_pct(prev.import_kg, cur.import_kg),
        price_pct: variation_pct(prev.avg_price_import, cur.avg_price_import),
    }
}

/// Variation of every yearly row against the year before it.
///
/// Rows get no variation when the year before is absent from `rows`, or when
/// the row's year is still open at `through` (data published up to a month
/// before December).
pub fn year_over_year(rows: &[AggregatedRow], through: YearMonth) -> Vec<YearOverYear> {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let year = row.period.year();
        let partial = year > through.year || (year == through.year && through.month < 12);
        let prev = i
            .checked_sub(1)
            .map(|p| &rows[p])
            .filter(|prev| prev.period.year() + 1 == year);

        let (export, import) = match prev {
            _ if partial => (FlowVariation::default(), FlowVariation::default()),
            Some(prev) if prev.price_unit == row.price_unit => {
                (export_variation(prev, row), import_variation(prev, row))
            }
            Some(prev) => {
                warn!("{} and {} use different price units, variation skipped", prev.period, row.period);
                (FlowVariation::default(), FlowVariation::default())
            }
            None => (FlowVariation::default(), FlowVariation::default()),
        };
        out.push(YearOverYear { period: row.period, partial, export, import });
    }
    out
}

/// Same months of two consecutive years, side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialComparison {
    pub previous: Period,
    pub current: Period,
    pub export: FlowVariation,
    pub import: FlowVariation,
    pub balance_fob_delta: f64,
}

pub fn compare_partials(previous: &AggregatedRow, current: &AggregatedRow) -> Option<PartialComparison> {
    if previous.price_unit != current.price_unit {
        warn!(
            "refusing to compare {} ({}) with {} ({})",
            previous.period, previous.price_unit, current.period, current.price_unit
        );
        return None;
    }
    if previous.period.months() != current.period.months() {
        warn!("comparing windows of different length: {} vs {}", previous.period, current.period);
    }

    Some(PartialComparison {
        previous: previous.period,
        current: current.period,
        export: export_variation(previous, current),
        import: import_variation(previous, current),
        balance_fob_delta: current.trade_balance_fob - previous.trade_balance_fob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceUnit;
    use crate::processing::metrics::{MetricsCalculator, PeriodTotals};

    fn row(period: Period, export_fob: f64, export_kg: f64, unit: PriceUnit) -> AggregatedRow {
        let t = PeriodTotals { export_fob, export_kg, ..Default::default() };
        MetricsCalculator::new(unit).finish(period, &t)
    }

    #[test]
    fn test_variation_pct() {
        assert_eq!(variation_pct(100.0, 150.0), Some(50.0));
        assert_eq!(variation_pct(200.0, 100.0), Some(-50.0));
        assert_eq!(variation_pct(0.0, 100.0), None);
    }

    #[test]
    fn test_year_over_year_first_row_has_no_base() {
        let rows = vec![
            row(Period::Year(2022), 100.0, 10.0, PriceUnit::PerKilogram),
            row(Period::Year(2023), 150.0, 10.0, PriceUnit::PerKilogram),
        ];
        let yoy = year_over_year(&rows, YearMonth::new(2024, 3));
        assert_eq!(yoy.len(), 2);
        assert_eq!(yoy[0].export, FlowVariation::default());
        assert_eq!(yoy[1].export.fob_pct, Some(50.0));
        assert_eq!(yoy[1].export.kg_pct, Some(0.0));
        assert_eq!(yoy[1].export.price_pct, Some(50.0));
        assert_eq!(yoy[1].import.fob_pct, None);
    }

    #[test]
    fn test_year_over_year_skips_gaps() {
        let rows = vec![
            row(Period::Year(2019), 100.0, 10.0, PriceUnit::PerKilogram),
            row(Period::Year(2021), 300.0, 10.0, PriceUnit::PerKilogram),
            row(Period::Year(2022), 600.0, 10.0, PriceUnit::PerKilogram),
        ];
        let yoy = year_over_year(&rows, YearMonth::new(2022, 12));
        assert_eq!(yoy[1].export.fob_pct, None);
        assert!(!yoy[1].partial);
        assert_eq!(yoy[2].export.fob_pct, Some(100.0));
        assert!(!yoy[2].partial);
    }

    #[test]
    fn test_year_over_year_marks_open_year() {
        let rows = vec![
            row(Period::Year(2023), 1000.0, 100.0, PriceUnit::PerKilogram),
            row(Period::Year(2024), 400.0, 40.0, PriceUnit::PerKilogram),
        ];
        let yoy = year_over_year(&rows, YearMonth::new(2024, 6));
        assert!(!yoy[0].partial);
        assert!(yoy[1].partial);
        assert_eq!(yoy[1].export, FlowVariation::default());
    }

    #[test]
    fn test_compare_partials_rejects_mixed_units() {
        let p = Period::PartialYear { year: 2024, from_month: 1, to_month: 2 };
        let c = Period::PartialYear { year: 2025, from_month: 1, to_month: 2 };
        let prev = row(p, 100.0, 10.0, PriceUnit::PerKilogram);
        let cur = row(c, 90.0, 10.0, PriceUnit::PerTon);
        assert!(compare_partials(&prev, &cur).is_none());

        let cur = row(c, 90.0, 10.0, PriceUnit::PerKilogram);
        let cmp = compare_partials(&prev, &cur).unwrap();
        assert_eq!(cmp.previous, p);
        assert_eq!(cmp.current, c);
        assert!((cmp.export.fob_pct.unwrap() + 10.0).abs() < 1e-9);
        assert_eq!(cmp.balance_fob_delta, -10.0);
    }
}
