use crate::models::{AggregatedRow, CanonicalRow, Period, PriceUnit};

/// Running sums for one reporting period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeriodTotals {
    pub export_fob: f64,
    pub export_kg: f64,
    pub import_fob: f64,
    pub import_kg: f64,
    pub import_freight: f64,
    pub import_insurance: f64,
    pub import_cif: f64,
}

impl PeriodTotals {
    pub fn add_row(&mut self, row: &CanonicalRow) {
        self.export_fob += row.export_fob;
        self.export_kg += row.export_kg;
        self.import_fob += row.import_fob;
        self.import_kg += row.import_kg;
        self.import_freight += row.import_freight;
        self.import_insurance += row.import_insurance;
        self.import_cif += row.import_cif;
    }
}

/// Computes trade balance and average price under one price unit.
///
/// A single calculator stamps every row it produces, so export and import
/// prices of a row can never be expressed in different units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsCalculator {
    unit: PriceUnit,
}

impl MetricsCalculator {
    pub const fn new(unit: PriceUnit) -> Self {
        Self { unit }
    }

    pub const fn unit(&self) -> PriceUnit {
        self.unit
    }

    pub fn trade_balance(export: f64, import: f64) -> f64 {
        export - import
    }

    /// FOB per pricing unit of weight. Zero weight has no unit price: 0.
    pub fn unit_price(&self, fob: f64, kg: f64) -> f64 {
        if kg > 0.0 {
            let price = fob / (kg / self.unit.kg_per_unit());
            if price.is_finite() { price } else { 0.0 }
        } else {
            0.0
        }
    }

    pub fn finish(&self, period: Period, totals: &PeriodTotals) -> AggregatedRow {
        AggregatedRow {
            period,
            export_fob: totals.export_fob,
            export_kg: totals.export_kg,
            import_fob: totals.import_fob,
            import_kg: totals.import_kg,
            import_freight: totals.import_freight,
            import_insurance: totals.import_insurance,
            import_cif: totals.import_cif,
            trade_balance_fob: Self::trade_balance(totals.export_fob, totals.import_fob),
            trade_balance_kg: Self::trade_balance(totals.export_kg, totals.import_kg),
            avg_price_export: self.unit_price(totals.export_fob, totals.export_kg),
            avg_price_import: self.unit_price(totals.import_fob, totals.import_kg),
            price_unit: self.unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(export_fob: f64, export_kg: f64, import_fob: f64, import_kg: f64) -> PeriodTotals {
        PeriodTotals { export_fob, export_kg, import_fob, import_kg, ..Default::default() }
    }

    #[test]
    fn test_end_to_end_values_per_kg() {
        let calc = MetricsCalculator::new(PriceUnit::PerKilogram);
        let row = calc.finish(Period::Year(2023), &totals(1000.0, 100.0, 400.0, 50.0));
        assert_eq!(row.trade_balance_fob, 600.0);
        assert_eq!(row.trade_balance_kg, 50.0);
        assert_eq!(row.avg_price_export, 10.0);
        assert_eq!(row.avg_price_import, 8.0);
        assert_eq!(row.price_unit, PriceUnit::PerKilogram);
    }

    #[test]
    fn test_zero_weight_price_is_zero() {
        let calc = MetricsCalculator::default();
        let row = calc.finish(Period::Year(2020), &totals(500.0, 0.0, 0.0, 0.0));
        assert_eq!(row.avg_price_export, 0.0);
        assert_eq!(row.avg_price_import, 0.0);
        assert!(row.avg_price_export.is_finite());
    }

    #[test]
    fn test_negative_weight_has_no_price() {
        let calc = MetricsCalculator::default();
        assert_eq!(calc.unit_price(100.0, -5.0), 0.0);
    }

    #[test]
    fn test_per_ton_applies_to_both_sides() {
        let kg = MetricsCalculator::new(PriceUnit::PerKilogram);
        let ton = MetricsCalculator::new(PriceUnit::PerTon);
        let t = totals(1000.0, 100.0, 400.0, 50.0);
        let a = kg.finish(Period::Year(2023), &t);
        let b = ton.finish(Period::Year(2023), &t);
        assert_eq!(b.avg_price_export, a.avg_price_export * 1000.0);
        assert_eq!(b.avg_price_import, a.avg_price_import * 1000.0);
        assert_eq!(b.price_unit, PriceUnit::PerTon);
        // Balances do not depend on the price unit.
        assert_eq!(a.trade_balance_fob, b.trade_balance_fob);
    }

    #[test]
    fn test_balance_can_be_negative() {
        let row = MetricsCalculator::default().finish(Period::Year(2021), &totals(10.0, 1.0, 30.0, 4.0));
        assert_eq!(row.trade_balance_fob, -20.0);
        assert_eq!(row.trade_balance_kg, -3.0);
        assert_eq!(row.trade_balance_fob, row.export_fob - row.import_fob);
    }
}
