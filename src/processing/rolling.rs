use crate::models::{CanonicalRow, FlowDirection, RollingPoint};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Fob,
    Kg,
}

impl Metric {
    fn read(self, row: &CanonicalRow, flow: FlowDirection) -> f64 {
        match self {
            Self::Fob => row.fob(flow),
            Self::Kg => row.kg(flow),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fob => "US$ FOB",
            Self::Kg => "KG",
        })
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fob" => Ok(Self::Fob),
            "kg" => Ok(Self::Kg),
            other => Err(format!("unknown metric '{other}', expected fob or kg")),
        }
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

/// Trailing sums over `window` consecutive months.
///
/// Months missing between the first and last observation count as zero. The
/// first point is emitted once a full window is available.
pub fn rolling_sum(
    rows: &[CanonicalRow],
    flow: FlowDirection,
    metric: Metric,
    window: usize,
) -> Vec<RollingPoint> {
    if window == 0 {
        return Vec::new();
    }

    let mut by_month: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    let mut without_month = 0usize;
    for row in rows {
        match row.time_key.month {
            Some(m) => *by_month.entry((row.time_key.year, m)).or_default() += metric.read(row, flow),
            None => without_month += 1,
        }
    }
    if without_month > 0 {
        warn!("{} rows without a month ignored for rolling sum", without_month);
    }

    let (Some(&first), Some(&last)) = (by_month.keys().next(), by_month.keys().next_back()) else {
        return Vec::new();
    };

    let mut series: Vec<((i32, u32), f64)> = Vec::new();
    let mut cursor = first;
    loop {
        series.push((cursor, by_month.get(&cursor).copied().unwrap_or(0.0)));
        if cursor == last {
            break;
        }
        cursor = next_month(cursor.0, cursor.1);
    }

    let mut points = Vec::new();
    let mut acc = 0.0;
    for i in 0..series.len() {
        acc += series[i].1;
        if i >= window {
            acc -= series[i - window].1;
        }
        if i + 1 >= window {
            let ((year, month), _) = series[i];
            points.push(RollingPoint { year, month, window_sum: acc });
        }
    }

    debug!("{} {} rolling {}m: {} months, {} points", flow, metric, window, series.len(), points.len());
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeKey;

    fn imp(year: i32, month: u32, kg: f64) -> CanonicalRow {
        CanonicalRow { import_kg: kg, ..CanonicalRow::zeroed(TimeKey::monthly(year, month)) }
    }

    #[test]
    fn test_window_of_three() {
        let rows = vec![imp(2024, 1, 1.0), imp(2024, 2, 2.0), imp(2024, 3, 3.0), imp(2024, 4, 4.0)];
        let pts = rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 3);
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0], RollingPoint { year: 2024, month: 3, window_sum: 6.0 });
        assert_eq!(pts[1], RollingPoint { year: 2024, month: 4, window_sum: 9.0 });
    }

    #[test]
    fn test_gap_months_count_as_zero_across_year_end() {
        let rows = vec![imp(2023, 11, 5.0), imp(2024, 2, 7.0)];
        let pts = rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 2);
        // 2023-11, 2023-12 (0), 2024-01 (0), 2024-02
        let sums: Vec<f64> = pts.iter().map(|p| p.window_sum).collect();
        assert_eq!(sums, vec![5.0, 0.0, 7.0]);
        assert_eq!((pts[1].year, pts[1].month), (2024, 1));
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let rows: Vec<CanonicalRow> = (1..=11).map(|m| imp(2024, m, 1.0)).collect();
        assert!(rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 12).is_empty());
        assert!(rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 0).is_empty());
    }

    #[test]
    fn test_twelve_month_window() {
        let rows: Vec<CanonicalRow> = (1..=12).map(|m| imp(2024, m, 10.0)).chain([imp(2025, 1, 40.0)]).collect();
        let pts = rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 12);
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0].window_sum, 120.0);
        assert_eq!(pts[1].window_sum, 150.0);
    }

    #[test]
    fn test_annual_rows_are_ignored() {
        let rows = vec![CanonicalRow { import_kg: 3.0, ..CanonicalRow::zeroed(TimeKey::annual(2024)) }];
        assert!(rolling_sum(&rows, FlowDirection::Import, Metric::Kg, 1).is_empty());
    }
}
