use crate::error::FetchError;
use crate::models::{CanonicalRow, FlowDirection, TimeKey, TradeRecord};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

// ── Coercion ──────────────────────────────────────────────────────────────────

/// Outcome of parse-or-default on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Parsed(f64),
    Missing,
    Failed(String),
}

impl Coerced {
    /// The value the row carries: failures and absences become 0.
    pub fn or_zero(&self) -> f64 {
        match self {
            Self::Parsed(v) => *v,
            Self::Missing | Self::Failed(_) => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Unparseable,
    NonFinite,
    MissingTimeKey,
    InvalidMonth,
}

/// A field that could not be read as a number and was replaced, or a record
/// that was dropped because it had no usable time key.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionIssue {
    pub flow: FlowDirection,
    pub record_index: usize,
    pub field: &'static str,
    pub raw: String,
    pub kind: IssueKind,
}

/// Parse a metric: JSON numbers as-is, numeric strings trimmed.
/// "1234.5" → 1234.5 | 1234 → 1234.0 | "" / null → Missing | "n/a" → Failed
pub fn parse_metric(value: Option<&Value>) -> Coerced {
    match value {
        None | Some(Value::Null) => Coerced::Missing,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.is_finite() => Coerced::Parsed(v),
            _ => Coerced::Failed(n.to_string()),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Coerced::Missing;
            }
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Coerced::Parsed(v),
                _ => Coerced::Failed(s.to_string()),
            }
        }
        Some(other) => Coerced::Failed(other.to_string()),
    }
}

/// Parse an integral calendar field. "2023" | 2023 | 2023.0 → 2023
fn parse_integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn raw_text(value: Option<&Value>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

// ── Batch ─────────────────────────────────────────────────────────────────────

/// Canonical fragments of one flow, one per accepted source record.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub flow: FlowDirection,
    pub fragments: Vec<CanonicalRow>,
    pub time_keys: BTreeSet<TimeKey>,
    pub issues: Vec<CoercionIssue>,
    pub missing_fields: usize,
    pub upstream_error: Option<String>,
}

impl NormalizedBatch {
    pub fn empty(flow: FlowDirection) -> Self {
        Self {
            flow,
            fragments: Vec::new(),
            time_keys: BTreeSet::new(),
            issues: Vec::new(),
            missing_fields: 0,
            upstream_error: None,
        }
    }

    pub fn failed(flow: FlowDirection, error: impl Into<String>) -> Self {
        Self {
            upstream_error: Some(error.into()),
            ..Self::empty(flow)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Normalize a fetch result; an upstream error yields an empty batch that
/// remembers the error.
pub fn normalize_outcome(
    flow: FlowDirection,
    outcome: &Result<Vec<TradeRecord>, FetchError>,
) -> NormalizedBatch {
    match outcome {
        Ok(records) => normalize(flow, records),
        Err(e) => {
            warn!("{} fetch failed, treating as no data: {}", flow, e);
            NormalizedBatch::failed(flow, e.to_string())
        }
    }
}

pub fn normalize(flow: FlowDirection, records: &[TradeRecord]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::empty(flow);

    for (i, record) in records.iter().enumerate() {
        let Some(time_key) = record_time_key(flow, i, record, &mut batch.issues) else {
            continue;
        };

        let mut fragment = CanonicalRow::zeroed(time_key);
        // Freight, insurance and CIF are only requested for imports and may be
        // absent; their absence is not counted but bad values still are.
        let mut read = |field: &'static str, value: Option<&Value>, required: bool| -> f64 {
            let coerced = parse_metric(value);
            match &coerced {
                Coerced::Missing if required => batch.missing_fields += 1,
                Coerced::Missing => {}
                Coerced::Failed(raw) => {
                    let kind = if raw.parse::<f64>().is_ok() {
                        IssueKind::NonFinite
                    } else {
                        IssueKind::Unparseable
                    };
                    debug!("{} record {} ({}): {} = {:?} coerced to 0", flow, i, time_key, field, raw);
                    batch.issues.push(CoercionIssue {
                        flow,
                        record_index: i,
                        field,
                        raw: raw.clone(),
                        kind,
                    });
                }
                Coerced::Parsed(_) => {}
            }
            coerced.or_zero()
        };

        match flow {
            FlowDirection::Export => {
                fragment.export_fob = read("metricFOB", record.fob.as_ref(), true);
                fragment.export_kg = read("metricKG", record.kg.as_ref(), true);
            }
            FlowDirection::Import => {
                fragment.import_fob = read("metricFOB", record.fob.as_ref(), true);
                fragment.import_kg = read("metricKG", record.kg.as_ref(), true);
                fragment.import_freight = read("metricFreight", record.freight.as_ref(), false);
                fragment.import_insurance = read("metricInsurance", record.insurance.as_ref(), false);
                fragment.import_cif = read("metricCIF", record.cif.as_ref(), false);
            }
        }

        batch.time_keys.insert(time_key);
        batch.fragments.push(fragment);
    }

    if !batch.issues.is_empty() {
        warn!(
            "{}: {} of {} records had fields coerced to 0 or were dropped",
            flow,
            batch.issues.len(),
            records.len()
        );
    }
    debug!(
        "{}: normalized {} records into {} fragments ({} time keys)",
        flow,
        records.len(),
        batch.fragments.len(),
        batch.time_keys.len()
    );

    batch
}

fn record_time_key(
    flow: FlowDirection,
    index: usize,
    record: &TradeRecord,
    issues: &mut Vec<CoercionIssue>,
) -> Option<TimeKey> {
    let Some(year) = parse_integer(record.year.as_ref()).and_then(|y| i32::try_from(y).ok()) else {
        warn!("{} record {} has no usable year ({:?}), dropped", flow, index, record.year);
        issues.push(CoercionIssue {
            flow,
            record_index: index,
            field: "year",
            raw: raw_text(record.year.as_ref()),
            kind: IssueKind::MissingTimeKey,
        });
        return None;
    };

    let month = match record.month.as_ref() {
        None | Some(Value::Null) => None,
        Some(raw) => match parse_integer(Some(raw)) {
            Some(m @ 1..=12) => Some(m as u32),
            _ => {
                warn!("{} record {} has invalid month {}, dropped", flow, index, raw);
                issues.push(CoercionIssue {
                    flow,
                    record_index: index,
                    field: "monthNumber",
                    raw: raw.to_string(),
                    kind: IssueKind::InvalidMonth,
                });
                return None;
            }
        },
    };

    Some(TimeKey { year, month })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> TradeRecord {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric(Some(&json!("1234.5"))), Coerced::Parsed(1234.5));
        assert_eq!(parse_metric(Some(&json!(10))), Coerced::Parsed(10.0));
        assert_eq!(parse_metric(Some(&json!(" 7 "))), Coerced::Parsed(7.0));
        assert_eq!(parse_metric(None), Coerced::Missing);
        assert_eq!(parse_metric(Some(&Value::Null)), Coerced::Missing);
        assert_eq!(parse_metric(Some(&json!(""))), Coerced::Missing);
        assert_eq!(parse_metric(Some(&json!("n/a"))), Coerced::Failed("n/a".into()));
        assert_eq!(parse_metric(Some(&json!("NaN"))), Coerced::Failed("NaN".into()));
        assert_eq!(parse_metric(Some(&json!(true))).or_zero(), 0.0);
    }

    #[test]
    fn test_export_fragment_zero_fills_import_side() {
        let recs = vec![record(json!({"year": "2023", "metricFOB": "1000", "metricKG": 100}))];
        let batch = normalize(FlowDirection::Export, &recs);
        assert_eq!(batch.fragments.len(), 1);
        let row = batch.fragments[0];
        assert_eq!(row.time_key, TimeKey::annual(2023));
        assert_eq!(row.export_fob, 1000.0);
        assert_eq!(row.export_kg, 100.0);
        assert_eq!(row.import_fob, 0.0);
        assert_eq!(row.import_kg, 0.0);
        assert!(batch.issues.is_empty());
    }

    #[test]
    fn test_missing_and_bad_fields_become_zero() {
        let recs = vec![
            record(json!({"year": 2022})),
            record(json!({"year": 2022, "monthNumber": 3, "metricFOB": "abc", "metricKG": null})),
            record(json!({"year": "2022", "metricFOB": "1e400"})),
        ];
        let batch = normalize(FlowDirection::Import, &recs);
        assert_eq!(batch.fragments.len(), 3);
        for row in &batch.fragments {
            assert!(row.metrics().iter().all(|v| v.is_finite()));
        }
        assert_eq!(batch.issues.len(), 2);
        assert_eq!(batch.issues[0].field, "metricFOB");
        assert_eq!(batch.issues[0].kind, IssueKind::Unparseable);
        assert_eq!(batch.issues[1].kind, IssueKind::NonFinite);
        // record 0: fob+kg missing, record 1: kg missing, record 2: kg missing
        assert_eq!(batch.missing_fields, 4);
    }

    #[test]
    fn test_export_ignores_import_only_fields() {
        let recs = vec![record(json!({"year": 2024, "metricFOB": 5, "metricKG": 1, "metricCIF": 9}))];
        let batch = normalize(FlowDirection::Export, &recs);
        assert_eq!(batch.fragments[0].import_cif, 0.0);
    }

    #[test]
    fn test_import_carries_freight_and_cif() {
        let recs = vec![record(json!({
            "year": 2024, "metricFOB": "50", "metricKG": "5",
            "metricFreight": "3", "metricInsurance": "1", "metricCIF": "54"
        }))];
        let row = normalize(FlowDirection::Import, &recs).fragments[0];
        assert_eq!(row.import_freight, 3.0);
        assert_eq!(row.import_insurance, 1.0);
        assert_eq!(row.import_cif, 54.0);
    }

    #[test]
    fn test_bad_import_costs_are_flagged_but_absent_ones_are_not() {
        let recs = vec![record(json!({
            "year": 2024, "metricFOB": "50", "metricKG": "5",
            "metricFreight": "abc", "metricCIF": "NaN"
        }))];
        let batch = normalize(FlowDirection::Import, &recs);
        let row = batch.fragments[0];
        assert_eq!(row.import_freight, 0.0);
        assert_eq!(row.import_cif, 0.0);
        assert_eq!(batch.missing_fields, 0);
        assert_eq!(batch.issues.len(), 2);
        assert_eq!(batch.issues[0].field, "metricFreight");
        assert_eq!(batch.issues[0].kind, IssueKind::Unparseable);
        assert_eq!(batch.issues[1].field, "metricCIF");
        assert_eq!(batch.issues[1].kind, IssueKind::NonFinite);
    }

    #[test]
    fn test_records_without_time_key_are_dropped() {
        let recs = vec![
            record(json!({"metricFOB": 1})),
            record(json!({"year": "20x3", "metricFOB": 1})),
            record(json!({"year": 2023, "monthNumber": 13, "metricFOB": 1})),
            record(json!({"year": 2023, "monthNumber": "02", "metricFOB": 1})),
        ];
        let batch = normalize(FlowDirection::Export, &recs);
        assert_eq!(batch.fragments.len(), 1);
        assert_eq!(batch.fragments[0].time_key, TimeKey::monthly(2023, 2));
        assert_eq!(batch.issues.len(), 3);
        assert_eq!(batch.issues[2].kind, IssueKind::InvalidMonth);
    }

    #[test]
    fn test_empty_input_is_not_an_error() {
        let batch = normalize(FlowDirection::Export, &[]);
        assert!(batch.is_empty());
        assert!(batch.upstream_error.is_none());
        assert!(batch.time_keys.is_empty());
    }

    #[test]
    fn test_upstream_error_yields_empty_batch() {
        let outcome = Err(FetchError::Status { status: 500, url: "u".into() });
        let batch = normalize_outcome(FlowDirection::Import, &outcome);
        assert!(batch.is_empty());
        assert_eq!(batch.upstream_error.as_deref(), Some("HTTP 500 from u"));
    }
}
