//! Request bodies and response decoding for the Comex Stat API.

use super::TradeQuery;
use crate::error::FetchError;
use crate::models::{FlowDirection, LastUpdate, TradeRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// ── Requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralRequest {
    pub flow: FlowDirection,
    pub month_detail: bool,
    pub period: RequestPeriod,
    pub filters: Vec<RequestFilter>,
    pub details: Vec<&'static str>,
    pub metrics: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct RequestPeriod {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct RequestFilter {
    pub filter: &'static str,
    pub values: Vec<String>,
}

const BASE_METRICS: [&str; 2] = ["metricFOB", "metricKG"];
const IMPORT_COST_METRICS: [&str; 3] = ["metricFreight", "metricInsurance", "metricCIF"];

pub fn general_request(query: &TradeQuery) -> GeneralRequest {
    let (details, metrics) = if query.by_country {
        (vec!["country"], vec!["metricFOB"])
    } else {
        let mut metrics = BASE_METRICS.to_vec();
        if query.flow == FlowDirection::Import {
            metrics.extend(IMPORT_COST_METRICS);
        }
        (Vec::new(), metrics)
    };

    GeneralRequest {
        flow: query.flow,
        month_detail: query.month_detail,
        period: RequestPeriod {
            from: query.from.to_string(),
            to: query.to.to_string(),
        },
        filters: vec![RequestFilter {
            filter: "ncm",
            values: vec![query.ncm.as_str().to_string()],
        }],
        details,
        metrics,
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GeneralData {
    #[serde(default)]
    list: Option<Vec<TradeRecord>>,
}

#[derive(Debug, Deserialize)]
struct DescriptionEntry {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateData {
    updated: Option<String>,
    year: Option<Value>,
    #[serde(rename = "monthNumber")]
    month: Option<Value>,
    #[serde(rename = "lastPeriod")]
    last_period: Option<String>,
}

/// Records of a `general` response. A null or absent list is an empty result.
pub fn parse_general_response(body: &str) -> Result<Vec<TradeRecord>, FetchError> {
    let env: Envelope<GeneralData> = serde_json::from_str(body)?;
    let data = env
        .data
        .ok_or_else(|| FetchError::Shape("general response without 'data'".into()))?;
    let records = data.list.unwrap_or_default();
    debug!("general response: {} records", records.len());
    Ok(records)
}

pub fn parse_description_response(body: &str, code: &str) -> Result<String, FetchError> {
    let env: Envelope<Vec<DescriptionEntry>> = serde_json::from_str(body)?;
    env.data
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|e| e.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FetchError::NotFound(format!("ncm {code}")))
}

fn int_of(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn split_last_period(raw: &str) -> Option<(i32, u32)> {
    let raw = raw.trim();
    if raw.len() != 6 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((raw[..4].parse().ok()?, raw[4..].parse().ok()?))
}

pub fn parse_update_response(body: &str) -> Result<LastUpdate, FetchError> {
    let env: Envelope<UpdateData> = serde_json::from_str(body)?;
    let data = env
        .data
        .ok_or_else(|| FetchError::Shape("update response without 'data'".into()))?;

    let from_fields = || -> Option<(i32, u32)> {
        let year = i32::try_from(int_of(data.year.as_ref())?).ok()?;
        let month = u32::try_from(int_of(data.month.as_ref())?).ok()?;
        Some((year, month))
    };

    let period = match data.last_period.as_deref() {
        Some(lp) => split_last_period(lp).or_else(|| {
            warn!("unparseable lastPeriod {:?}, falling back to year/monthNumber", lp);
            from_fields()
        }),
        None => from_fields(),
    };

    let (year, month) =
        period.ok_or_else(|| FetchError::Shape("update response without a usable period".into()))?;
    if !(1..=12).contains(&month) {
        return Err(FetchError::Shape(format!("update month {month} out of range")));
    }
    let updated = data
        .updated
        .ok_or_else(|| FetchError::Shape("update response without 'updated'".into()))?;

    Ok(LastUpdate { updated, year, month })
}
