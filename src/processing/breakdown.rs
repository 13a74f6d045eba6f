use super::normalizer::parse_metric;
use crate::models::{CountryShare, TradeRecord};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// FOB per country with its share of the total, largest first.
pub fn country_shares(records: &[TradeRecord]) -> Vec<CountryShare> {
    let mut by_country: BTreeMap<String, f64> = BTreeMap::new();
    let mut unnamed = 0usize;

    for rec in records {
        let Some(country) = rec.country.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
            unnamed += 1;
            continue;
        };
        *by_country.entry(country.to_string()).or_default() += parse_metric(rec.fob.as_ref()).or_zero();
    }

    if unnamed > 0 {
        warn!("{} records without a country skipped", unnamed);
    }

    let total: f64 = by_country.values().sum();
    if total <= 0.0 {
        debug!("country breakdown total is {}, nothing to share", total);
        return Vec::new();
    }

    let mut shares: Vec<CountryShare> = by_country
        .into_iter()
        .map(|(country, fob)| CountryShare { country, fob, share_pct: fob * 100.0 / total })
        .collect();

    shares.sort_by(|a, b| b.fob.total_cmp(&a.fob).then_with(|| a.country.cmp(&b.country)));
    shares
}
