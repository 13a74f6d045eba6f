//! Comex Stat (MDIC) foreign trade statistics API.

pub mod http_client;
pub mod payload;

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::models::{FlowDirection, LastUpdate, NcmCode, TradeRecord, YearMonth};
use anyhow::{Context, Result};
use async_trait::async_trait;
use http_client::HttpClient;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Anything that can answer trade-statistics queries.
#[async_trait]
pub trait TradeDataSource: Send + Sync {
    async fn fetch_trade(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, FetchError>;
    async fn fetch_description(&self, ncm: &NcmCode) -> Result<String, FetchError>;
    async fn fetch_last_update(&self) -> Result<LastUpdate, FetchError>;
}

#[async_trait]
impl<T: TradeDataSource + ?Sized> TradeDataSource for Arc<T> {
    async fn fetch_trade(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, FetchError> {
        (**self).fetch_trade(query).await
    }

    async fn fetch_description(&self, ncm: &NcmCode) -> Result<String, FetchError> {
        (**self).fetch_description(ncm).await
    }

    async fn fetch_last_update(&self) -> Result<LastUpdate, FetchError> {
        (**self).fetch_last_update().await
    }
}

// ── Queries ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeQuery {
    pub ncm: NcmCode,
    pub flow: FlowDirection,
    pub from: YearMonth,
    pub to: YearMonth,
    pub month_detail: bool,
    pub by_country: bool,
}

impl TradeQuery {
    /// Annual totals from January of `from_year` through `through`.
    pub fn history(ncm: NcmCode, flow: FlowDirection, from_year: i32, through: YearMonth) -> Self {
        Self {
            ncm,
            flow,
            from: YearMonth::new(from_year, 1),
            to: through,
            month_detail: false,
            by_country: false,
        }
    }

    /// One total for January through `through_month` of `year`.
    pub fn partial_year(ncm: NcmCode, flow: FlowDirection, year: i32, through_month: u32) -> Self {
        Self {
            ncm,
            flow,
            from: YearMonth::new(year, 1),
            to: YearMonth::new(year, through_month),
            month_detail: false,
            by_country: false,
        }
    }

    /// Month-by-month series between two bounds.
    pub fn monthly(ncm: NcmCode, flow: FlowDirection, from: YearMonth, to: YearMonth) -> Self {
        Self {
            ncm,
            flow,
            from,
            to,
            month_detail: true,
            by_country: false,
        }
    }

    /// FOB per partner country for January through `through_month` of `year`.
    pub fn by_country(ncm: NcmCode, flow: FlowDirection, year: i32, through_month: u32) -> Self {
        Self {
            by_country: true,
            ..Self::partial_year(ncm, flow, year, through_month)
        }
    }

    pub fn cache_key(&self) -> String {
        format!(
            "trade:{}:{}:{}:{}:{}:{}",
            self.ncm,
            self.flow,
            self.from,
            self.to,
            if self.month_detail { "monthly" } else { "total" },
            if self.by_country { "country" } else { "all" },
        )
    }
}

// ── HTTP source ───────────────────────────────────────────────────────────────

pub struct ComexClient {
    http: HttpClient,
    base: Url,
}

impl ComexClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).with_context(|| format!("Invalid API base url {}", config.base_url))?;
        Ok(Self {
            http: HttpClient::new(config)?,
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(format!("{path}: {e}")))
    }
}

#[async_trait]
impl TradeDataSource for ComexClient {
    async fn fetch_trade(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, FetchError> {
        let url = self.endpoint("general")?;
        let body = payload::general_request(query);
        debug!("POST {} {} {}..{}", url, query.flow, query.from, query.to);
        let text = self.http.post_json(&url, &body).await?;
        let records = payload::parse_general_response(&text)?;
        info!("{} {} {}..{}: {} records", query.ncm, query.flow, query.from, query.to, records.len());
        Ok(records)
    }

    async fn fetch_description(&self, ncm: &NcmCode) -> Result<String, FetchError> {
        let url = self.endpoint(&format!("tables/ncm/{}", ncm))?;
        let text = self.http.get_text(&url).await?;
        payload::parse_description_response(&text, ncm.as_str())
    }

    async fn fetch_last_update(&self) -> Result<LastUpdate, FetchError> {
        let url = self.endpoint("general/dates/updated")?;
        let text = self.http.get_text(&url).await?;
        let update = payload::parse_update_response(&text)?;
        info!("statistics published through {} (updated {})", update.through(), update.updated);
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> NcmCode {
        NcmCode::parse("39269090").unwrap()
    }

    #[test]
    fn test_cache_keys_distinguish_queries() {
        let a = TradeQuery::partial_year(code(), FlowDirection::Export, 2024, 6);
        let b = TradeQuery::by_country(code(), FlowDirection::Export, 2024, 6);
        let c = TradeQuery::partial_year(code(), FlowDirection::Import, 2024, 6);
        assert_eq!(a.cache_key(), "trade:39269090:export:2024-01:2024-06:total:all");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }

    #[test]
    fn test_endpoints_join_under_base() {
        let config = ApiConfig {
            base_url: "https://api.example.test/v1".into(),
            ..ApiConfig::default()
        };
        let client = ComexClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint("general/dates/updated").unwrap().as_str(),
            "https://api.example.test/v1/general/dates/updated"
        );
        assert_eq!(
            client.endpoint("tables/ncm/39269090").unwrap().as_str(),
            "https://api.example.test/v1/tables/ncm/39269090"
        );
    }

    #[test]
    fn test_history_window() {
        let q = TradeQuery::history(code(), FlowDirection::Import, 2004, YearMonth::new(2025, 6));
        assert_eq!(q.from, YearMonth::new(2004, 1));
        assert_eq!(q.to, YearMonth::new(2025, 6));
        assert!(!q.month_detail);
    }
}
