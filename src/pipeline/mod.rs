//! Pipeline orchestrator: ties the statistics source → core → storage together.
//!
//! ## Run modes
//!
//! `analyze_one()` — fetch, analyze and persist a single code.
//!
//! `run()` — batch mode over a reconciled working set:
//!   1. Resolve the reference period from the API's last publication date
//!   2. Analyze every code, at most `pipeline.concurrency` at a time
//!   3. Upsert every summary row into trade_summaries
//!   Idempotent: re-running on unchanged upstream data rewrites the same rows.

pub mod report;

pub use report::{AnalysisReport, FetchedFlows, FlowPair, ReferencePeriod, build_report};

use crate::cache::{CacheTtls, CachedSource, MemoryCache};
use crate::comex::{ComexClient, TradeDataSource, TradeQuery};
use crate::config::{AppConfig, PipelineConfig};
use crate::error::FetchError;
use crate::models::{CountryShare, FlowDirection, NcmCode, RollingPoint, YearMonth};
use crate::processing::MetricsCalculator;
use crate::processing::breakdown::country_shares;
use crate::processing::normalize;
use crate::processing::rolling::{Metric, rolling_sum};
use crate::storage::Repository;
use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub type SharedSource = Arc<dyn TradeDataSource>;

// ── Analyzer ──────────────────────────────────────────────────────────────────

/// Fetches what one code needs and hands it to the pure core.
pub struct Analyzer<S> {
    source: S,
    calc: MetricsCalculator,
    history_from_year: i32,
    rolling_window: usize,
}

impl<S: TradeDataSource> Analyzer<S> {
    pub fn new(source: S, config: &PipelineConfig) -> Self {
        Self {
            source,
            calc: MetricsCalculator::new(config.price_unit),
            history_from_year: config.history_from_year,
            rolling_window: config.rolling_window_months,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reference period from the last publication, or the last complete
    /// calendar month if the API cannot tell.
    pub async fn reference(&self) -> ReferencePeriod {
        match self.source.fetch_last_update().await {
            Ok(update) => ReferencePeriod::from_update(&update),
            Err(e) => {
                let fallback = ReferencePeriod::fallback(Local::now().date_naive());
                warn!("last update unavailable ({}), assuming data through {}", e, fallback.through());
                fallback
            }
        }
    }

    async fn fetch_pair(&self, export: TradeQuery, import: TradeQuery) -> FlowPair {
        let (export, import) = tokio::join!(self.source.fetch_trade(&export), self.source.fetch_trade(&import));
        FlowPair { export, import }
    }

    /// The six queries of one code, concurrently.
    pub async fn fetch(&self, ncm: &NcmCode, reference: &ReferencePeriod) -> FetchedFlows {
        let history = |flow| TradeQuery::history(ncm.clone(), flow, self.history_from_year, reference.through());
        let partial = |flow, year| TradeQuery::partial_year(ncm.clone(), flow, year, reference.through_month);

        let (history, previous, current) = tokio::join!(
            self.fetch_pair(history(FlowDirection::Export), history(FlowDirection::Import)),
            self.fetch_pair(
                partial(FlowDirection::Export, reference.previous_year),
                partial(FlowDirection::Import, reference.previous_year),
            ),
            self.fetch_pair(
                partial(FlowDirection::Export, reference.current_year),
                partial(FlowDirection::Import, reference.current_year),
            ),
        );
        FetchedFlows { history, previous, current }
    }

    pub async fn analyze(&self, ncm: &NcmCode, reference: &ReferencePeriod) -> AnalysisReport {
        let (fetched, description) = tokio::join!(self.fetch(ncm, reference), self.source.fetch_description(ncm));
        let mut report = build_report(ncm, *reference, &fetched, &self.calc);
        match description {
            Ok(text) => report.description = Some(text),
            Err(e) => warn!("{}: no description ({})", ncm, e),
        }
        report
    }

    /// FOB share per partner country over the current year's window.
    pub async fn breakdown(
        &self,
        ncm: &NcmCode,
        flow: FlowDirection,
        reference: &ReferencePeriod,
    ) -> Result<Vec<CountryShare>, FetchError> {
        let query = TradeQuery::by_country(ncm.clone(), flow, reference.current_year, reference.through_month);
        let records = self.source.fetch_trade(&query).await?;
        Ok(country_shares(&records))
    }

    /// Trailing sums over the configured window, monthly since the first
    /// history year.
    pub async fn rolling(
        &self,
        ncm: &NcmCode,
        flow: FlowDirection,
        metric: Metric,
        reference: &ReferencePeriod,
    ) -> Result<Vec<RollingPoint>, FetchError> {
        let query = TradeQuery::monthly(
            ncm.clone(),
            flow,
            YearMonth::new(self.history_from_year, 1),
            reference.through(),
        );
        let records = self.source.fetch_trade(&query).await?;
        let batch = normalize(flow, &records);
        Ok(rolling_sum(&batch.fragments, flow, metric, self.rolling_window))
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: AppConfig,
    repo: Arc<Repository>,
    analyzer: Arc<Analyzer<SharedSource>>,
}

impl Pipeline {
    /// Open storage and build the API client, wrapped in the configured cache.
    pub fn connect(config: AppConfig) -> Result<Self> {
        let repo = Arc::new(
            Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?,
        );
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let client = ComexClient::new(&config.api).context("Failed to build API client")?;
        let ttls = CacheTtls::from(&config.cache);
        let source: SharedSource = if config.cache.persistent {
            Arc::new(CachedSource::new(client, Arc::clone(&repo), ttls))
        } else {
            Arc::new(CachedSource::new(client, MemoryCache::new(), ttls))
        };

        Ok(Self::from_parts(config, source, repo))
    }

    pub fn from_parts(config: AppConfig, source: SharedSource, repo: Arc<Repository>) -> Self {
        let analyzer = Arc::new(Analyzer::new(source, &config.pipeline));
        Self { config, repo, analyzer }
    }

    pub fn analyzer(&self) -> &Analyzer<SharedSource> {
        &self.analyzer
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn persist(repo: &Repository, report: &AnalysisReport) -> Result<usize> {
        let n = repo.upsert_summaries(&report.ncm, &report.summaries())?;
        if let Some(desc) = &report.description {
            repo.set_description(&report.ncm, desc)?;
        }
        Ok(n)
    }

    pub async fn analyze_one(&self, ncm: &NcmCode) -> Result<AnalysisReport> {
        let reference = self.analyzer.reference().await;
        let report = self.analyzer.analyze(ncm, &reference).await;
        let n = Self::persist(&self.repo, &report)
            .with_context(|| format!("store summaries of {}", ncm))?;
        info!("{}: {} summary rows stored", ncm, n);
        Ok(report)
    }

    pub async fn run(&self, codes: &[NcmCode]) -> Result<PipelineStats> {
        let run_id = self.repo.begin_run().unwrap_or(0);
        let reference = self.analyzer.reference().await;

        info!(
            "=== Analyzing {} codes: {} vs {} through month {} ===",
            codes.len(),
            reference.previous_year,
            reference.current_year,
            reference.through_month
        );

        let sem = Arc::new(Semaphore::new(self.config.pipeline.concurrency.max(1)));
        let mut handles = Vec::new();

        for ncm in codes {
            let ncm = ncm.clone();
            let analyzer = Arc::clone(&self.analyzer);
            let repo = Arc::clone(&self.repo);
            let sem = Arc::clone(&sem);
            let task_ncm = ncm.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;

                let report = analyzer.analyze(&task_ncm, &reference).await;
                let n = Self::persist(&repo, &report)
                    .with_context(|| format!("store summaries of {}", task_ncm))?;

                info!("{}: {} rows ({} years, {} issues)", task_ncm, n, report.history.len(), report.issues);
                Ok::<(usize, bool, bool), anyhow::Error>((n, report.has_data(), !report.errors.is_empty()))
            });

            handles.push((ncm, handle));
        }

        let mut stats = PipelineStats {
            codes_processed: codes.len(),
            ..PipelineStats::default()
        };

        for (ncm, handle) in handles {
            match handle.await {
                Ok(Ok((n, has_data, upstream))) => {
                    stats.rows_written += n;
                    if !has_data {
                        stats.no_data += 1;
                    }
                    if upstream {
                        stats.upstream_errors += 1;
                    }
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", ncm, e);
                    stats.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", ncm, e);
                    stats.errors += 1;
                }
            }
        }

        let failure = (stats.errors > 0).then(|| format!("{} errors", stats.errors));
        self.repo
            .finish_run(run_id, stats.codes_processed, stats.rows_written, failure.as_deref())
            .ok();

        let (min_year, max_year) = self.repo.year_range().unwrap_or((None, None));
        info!(
            "=== Done: {} codes | {} rows | {} without data | {} with upstream errors | {} failed | years {:?} → {:?} ===",
            stats.codes_processed,
            stats.rows_written,
            stats.no_data,
            stats.upstream_errors,
            stats.errors,
            min_year,
            max_year,
        );

        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub codes_processed: usize,
    pub rows_written: usize,
    pub no_data: usize,
    pub upstream_errors: usize,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LastUpdate, Period, TradeRecord};
    use async_trait::async_trait;
    use serde_json::json;

    /// Serves the end-to-end scenario: 2023 exports 1000/100 and imports 400/50.
    struct ScenarioSource;

    #[async_trait]
    impl TradeDataSource for ScenarioSource {
        async fn fetch_trade(&self, q: &TradeQuery) -> Result<Vec<TradeRecord>, FetchError> {
            if q.ncm.as_str() == "00000000" {
                return Err(FetchError::Status { status: 500, url: "general".into() });
            }
            let v = match (q.flow, q.by_country, q.month_detail) {
                (FlowDirection::Export, true, _) => json!([
                    {"country": "China", "metricFOB": "300"},
                    {"country": "Chile", "metricFOB": "100"}
                ]),
                (FlowDirection::Import, false, true) => json!([
                    {"year": "2023", "monthNumber": "01", "metricKG": "10"},
                    {"year": "2023", "monthNumber": "02", "metricKG": "20"},
                    {"year": "2023", "monthNumber": "03", "metricKG": "30"}
                ]),
                (FlowDirection::Export, false, false) if q.from.year == 2023 => {
                    json!([{"year": "2023", "metricFOB": "1000", "metricKG": "100"}])
                }
                (FlowDirection::Import, false, false) if q.from.year == 2023 => {
                    json!([{"year": "2023", "metricFOB": "400", "metricKG": "50"}])
                }
                (FlowDirection::Export, false, false) => json!([
                    {"year": "2023", "metricFOB": "1000", "metricKG": "100"},
                    {"year": "2024", "metricFOB": "1500", "metricKG": "100"}
                ]),
                (FlowDirection::Import, false, false) => json!([
                    {"year": 2023, "metricFOB": 400, "metricKG": 50}
                ]),
                _ => json!([]),
            };
            Ok(serde_json::from_value(v)?)
        }

        async fn fetch_description(&self, _ncm: &NcmCode) -> Result<String, FetchError> {
            Ok("Outras obras de plásticos".into())
        }

        async fn fetch_last_update(&self) -> Result<LastUpdate, FetchError> {
            Ok(LastUpdate { updated: "2024-07-04".into(), year: 2024, month: 6 })
        }
    }

    fn code() -> NcmCode {
        NcmCode::parse("3926.90.90").unwrap()
    }

    fn pipeline() -> Pipeline {
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        repo.run_migrations().unwrap();
        Pipeline::from_parts(AppConfig::default(), Arc::new(ScenarioSource), repo)
    }

    #[tokio::test]
    async fn test_analyze_one_persists_summaries() {
        let p = pipeline();
        let report = p.analyze_one(&code()).await.unwrap();

        assert_eq!(report.reference, ReferencePeriod::new(2024, 6));
        assert_eq!(report.description.as_deref(), Some("Outras obras de plásticos"));
        let y2023 = &report.history[0];
        assert_eq!(y2023.trade_balance_fob, 600.0);
        assert_eq!(y2023.avg_price_export, 10.0);
        assert_eq!(y2023.avg_price_import, 8.0);
        // 2024 is published through June only
        assert!(report.year_over_year[1].partial);
        assert_eq!(report.year_over_year[1].export.fob_pct, None);
        assert_eq!(
            report.previous.period(),
            Period::PartialYear { year: 2023, from_month: 1, to_month: 6 }
        );

        let stored = p.repository().summaries_for(&code()).unwrap();
        assert_eq!(stored.len(), report.summaries().len());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let p = pipeline();
        let first = p.analyze_one(&code()).await.unwrap();
        let before = p.repository().summaries_for(&code()).unwrap();
        let second = p.analyze_one(&code()).await.unwrap();
        let after = p.repository().summaries_for(&code()).unwrap();
        assert_eq!(first, second);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_batch_run_counts_failures_as_upstream_errors() {
        let p = pipeline();
        let codes = vec![code(), NcmCode::parse("00000000").unwrap()];
        let stats = p.run(&codes).await.unwrap();
        assert_eq!(stats.codes_processed, 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.no_data, 1);
        assert_eq!(stats.upstream_errors, 1);
        assert!(stats.rows_written > 0);
        assert_eq!(p.repository().counts().unwrap().runs, 1);
    }

    #[tokio::test]
    async fn test_breakdown_and_rolling() {
        let p = pipeline();
        let reference = p.analyzer().reference().await;

        let shares = p.analyzer().breakdown(&code(), FlowDirection::Export, &reference).await.unwrap();
        assert_eq!(shares[0].country, "China");
        assert_eq!(shares[0].share_pct, 75.0);

        let config = PipelineConfig { rolling_window_months: 2, ..PipelineConfig::default() };
        let analyzer = Analyzer::new(ScenarioSource, &config);
        let points = analyzer.rolling(&code(), FlowDirection::Import, Metric::Kg, &reference).await.unwrap();
        let sums: Vec<f64> = points.iter().map(|p| p.window_sum).collect();
        assert_eq!(sums, vec![30.0, 50.0]);
    }
}
