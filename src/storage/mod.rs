use crate::cache::ResponseCache;
use crate::models::{AggregatedRow, NcmCode, Period, PriceUnit};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS trade_summaries (
    ncm               VARCHAR  NOT NULL,
    period_label      VARCHAR  NOT NULL,
    price_unit        VARCHAR  NOT NULL,
    year              INTEGER  NOT NULL,
    -- NULL for full years
    from_month        INTEGER,
    to_month          INTEGER,
    export_fob        DOUBLE   NOT NULL,
    export_kg         DOUBLE   NOT NULL,
    import_fob        DOUBLE   NOT NULL,
    import_kg         DOUBLE   NOT NULL,
    import_freight    DOUBLE   NOT NULL,
    import_insurance  DOUBLE   NOT NULL,
    import_cif        DOUBLE   NOT NULL,
    trade_balance_fob DOUBLE   NOT NULL,
    trade_balance_kg  DOUBLE   NOT NULL,
    avg_price_export  DOUBLE   NOT NULL,
    avg_price_import  DOUBLE   NOT NULL,
    computed_at       TIMESTAMP NOT NULL,
    PRIMARY KEY (ncm, period_label, price_unit)
);

CREATE TABLE IF NOT EXISTS ncm_codes (
    ncm          VARCHAR PRIMARY KEY,
    description  VARCHAR,
    source       VARCHAR NOT NULL,
    added_at     TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS seq_analysis_runs START 1;

CREATE TABLE IF NOT EXISTS analysis_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_analysis_runs'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    codes_processed INTEGER DEFAULT 0,
    rows_written    INTEGER DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS fetch_cache (
    cache_key   VARCHAR PRIMARY KEY,
    body        VARCHAR NOT NULL,
    expires_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_summaries_year ON trade_summaries (year);
CREATE INDEX IF NOT EXISTS idx_cache_expiry   ON fetch_cache (expires_at);
"#;

/// Row counts shown by `stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub summaries: i64,
    pub codes: i64,
    pub runs: i64,
    pub cache_entries: i64,
}

/// A persisted summary with the code it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub ncm: NcmCode,
    pub row: AggregatedRow,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("DuckDB connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Summaries ─────────────────────────────────────────────────────────────

    /// Upsert summaries of one code. Re-running on the same data leaves the
    /// table unchanged apart from `computed_at`.
    pub fn upsert_summaries(&self, ncm: &NcmCode, rows: &[AggregatedRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO trade_summaries
                (ncm, period_label, price_unit, year, from_month, to_month,
                 export_fob, export_kg, import_fob, import_kg,
                 import_freight, import_insurance, import_cif,
                 trade_balance_fob, trade_balance_kg, avg_price_export, avg_price_import,
                 computed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (ncm, period_label, price_unit) DO UPDATE SET
                export_fob        = excluded.export_fob,
                export_kg         = excluded.export_kg,
                import_fob        = excluded.import_fob,
                import_kg         = excluded.import_kg,
                import_freight    = excluded.import_freight,
                import_insurance  = excluded.import_insurance,
                import_cif        = excluded.import_cif,
                trade_balance_fob = excluded.trade_balance_fob,
                trade_balance_kg  = excluded.trade_balance_kg,
                avg_price_export  = excluded.avg_price_export,
                avg_price_import  = excluded.avg_price_import,
                computed_at       = excluded.computed_at
        "#;

        let now = Utc::now().naive_utc();
        for row in rows {
            let (from_month, to_month) = match row.period.months() {
                Some((f, t)) => (Some(f as i32), Some(t as i32)),
                None => (None, None),
            };
            tx.execute(
                sql,
                params![
                    ncm.as_str(),
                    row.period.to_string(),
                    row.price_unit.as_str(),
                    row.period.year(),
                    from_month,
                    to_month,
                    row.export_fob,
                    row.export_kg,
                    row.import_fob,
                    row.import_kg,
                    row.import_freight,
                    row.import_insurance,
                    row.import_cif,
                    row.trade_balance_fob,
                    row.trade_balance_kg,
                    row.avg_price_export,
                    row.avg_price_import,
                    now,
                ],
            )
            .with_context(|| format!("upsert summary {} {}", ncm, row.period))?;
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Stored summaries of one code, full years first then partial windows,
    /// each by year.
    pub fn summaries_for(&self, ncm: &NcmCode) -> Result<Vec<StoredSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT year, from_month, to_month, price_unit,
                      export_fob, export_kg, import_fob, import_kg,
                      import_freight, import_insurance, import_cif,
                      trade_balance_fob, trade_balance_kg, avg_price_export, avg_price_import
               FROM trade_summaries
               WHERE ncm = ?
               ORDER BY from_month IS NOT NULL, year, price_unit"#,
        )?;

        type Raw = (i32, Option<i32>, Option<i32>, String, [f64; 11]);
        let raw: Vec<Raw> = stmt
            .query_map(params![ncm.as_str()], |r| {
                let mut metrics = [0.0; 11];
                for (i, slot) in metrics.iter_mut().enumerate() {
                    *slot = r.get(4 + i)?;
                }
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, metrics))
            })?
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("read summaries for {}", ncm))?;

        raw.into_iter()
            .map(|(year, from, to, unit, m)| -> Result<StoredSummary> {
                let period = match (from, to) {
                    (Some(f), Some(t)) => Period::PartialYear {
                        year,
                        from_month: u32::try_from(f)?,
                        to_month: u32::try_from(t)?,
                    },
                    _ => Period::Year(year),
                };
                let price_unit: PriceUnit = unit.parse().map_err(anyhow::Error::msg)?;
                Ok(StoredSummary {
                    ncm: ncm.clone(),
                    row: AggregatedRow {
                        period,
                        export_fob: m[0],
                        export_kg: m[1],
                        import_fob: m[2],
                        import_kg: m[3],
                        import_freight: m[4],
                        import_insurance: m[5],
                        import_cif: m[6],
                        trade_balance_fob: m[7],
                        trade_balance_kg: m[8],
                        avg_price_export: m[9],
                        avg_price_import: m[10],
                        price_unit,
                    },
                })
            })
            .collect()
    }

    // ── Codes ─────────────────────────────────────────────────────────────────

    pub fn upsert_codes(&self, codes: &[NcmCode], source: &str) -> Result<usize> {
        if codes.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        for code in codes {
            tx.execute(
                r#"INSERT INTO ncm_codes (ncm, source, added_at) VALUES (?, ?, ?)
                   ON CONFLICT (ncm) DO UPDATE SET source = excluded.source"#,
                params![code.as_str(), source, now],
            )
            .with_context(|| format!("upsert code {}", code))?;
        }
        tx.commit()?;
        Ok(codes.len())
    }

    pub fn set_description(&self, code: &NcmCode, description: &str) -> Result<()> {
        self.conn()?.execute(
            r#"INSERT INTO ncm_codes (ncm, description, source, added_at) VALUES (?, ?, 'api', ?)
               ON CONFLICT (ncm) DO UPDATE SET description = excluded.description"#,
            params![code.as_str(), description, Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    /// Stored codes with their description, ascending.
    pub fn list_codes(&self) -> Result<Vec<(NcmCode, Option<String>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT ncm, description FROM ncm_codes ORDER BY ncm")?;
        let rows: Vec<(String, Option<String>)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<std::result::Result<_, _>>()
            .context("read ncm_codes")?;
        Ok(rows
            .into_iter()
            .filter_map(|(raw, desc)| NcmCode::parse(&raw).map(|c| (c, desc)))
            .collect())
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<i64> {
            let mut s = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
            Ok(s.query_row([], |r| r.get(0))?)
        };
        Ok(StoreCounts {
            summaries: count("trade_summaries")?,
            codes: count("ncm_codes")?,
            runs: count("analysis_runs")?,
            cache_entries: count("fetch_cache")?,
        })
    }

    pub fn year_range(&self) -> Result<(Option<i32>, Option<i32>)> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT MIN(year), MAX(year) FROM trade_summaries")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Analysis run log ──────────────────────────────────────────────────────

    pub fn begin_run(&self) -> Result<i64> {
        let id: i64 = self.conn()?.query_row(
            "INSERT INTO analysis_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_run(&self, run_id: i64, codes: usize, rows: usize, error: Option<&str>) -> Result<()> {
        self.conn()?.execute(
            r#"UPDATE analysis_runs SET
               finished_at = ?, status = ?,
               codes_processed = ?, rows_written = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                codes as i64,
                rows as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    // ── Response cache ────────────────────────────────────────────────────────

    pub fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT body FROM fetch_cache WHERE cache_key = ? AND expires_at > ?")?;
        let mut rows = stmt.query(params![key, Utc::now().naive_utc()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn cache_put(&self, key: &str, body: &str, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl).context("cache ttl out of range")?;
        let expires_at: NaiveDateTime = Utc::now().naive_utc() + ttl;
        self.conn()?.execute(
            r#"INSERT INTO fetch_cache (cache_key, body, expires_at) VALUES (?, ?, ?)
               ON CONFLICT (cache_key) DO UPDATE SET body = excluded.body, expires_at = excluded.expires_at"#,
            params![key, body, expires_at],
        )?;
        Ok(())
    }

    pub fn cache_clear(&self) -> Result<usize> {
        Ok(self.conn()?.execute("DELETE FROM fetch_cache", [])?)
    }

    pub fn cache_purge_expired(&self) -> Result<usize> {
        let n = self.conn()?.execute(
            "DELETE FROM fetch_cache WHERE expires_at <= ?",
            params![Utc::now().naive_utc()],
        )?;
        debug!("purged {} expired cache entries", n);
        Ok(n)
    }
}

#[async_trait]
impl ResponseCache for Repository {
    async fn get(&self, key: &str) -> Option<String> {
        self.cache_get(key).unwrap_or_else(|e| {
            warn!("cache read {} failed: {:#}", key, e);
            None
        })
    }

    async fn put(&self, key: &str, body: String, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.cache_put(key, &body, ttl) {
            warn!("cache write {} failed: {:#}", key, e);
        }
    }

    async fn clear(&self) {
        if let Err(e) = self.cache_clear() {
            warn!("cache clear failed: {:#}", e);
        }
    }
}
