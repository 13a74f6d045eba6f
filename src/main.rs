use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ncm_trade_engine::comex::TradeDataSource;
use ncm_trade_engine::config::AppConfig;
use ncm_trade_engine::loader::{load_document, load_registry};
use ncm_trade_engine::models::{AggregatedRow, FlowDirection, NcmCode, PriceUnit};
use ncm_trade_engine::pipeline::{AnalysisReport, Pipeline};
use ncm_trade_engine::processing::rolling::Metric;
use ncm_trade_engine::processing::{PartialOutcome, reconcile};
use ncm_trade_engine::storage::Repository;
use ncm_trade_engine::utils::{self, fmt_amount, fmt_number, fmt_pct};

#[derive(Parser)]
#[command(name = "ncm-trade-engine", about = "NCM foreign trade statistics", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, aggregate and store statistics (all stored codes if none given)
    Analyze {
        codes: Vec<String>,

        /// Price unit override: kg or ton
        #[arg(long)]
        unit: Option<PriceUnit>,
    },

    /// Intersect registry codes with the codes cited in a document
    Reconcile {
        /// Registry CSV file or directory of CSV sheets
        #[arg(short, long)]
        registry: PathBuf,

        /// Extracted text of the tariff document
        #[arg(short, long)]
        document: PathBuf,

        /// Only print the result, do not store the working set
        #[arg(long)]
        dry_run: bool,
    },

    /// Show description and registry ownership of a code
    Lookup {
        code: String,

        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// FOB per partner country for the current year's window
    Breakdown {
        code: String,

        #[arg(short, long, default_value = "import")]
        flow: FlowDirection,
    },

    /// Trailing monthly sums
    Rolling {
        code: String,

        #[arg(short, long, default_value = "import")]
        flow: FlowDirection,

        #[arg(short, long, default_value = "kg")]
        metric: Metric,
    },

    /// Latest period published by the statistics API
    Updated,

    /// Print stored summaries of a code
    Summaries { code: String },

    /// Show database statistics
    Stats,

    /// Apply schema migrations
    Migrate,

    /// Drop every cached API response
    ClearCache,
}

fn parse_code(raw: &str) -> Result<NcmCode> {
    raw.parse::<NcmCode>().map_err(anyhow::Error::msg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "ncm_trade_engine=info,warn",
        1 => "ncm_trade_engine=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Analyze { codes, unit } => {
            if let Some(unit) = unit {
                config.pipeline.price_unit = unit;
            }
            let _t = utils::Timer::start("Analysis");
            let pipeline = Pipeline::connect(config)?;

            let codes: Vec<NcmCode> = if codes.is_empty() {
                pipeline.repository().list_codes()?.into_iter().map(|(c, _)| c).collect()
            } else {
                codes.iter().map(|c| parse_code(c)).collect::<Result<_>>()?
            };

            match codes.as_slice() {
                [] => println!("No codes — pass codes or run `ncm-trade-engine reconcile` first."),
                [one] => {
                    let report = pipeline.analyze_one(one).await?;
                    print_report(&report);
                }
                many => {
                    let stats = pipeline.run(many).await?;
                    info!(
                        "Done: {} codes, {} rows, {} without data, {} failed",
                        stats.codes_processed, stats.rows_written, stats.no_data, stats.errors
                    );
                }
            }
        }

        Command::Reconcile { registry, document, dry_run } => {
            let _t = utils::Timer::start("Reconciliation");
            let reg = load_registry(&registry, &config.registry.main_sheet)
                .with_context(|| format!("Failed to load registry {:?}", registry))?;
            let cited = load_document(&document)?;

            let result = reconcile(reg.codes().map(|c| c.as_str()), &cited);
            println!(
                "{} registry codes ({} rows dropped) × {} document codes ({} dropped) → {} in common",
                result.normalized_a,
                reg.dropped,
                result.normalized_b,
                result.dropped_b,
                result.codes.len()
            );
            for code in &result.codes {
                println!("  {}", code.dotted());
            }

            if !dry_run {
                let repo = Repository::open(&config.storage.db_path)?;
                repo.run_migrations()?;
                repo.upsert_codes(&result.codes, "reconcile")?;
                info!("{} codes stored", result.codes.len());
            }
        }

        Command::Lookup { code, registry } => {
            let ncm = parse_code(&code)?;
            let pipeline = Pipeline::connect(config.clone())?;
            match pipeline.analyzer().source().fetch_description(&ncm).await {
                Ok(text) => println!("{}  {}", ncm.dotted(), text),
                Err(e) => println!("{}  (no description: {})", ncm.dotted(), e),
            }

            if let Some(path) = registry {
                let reg = load_registry(&path, &config.registry.main_sheet)?;
                let hit = reg.lookup(&ncm);
                if hit.is_empty() {
                    println!("  not in registry");
                }
                for row in hit.main.iter().chain(hit.entities.iter()) {
                    let fields: Vec<String> = row.fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                    println!("  [{}] {}", row.sheet, fields.join(" | "));
                }
            }
        }

        Command::Breakdown { code, flow } => {
            let ncm = parse_code(&code)?;
            let pipeline = Pipeline::connect(config)?;
            let reference = pipeline.analyzer().reference().await;
            let shares = pipeline.analyzer().breakdown(&ncm, flow, &reference).await?;
            println!("{} {} by country, {} Jan-{:02}", ncm.dotted(), flow, reference.current_year, reference.through_month);
            if shares.is_empty() {
                println!("  no data");
            }
            for s in &shares {
                println!("  {:<30} {:>20}  {:>6.2}%", s.country, fmt_amount(s.fob, 0), s.share_pct);
            }
        }

        Command::Rolling { code, flow, metric } => {
            let ncm = parse_code(&code)?;
            let window = config.pipeline.rolling_window_months;
            let pipeline = Pipeline::connect(config)?;
            let reference = pipeline.analyzer().reference().await;
            let points = pipeline.analyzer().rolling(&ncm, flow, metric, &reference).await?;
            println!("{} {} {} — trailing {} months", ncm.dotted(), flow, metric, window);
            for p in &points {
                println!("  {}-{:02}  {:>20}", p.year, p.month, fmt_amount(p.window_sum, 0));
            }
        }

        Command::Updated => {
            let pipeline = Pipeline::connect(config)?;
            let update = pipeline.analyzer().source().fetch_last_update().await?;
            println!("Updated {} — data through {}", update.updated, update.through());
        }

        Command::Summaries { code } => {
            let ncm = parse_code(&code)?;
            let repo = Repository::open(&config.storage.db_path)?;
            let stored = repo.summaries_for(&ncm)?;
            if stored.is_empty() {
                println!("No summaries for {} — run `ncm-trade-engine analyze {}` first.", ncm.dotted(), ncm);
            } else {
                let rows: Vec<AggregatedRow> = stored.into_iter().map(|s| s.row).collect();
                print_rows(&rows);
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let counts = repo.counts()?;
            let (min, max) = repo.year_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  NCM Trade Engine — Database Stats");
            println!("─────────────────────────────────");
            println!("  Codes     : {}", fmt_number(counts.codes));
            println!("  Summaries : {}", fmt_number(counts.summaries));
            println!("  Runs      : {}", fmt_number(counts.runs));
            println!("  Cached    : {}", fmt_number(counts.cache_entries));
            println!("  From      : {}", min.map(|y| y.to_string()).unwrap_or("—".into()));
            println!("  To        : {}", max.map(|y| y.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::ClearCache => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let n = repo.cache_clear()?;
            println!("{} cached responses removed.", n);
        }
    }

    Ok(())
}

fn print_rows(rows: &[AggregatedRow]) {
    let Some(unit) = rows.first().map(|r| r.price_unit) else {
        return;
    };
    println!(
        "  {:<16} {:>18} {:>14} {:>18} {:>14} {:>18} {:>12} {:>12}",
        "Period", "Export FOB", "Export KG", "Import FOB", "Import KG", "Balance FOB",
        format!("Exp {}", unit.label()), format!("Imp {}", unit.label()),
    );
    for r in rows {
        println!(
            "  {:<16} {:>18} {:>14} {:>18} {:>14} {:>18} {:>12} {:>12}",
            r.period.to_string(),
            fmt_amount(r.export_fob, 0),
            fmt_amount(r.export_kg, 0),
            fmt_amount(r.import_fob, 0),
            fmt_amount(r.import_kg, 0),
            fmt_amount(r.trade_balance_fob, 0),
            fmt_amount(r.avg_price_export, 2),
            fmt_amount(r.avg_price_import, 2),
        );
    }
}

fn print_partial(outcome: &PartialOutcome) {
    match outcome {
        PartialOutcome::Summary(row) => print_rows(std::slice::from_ref(row)),
        PartialOutcome::InsufficientData { period } => println!("  {:<16} insufficient data", period.to_string()),
    }
}

fn print_report(report: &AnalysisReport) {
    println!("═════════════════════════════════");
    println!(
        "  {}  {}",
        report.ncm.dotted(),
        report.description.as_deref().unwrap_or("(no description)")
    );
    println!("═════════════════════════════════");

    if report.history.is_empty() {
        println!("  No history ({:?})", report.history_coverage);
    } else {
        print_rows(&report.history);
    }

    println!();
    println!("  Year over year:");
    for y in report.year_over_year.iter().skip(1) {
        if y.partial {
            println!("  {:<16} open year, see the same-months comparison below", y.period.to_string());
            continue;
        }
        println!(
            "  {:<16} export FOB {:>9}  import FOB {:>9}  export price {:>9}  import price {:>9}",
            y.period.to_string(),
            fmt_pct(y.export.fob_pct),
            fmt_pct(y.import.fob_pct),
            fmt_pct(y.export.price_pct),
            fmt_pct(y.import.price_pct),
        );
    }

    println!();
    println!("  Same months, {} vs {}:", report.reference.previous_year, report.reference.current_year);
    print_partial(&report.previous);
    print_partial(&report.current);
    if let Some(cmp) = &report.comparison {
        println!(
            "  export FOB {}  import FOB {}  balance Δ {}",
            fmt_pct(cmp.export.fob_pct),
            fmt_pct(cmp.import.fob_pct),
            fmt_amount(cmp.balance_fob_delta, 0),
        );
    }

    if report.issues > 0 {
        println!("  {} values coerced or records dropped", report.issues);
    }
    for e in &report.errors {
        println!("  upstream error: {}", e);
    }
}
