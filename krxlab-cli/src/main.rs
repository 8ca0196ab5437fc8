//! krxlab CLI: sync, count, table and cache commands.
//!
//! Commands:
//! - `sync masters|prices|trends` fetch from KRX and append what the store lacks
//! - `count <table>` count stored rows, optionally by date range and code
//! - `table show <name>` read a cached table through the table cache
//! - `cache status` / `cache clear <name>` inspect or drop Parquet snapshots
//! - `config show` print the effective configuration and connection target

mod logging;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use krxlab_core::calendar::{end_of_day, krx_first_day, start_of_day};
use krxlab_core::data::{
    BreakerState, CircuitBreaker, KrxClient, KrxMasterSource, KrxPriceSource, KrxTrendSource,
};
use krxlab_core::domain::{DailyPrice, InvestorTrend, StockMaster};
use krxlab_core::table::registry::lock;
use krxlab_core::table::{
    descriptor_by_name, Filter, TableFiles, TableRegistry, ALL_TABLES, STOCK_MASTER,
};
use krxlab_core::SyncUnit;
use krxlab_runner::{
    sync_range, sync_unit, BatchReport, Config, ConnectionProvider, MasterJob, PoolConfig,
    PriceJob, Query, Store, StoredRecord, SyncJob, TrendJob, WorkerPool,
};

use logging::{init_logging, LogFormat};

#[derive(Parser)]
#[command(name = "krxlab", about = "krxlab CLI: KRX stock data sync and cached tables")]
struct Cli {
    /// Path to krxlab.toml. Defaults to ./krxlab.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database target name from the config. Overrides KRXLAB_TARGET.
    /// Read from the process arguments by the connection provider.
    #[arg(long, global = true)]
    target: Option<String>,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch remote data and append rows missing from the store.
    Sync {
        #[command(subcommand)]
        table: SyncTable,
    },
    /// Count stored rows of a table.
    Count {
        /// stock_master, stock_daily_price or stock_trend.
        table: String,

        /// First day (YYYY-MM-DD), inclusive.
        #[arg(long)]
        start: Option<String>,

        /// Last day (YYYY-MM-DD), inclusive through 23:59:59.
        #[arg(long)]
        end: Option<String>,

        /// Standard instrument code.
        #[arg(long)]
        code: Option<String>,
    },
    /// Cached table commands.
    Table {
        #[command(subcommand)]
        action: TableAction,
    },
    /// Snapshot cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SyncTable {
    /// Listed and delisted instruments. Rewrites the stock_master flat file on change.
    Masters,
    /// Daily prices for every business day in the range.
    Prices(RangeArgs),
    /// Investor trends for every business day in the range.
    Trends(RangeArgs),
}

#[derive(Args)]
struct RangeArgs {
    /// Single day (YYYY-MM-DD). Conflicts with --start/--end.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    date: Option<String>,

    /// First day (YYYY-MM-DD). Defaults to 1995-05-02.
    #[arg(long)]
    start: Option<String>,

    /// Last day (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Worker threads. Overrides [sync].workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Batch deadline in seconds. Overrides [sync].deadline_secs.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand)]
enum TableAction {
    /// Load a table (snapshot, flat file or download) and print matching rows.
    Show {
        name: String,

        #[arg(long)]
        code: Option<String>,

        /// First day (YYYY-MM-DD), inclusive.
        #[arg(long)]
        from: Option<String>,

        /// Last day (YYYY-MM-DD), inclusive through 23:59:59.
        #[arg(long)]
        to: Option<String>,

        /// Rows to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report flat file and snapshot presence per table.
    Status,
    /// Delete a table's snapshot so the next read rebuilds it.
    Clear { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration after file defaults and environment overrides.
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let config = Config::load(cli.config.as_deref())?.with_env_overrides()?;
    config.validate()?;

    let provider = Arc::new(ConnectionProvider::from_config(&config));
    if cli.target.is_some() {
        // Unknown names fail here, before any network work.
        provider.resolve(None)?;
    }

    match cli.command {
        Commands::Sync { table } => run_sync(&config, provider, table),
        Commands::Count {
            table,
            start,
            end,
            code,
        } => run_count(&provider, &table, start, end, code),
        Commands::Table { action } => match action {
            TableAction::Show {
                name,
                code,
                from,
                to,
                limit,
            } => run_table_show(&config, &name, code, from, to, limit),
        },
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
            CacheAction::Clear { name } => run_cache_clear(&config, &name),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => run_config_show(&config, &provider),
        },
    }
}

// ── Sync ──

fn run_sync(config: &Config, provider: Arc<ConnectionProvider>, table: SyncTable) -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::krx_default());
    let client = Arc::new(KrxClient::new(config.krx.to_krx_config(), Arc::clone(&breaker))?);

    let result = match table {
        SyncTable::Masters => {
            let flat = TableFiles::new(&config.data_dir, &STOCK_MASTER);
            let job = MasterJob::new(Arc::new(KrxMasterSource::new(client))).with_flat_file(flat);
            let report = sync_unit(&job, &provider, SyncUnit::Full);
            println!("{}: {report}", StockMaster::TABLE);
            if report.outcome.is_failure() {
                Err(anyhow::anyhow!("master sync failed"))
            } else {
                Ok(())
            }
        }
        SyncTable::Prices(args) => {
            let job = Arc::new(PriceJob::new(Arc::new(KrxPriceSource::new(client))));
            run_batch(config, provider, job, &args)
        }
        SyncTable::Trends(args) => {
            let job = Arc::new(TrendJob::new(Arc::new(KrxTrendSource::new(client))));
            run_batch(config, provider, job, &args)
        }
    };

    match (result, breaker_note(&breaker)) {
        (Err(e), Some(note)) => Err(e.context(note)),
        (result, _) => result,
    }
}

/// Why later requests will be refused, when the breaker has opened.
fn breaker_note(breaker: &CircuitBreaker) -> Option<String> {
    match breaker.state() {
        BreakerState::Closed => None,
        BreakerState::Open { .. } => Some(format!(
            "KRX circuit breaker is open, retry in {}s",
            breaker.remaining_cooldown().as_secs()
        )),
    }
}

fn run_batch<J: SyncJob + 'static>(
    config: &Config,
    provider: Arc<ConnectionProvider>,
    job: Arc<J>,
    args: &RangeArgs,
) -> Result<()> {
    let (start, end) = match &args.date {
        Some(date) => {
            let day = parse_date(date)?;
            (day, day)
        }
        None => (
            parse_optional_date(args.start.as_deref())?.unwrap_or_else(krx_first_day),
            parse_optional_date(args.end.as_deref())?
                .unwrap_or_else(|| chrono::Local::now().date_naive()),
        ),
    };
    if start > end {
        bail!("start {start} is after end {end}");
    }

    let mut pool_config = PoolConfig::from(&config.sync);
    if args.workers.is_some() {
        pool_config.workers = args.workers;
    }
    if let Some(secs) = args.deadline_secs {
        pool_config.deadline = Some(Duration::from_secs(secs));
    }
    let pool = WorkerPool::new(pool_config)?;

    let report = sync_range(job, provider, &pool, start, end)?;
    print_batch(&report);

    if report.failures() > 0 {
        bail!(
            "{} of {} unit(s) failed ({} timed out)",
            report.failures(),
            report.reports.len(),
            report.timed_out()
        );
    }
    Ok(())
}

fn print_batch(report: &BatchReport) {
    for unit in &report.reports {
        println!("  {unit}");
    }
    println!();
    println!("=== {} ===", report.table);
    println!("Units:     {}", report.reports.len());
    println!("Inserted:  {}", report.inserted());
    println!("Failed:    {}", report.failures());
    println!("Timed out: {}", report.timed_out());
    println!("Elapsed:   {:.1}s", report.elapsed.as_secs_f64());
}

// ── Count ──

fn run_count(
    provider: &ConnectionProvider,
    table: &str,
    start: Option<String>,
    end: Option<String>,
    code: Option<String>,
) -> Result<()> {
    let start = parse_optional_date(start.as_deref())?;
    let end = parse_optional_date(end.as_deref())?;

    let mut query = match (start, end) {
        (None, None) => Query::all(),
        (start, end) => Query::between(
            start_of_day(start.unwrap_or_else(krx_first_day)),
            end_of_day(end.unwrap_or_else(|| chrono::Local::now().date_naive())),
        ),
    };
    if let Some(code) = code {
        query = query.code(code);
    }

    let count = match table {
        t if t == StockMaster::TABLE => count_rows::<StockMaster>(provider, &query)?,
        t if t == DailyPrice::TABLE => count_rows::<DailyPrice>(provider, &query)?,
        t if t == InvestorTrend::TABLE => count_rows::<InvestorTrend>(provider, &query)?,
        other => bail!(
            "unknown table '{other}'. Valid: {}, {}, {}",
            StockMaster::TABLE,
            DailyPrice::TABLE,
            InvestorTrend::TABLE
        ),
    };
    println!("{count}");
    Ok(())
}

fn count_rows<R: StoredRecord>(provider: &ConnectionProvider, query: &Query) -> Result<u64> {
    let store = Store::new(provider.get_connection(None)?);
    store.ensure_schema::<R>()?;
    let count = store.count::<R>(query)?;
    store.close()?;
    Ok(count)
}

// ── Table cache ──

fn run_table_show(
    config: &Config,
    name: &str,
    code: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: usize,
) -> Result<()> {
    let descriptor = lookup_table(name)?;

    let mut filter = Filter::new();
    if let Some(code) = code {
        filter = filter.code(code);
    }
    if let Some(from) = parse_optional_date(from.as_deref())? {
        filter = filter.from(start_of_day(from));
    }
    if let Some(to) = parse_optional_date(to.as_deref())? {
        filter = filter.to(end_of_day(to));
    }

    let registry = TableRegistry::global(&config.data_dir);
    let table = registry.table(descriptor);
    let frame = lock(&table).select()?.filter(filter)?.values()?;

    println!("{} rows", frame.height());
    println!("{}", frame.head(Some(limit)));
    Ok(())
}

// ── Cache ──

fn run_cache_status(config: &Config) -> Result<()> {
    println!("Data dir: {}", config.data_dir.display());
    println!();
    println!(
        "{:<20} {:<6} {:<9} {:>10}  {}",
        "Table", "Flat", "Snapshot", "Rows", "Built"
    );
    println!("{}", "-".repeat(70));

    for descriptor in ALL_TABLES {
        let status = TableFiles::new(&config.data_dir, descriptor).status();
        let (rows, built) = match &status.meta {
            Some(meta) => (meta.rows.to_string(), meta.built_at.to_string()),
            None => ("-".into(), "-".into()),
        };
        println!(
            "{:<20} {:<6} {:<9} {:>10}  {}",
            status.name,
            yes_no(status.flat_present),
            yes_no(status.snapshot_present),
            rows,
            built
        );
    }
    Ok(())
}

fn run_cache_clear(config: &Config, name: &str) -> Result<()> {
    let descriptor = lookup_table(name)?;
    TableFiles::new(&config.data_dir, descriptor).remove_snapshot()?;
    println!("Cleared snapshot for {name}");
    Ok(())
}

// ── Config ──

fn run_config_show(config: &Config, provider: &ConnectionProvider) -> Result<()> {
    print!("{}", config.to_toml()?);
    let available: Vec<&str> = provider.target_names().collect();
    println!();
    println!(
        "# connection target: {} (available: {})",
        provider.resolve(None)?,
        available.join(", ")
    );
    Ok(())
}

// ── Helpers ──

fn lookup_table(name: &str) -> Result<&'static krxlab_core::table::TableDescriptor> {
    match descriptor_by_name(name) {
        Some(descriptor) => Ok(descriptor),
        None => {
            let valid: Vec<&str> = ALL_TABLES.iter().map(|d| d.name).collect();
            bail!("unknown table '{name}'. Valid: {}", valid.join(", "))
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn parse_optional_date(s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(parse_date).transpose()
}

fn yes_no(present: bool) -> &'static str {
    if present {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use krxlab_runner::connection::startup_target;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn date_and_range_conflict() {
        let parsed = Cli::try_parse_from([
            "krxlab", "sync", "prices", "--date", "2018-01-02", "--start", "2018-01-01",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn provider_sees_the_same_target_as_clap() {
        for argv in [
            vec!["krxlab", "--target", "remote", "count", "stock_master"],
            vec!["krxlab", "count", "stock_master", "--target=remote"],
        ] {
            let cli = Cli::try_parse_from(argv.clone()).unwrap();
            let scanned = startup_target(argv.into_iter().map(String::from), |_| None);
            assert_eq!(cli.target, scanned);
        }
    }

    #[test]
    fn open_breaker_explains_the_failure() {
        let breaker = CircuitBreaker::krx_default();
        assert_eq!(breaker_note(&breaker), None);

        breaker.trip();
        let note = breaker_note(&breaker).unwrap();
        assert!(note.contains("retry in"));
    }

    #[test]
    fn config_show_parses() {
        let cli = Cli::try_parse_from(["krxlab", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { action: ConfigAction::Show }));
    }

    #[test]
    fn target_is_global() {
        let cli = Cli::try_parse_from(["krxlab", "count", "stock_master", "--target", "remote"])
            .unwrap();
        assert_eq!(cli.target.as_deref(), Some("remote"));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_date("2018/01/02").is_err());
        assert_eq!(
            parse_optional_date(Some("2018-01-02")).unwrap(),
            NaiveDate::from_ymd_opt(2018, 1, 2)
        );
    }

    #[test]
    fn unknown_table_lists_valid_names() {
        let err = lookup_table("stock_weekly_price").unwrap_err().to_string();
        assert!(err.contains("stock_daily_price"));
    }
}
