//! End-to-end sync against a scratch SQLite target with in-memory sources.
//!
//! Masters → daily prices → investor trends, then the refreshed master flat
//! file is read back through the table cache.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

use krxlab_core::domain::{DailyPrice, Flow, Investor, InvestorTrend, StockMaster};
use krxlab_core::table::registry::lock;
use krxlab_core::table::{Filter, TableFiles, TableRegistry, STOCK_MASTER};
use krxlab_core::{DataError, FetchContext, RecordSet, RemoteSource, SyncUnit};
use krxlab_runner::{
    sync_range, sync_unit, AppendOutcome, Config, ConnectionProvider, MasterJob, PoolConfig,
    PriceJob, Query, Store, TargetConfig, TrendJob, UnitOutcome, WorkerPool,
};

// ── Fixtures ─────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn master(code: &str, short: &str, market: &str) -> StockMaster {
    StockMaster {
        code: code.into(),
        short_code: short.into(),
        company_name: format!("company {code}"),
        market_name: market.into(),
    }
}

struct Masters;

impl RemoteSource<StockMaster> for Masters {
    fn name(&self) -> &str {
        "fixture-masters"
    }

    fn fetch(&self, _unit: SyncUnit, _ctx: FetchContext<'_>) -> Result<RecordSet<StockMaster>, DataError> {
        RecordSet::from_rows(vec![
            master("KR7005930003", "A005930", "KOSPI"),
            master("KR7035720002", "A035720", "KOSDAQ"),
        ])
    }
}

/// Every known instrument trades every business day; weekends have nothing.
struct Prices;

impl RemoteSource<DailyPrice> for Prices {
    fn name(&self) -> &str {
        "fixture-prices"
    }

    fn fetch(&self, unit: SyncUnit, ctx: FetchContext<'_>) -> Result<RecordSet<DailyPrice>, DataError> {
        let date = unit
            .day()
            .ok_or_else(|| DataError::Validation("per day only".into()))?;
        RecordSet::from_rows(ctx.instruments.iter().map(|m| DailyPrice {
            code: m.code.clone(),
            date: date.and_hms_opt(0, 0, 0).unwrap(),
            volume: 100,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            market_capitalization: Some(1_050_000),
            listed_stocks_number: Some(100_000),
        }))
    }
}

struct Trends;

impl RemoteSource<InvestorTrend> for Trends {
    fn name(&self) -> &str {
        "fixture-trends"
    }

    fn fetch(&self, unit: SyncUnit, ctx: FetchContext<'_>) -> Result<RecordSet<InvestorTrend>, DataError> {
        let date = unit.day().unwrap().and_hms_opt(0, 0, 0).unwrap();
        RecordSet::from_rows(ctx.instruments.iter().map(|m| {
            let mut trend = InvestorTrend::new(m.code.clone(), date);
            trend.set_flow(Investor::Foreigner, Flow { buy: 7, sell: 2 });
            trend
        }))
    }
}

fn provider(dir: &std::path::Path) -> Arc<ConnectionProvider> {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config
        .targets
        .insert("local".into(), TargetConfig::new(dir.join("krx.db")));
    Arc::new(ConnectionProvider::new(&config, None))
}

fn pool() -> WorkerPool {
    WorkerPool::new(PoolConfig {
        workers: Some(3),
        front_units: 1,
        deadline: Some(Duration::from_secs(60)),
    })
    .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn full_sync_chain() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path());
    let flat = TableFiles::new(dir.path(), &STOCK_MASTER);

    let masters = MasterJob::new(Arc::new(Masters)).with_flat_file(flat.clone());
    let report = sync_unit(&masters, &provider, SyncUnit::Full);
    assert_eq!(report.outcome, UnitOutcome::Succeeded(AppendOutcome::Inserted(2)));

    // Mon 2018-01-01 .. Sun 2018-01-07: five business days, two instruments.
    let prices = Arc::new(PriceJob::new(Arc::new(Prices)));
    let batch = sync_range(prices, Arc::clone(&provider), &pool(), d(2018, 1, 1), d(2018, 1, 7)).unwrap();
    assert_eq!(batch.reports.len(), 5);
    assert_eq!(batch.inserted(), 10);
    assert_eq!(batch.failures(), 0);

    let trends = Arc::new(TrendJob::new(Arc::new(Trends)));
    let batch = sync_range(trends, Arc::clone(&provider), &pool(), d(2018, 1, 1), d(2018, 1, 7)).unwrap();
    assert_eq!(batch.inserted(), 10);

    let store = Store::new(provider.get_connection(None).unwrap());
    assert_eq!(store.count::<DailyPrice>(&Query::all()).unwrap(), 10);
    assert_eq!(
        store
            .count::<InvestorTrend>(&Query::day(d(2018, 1, 3)).code("KR7035720002"))
            .unwrap(),
        1
    );
    let stored: RecordSet<InvestorTrend> = store.read(&Query::all()).unwrap();
    assert!(stored
        .iter()
        .all(|t| t.flow(Investor::Foreigner) == Flow { buy: 7, sell: 2 }));
}

#[test]
fn second_master_sync_leaves_flat_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path());
    let flat = TableFiles::new(dir.path(), &STOCK_MASTER);
    let job = MasterJob::new(Arc::new(Masters)).with_flat_file(flat.clone());

    sync_unit(&job, &provider, SyncUnit::Full);
    let registry = TableRegistry::new(dir.path());
    lock(&registry.table(&STOCK_MASTER)).select().unwrap();
    assert!(flat.status().snapshot_present);

    // Nothing new: no rewrite, the snapshot survives.
    let report = sync_unit(&job, &provider, SyncUnit::Full);
    assert_eq!(report.outcome, UnitOutcome::Succeeded(AppendOutcome::Inserted(0)));
    assert!(flat.status().snapshot_present);
}

#[test]
fn refreshed_master_flat_file_feeds_the_table_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path());
    let job = MasterJob::new(Arc::new(Masters))
        .with_flat_file(TableFiles::new(dir.path(), &STOCK_MASTER));
    sync_unit(&job, &provider, SyncUnit::Full);

    let registry = TableRegistry::new(dir.path());
    let table = registry.table(&STOCK_MASTER);
    let kosdaq = lock(&table)
        .select()
        .unwrap()
        .filter(Filter::new().field("market_name", "KOSDAQ"))
        .unwrap()
        .values()
        .unwrap();

    assert_eq!(kosdaq.height(), 1);
}

#[test]
fn weekend_only_range_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider(dir.path());
    let prices = Arc::new(PriceJob::new(Arc::new(Prices)));

    let batch = sync_range(prices, provider, &pool(), d(2018, 1, 6), d(2018, 1, 7)).unwrap();
    assert!(batch.reports.is_empty());
}
