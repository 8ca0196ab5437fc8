//! Per-unit sync and the batch fan-out over business days.

use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use krxlab_core::calendar::business_days_desc;
use krxlab_core::{DataError, FetchContext, SyncUnit};

use super::job::SyncJob;
use super::SyncError;
use crate::connection::ConnectionProvider;
use crate::pool::WorkerPool;
use crate::store::{AppendOutcome, Query, Store, StoredRecord};

/// How one unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded(AppendOutcome),
    /// The store already had rows for the unit.
    Skipped,
    Failed(String),
    /// Still running when the batch deadline passed; its result is discarded.
    TimedOut,
}

impl UnitOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UnitOutcome::Failed(_) | UnitOutcome::TimedOut)
    }
}

/// Result of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: SyncUnit,
    pub outcome: UnitOutcome,
    pub elapsed: Duration,
}

impl fmt::Display for UnitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            UnitOutcome::Succeeded(AppendOutcome::Inserted(n)) => {
                write!(f, "{}: inserted {n}", self.unit)
            }
            UnitOutcome::Succeeded(AppendOutcome::AlreadyPresent) => {
                write!(f, "{}: already present", self.unit)
            }
            UnitOutcome::Skipped => write!(f, "{}: skipped", self.unit),
            UnitOutcome::Failed(reason) => write!(f, "{}: FAILED {reason}", self.unit),
            UnitOutcome::TimedOut => write!(f, "{}: TIMED OUT", self.unit),
        }
    }
}

/// Reports of a batch, one per unit, newest day first.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub table: &'static str,
    pub reports: Vec<UnitReport>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn inserted(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match &r.outcome {
                UnitOutcome::Succeeded(outcome) => outcome.inserted(),
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_failure()).count()
    }

    pub fn timed_out(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome == UnitOutcome::TimedOut)
            .count()
    }
}

/// Store query covering `unit`.
pub fn query_for(unit: SyncUnit) -> Query {
    match unit {
        SyncUnit::Full => Query::all(),
        SyncUnit::Day(date) => Query::day(date),
    }
}

/// `err` and every source below it, outermost first.
///
/// A source whose message is already the tail of its parent's is skipped.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !chain.ends_with(&message) {
            chain.push_str(": ");
            chain.push_str(&message);
        }
        source = cause.source();
    }
    chain
}

/// Sync one unit on its own connection.
///
/// Never fails: errors are logged and reported as `Failed`. The connection
/// is released on every path.
pub fn sync_unit<J: SyncJob>(job: &J, provider: &ConnectionProvider, unit: SyncUnit) -> UnitReport {
    let table = <J::Row as StoredRecord>::TABLE;
    let started = Instant::now();

    let outcome = match try_sync_unit(job, provider, unit) {
        Ok(outcome) => outcome,
        Err(e) => {
            let chain = error_chain(&e);
            tracing::error!(table, %unit, error = %chain, debug = ?e, "sync failed");
            UnitOutcome::Failed(chain)
        }
    };

    UnitReport {
        unit,
        outcome,
        elapsed: started.elapsed(),
    }
}

fn try_sync_unit<J: SyncJob>(
    job: &J,
    provider: &ConnectionProvider,
    unit: SyncUnit,
) -> Result<UnitOutcome, SyncError> {
    let table = <J::Row as StoredRecord>::TABLE;
    let query = query_for(unit);

    let mut store = Store::new(provider.get_connection(None)?);
    store.ensure_schema::<J::Row>()?;

    if job.skip_when_present() && store.count::<J::Row>(&query)? > 0 {
        tracing::info!(table, %unit, "rows already stored, skipping");
        store.close()?;
        return Ok(UnitOutcome::Skipped);
    }

    let existing = store.read::<J::Row>(&query)?;
    let instruments = job.instruments(&store, unit)?;

    let source = job.source();
    if !source.is_available() {
        return Err(DataError::CircuitBreakerTripped.into());
    }
    let remote = source.fetch(unit, FetchContext::new(&instruments))?;

    let delta = remote.difference(&existing);
    let outcome = store.append(&delta)?;

    if outcome.inserted() > 0 {
        job.after_insert(&store)?;
    }

    tracing::info!(
        table,
        %unit,
        source = source.name(),
        remote = remote.len(),
        existing = existing.len(),
        inserted = outcome.inserted(),
        already_present = outcome == AppendOutcome::AlreadyPresent,
        "unit synced"
    );
    store.close()?;
    Ok(UnitOutcome::Succeeded(outcome))
}

/// Sync every business day in `[start, end]`, newest first, on `pool`.
pub fn sync_range<J>(
    job: Arc<J>,
    provider: Arc<ConnectionProvider>,
    pool: &WorkerPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<BatchReport, SyncError>
where
    J: SyncJob + 'static,
{
    let table = <J::Row as StoredRecord>::TABLE;
    let started = Instant::now();

    // One schema pass up front so the workers don't race on DDL.
    let store = Store::new(provider.get_connection(None)?);
    store.ensure_schema::<J::Row>()?;
    store.close()?;

    let units: Vec<SyncUnit> = business_days_desc(start, end)
        .into_iter()
        .map(SyncUnit::Day)
        .collect();
    tracing::info!(table, units = units.len(), %start, %end, "batch sync started");

    let reports = pool.run(units, move |unit| {
        sync_unit(job.as_ref(), provider.as_ref(), unit).outcome
    });

    let report = BatchReport {
        table,
        reports,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        table,
        inserted = report.inserted(),
        failures = report.failures(),
        timed_out = report.timed_out(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "batch sync finished"
    );
    Ok(report)
}
