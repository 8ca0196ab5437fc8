//! Fixed-size worker pool running whole sync units under a batch deadline.
//!
//! The first `front_units` run serially on the calling thread so that a
//! systematic failure (bad credentials, changed response format) shows up
//! before the fan-out. The rest run on a private rayon pool. Collection
//! stops at the deadline; anything unfinished is reported as `TimedOut` and
//! left to finish in the background with its result discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use krxlab_core::SyncUnit;

use crate::config::SyncConfig;
use crate::sync::{SyncError, UnitOutcome, UnitReport};

/// Pool sizing and deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    pub front_units: usize,
    /// Batch deadline; `None` allows one second per unit plus three.
    pub deadline: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: None,
            front_units: 1,
            deadline: None,
        }
    }
}

impl From<&SyncConfig> for PoolConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            workers: config.workers,
            front_units: config.front_units,
            deadline: config.deadline_secs.map(Duration::from_secs),
        }
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    front_units: usize,
    deadline: Option<Duration>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, SyncError> {
        let workers = config.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("krxlab-sync-{i}"))
            .build()
            .map_err(|e| SyncError::Pool(format!("failed to build thread pool: {e}")))?;

        Ok(Self {
            pool,
            front_units: config.front_units,
            deadline: config.deadline,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Deadline for a parallel batch of `units`.
    pub fn deadline_for(&self, units: usize) -> Duration {
        self.deadline
            .unwrap_or_else(|| Duration::from_secs(units as u64 + 3))
    }

    /// Run `work` once per unit; one report per unit, in input order.
    pub fn run<F>(&self, units: Vec<SyncUnit>, work: F) -> Vec<UnitReport>
    where
        F: Fn(SyncUnit) -> UnitOutcome + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let split = self.front_units.min(units.len());
        let (front, rest) = units.split_at(split);

        let mut reports: Vec<UnitReport> = front
            .iter()
            .map(|&unit| {
                let started = Instant::now();
                let outcome = run_guarded(work.as_ref(), unit);
                UnitReport {
                    unit,
                    outcome,
                    elapsed: started.elapsed(),
                }
            })
            .collect();

        if rest.is_empty() {
            return reports;
        }

        let (tx, rx) = mpsc::channel();
        for (i, &unit) in rest.iter().enumerate() {
            let tx = tx.clone();
            let work = Arc::clone(&work);
            self.pool.spawn(move || {
                let started = Instant::now();
                let outcome = run_guarded(work.as_ref(), unit);
                // The receiver is gone once the deadline has passed.
                let _ = tx.send((
                    i,
                    UnitReport {
                        unit,
                        outcome,
                        elapsed: started.elapsed(),
                    },
                ));
            });
        }
        drop(tx);

        let budget = self.deadline_for(rest.len());
        let deadline = Instant::now() + budget;
        let mut slots: Vec<Option<UnitReport>> = (0..rest.len()).map(|_| None).collect();
        let mut pending = rest.len();

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((i, report)) => {
                    slots[i] = Some(report);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if pending > 0 {
            tracing::warn!(
                pending,
                deadline_secs = budget.as_secs(),
                "batch deadline passed, abandoning unfinished units"
            );
        }

        reports.extend(rest.iter().zip(slots).map(|(&unit, slot)| {
            slot.unwrap_or(UnitReport {
                unit,
                outcome: UnitOutcome::TimedOut,
                elapsed: budget,
            })
        }));
        reports
    }
}

/// Run one unit, turning a panic into a failure.
fn run_guarded<F>(work: &F, unit: SyncUnit) -> UnitOutcome
where
    F: Fn(SyncUnit) -> UnitOutcome,
{
    match catch_unwind(AssertUnwindSafe(|| work(unit))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(%unit, panic = %message, "unit panicked");
            UnitOutcome::Failed(format!("panicked: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppendOutcome;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn days(n: u32) -> Vec<SyncUnit> {
        (1..=n)
            .map(|d| SyncUnit::Day(NaiveDate::from_ymd_opt(2018, 1, d).unwrap()))
            .collect()
    }

    fn pool(workers: usize, deadline: Option<Duration>) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            workers: Some(workers),
            front_units: 1,
            deadline,
        })
        .unwrap()
    }

    #[test]
    fn one_report_per_unit_in_input_order() {
        let pool = pool(4, None);
        let units = days(6);

        let reports = pool.run(units.clone(), |_| UnitOutcome::Succeeded(AppendOutcome::Inserted(1)));

        assert_eq!(reports.len(), 6);
        let order: Vec<_> = reports.iter().map(|r| r.unit).collect();
        assert_eq!(order, units);
    }

    #[test]
    fn default_deadline_is_units_plus_three_seconds() {
        let pool = pool(1, None);
        assert_eq!(pool.deadline_for(10), Duration::from_secs(13));
        let pool = WorkerPool::new(PoolConfig {
            deadline: Some(Duration::from_secs(2)),
            ..PoolConfig::default()
        })
        .unwrap();
        assert_eq!(pool.deadline_for(10), Duration::from_secs(2));
    }

    #[test]
    fn front_units_run_before_the_fan_out() {
        let pool = pool(4, None);
        let seen = Arc::new(AtomicUsize::new(0));
        let first_seen = Arc::new(AtomicUsize::new(usize::MAX));
        let units = days(5);
        let front = units[0];

        let (s, f) = (Arc::clone(&seen), Arc::clone(&first_seen));
        pool.run(units, move |unit| {
            let position = s.fetch_add(1, Ordering::SeqCst);
            if unit == front {
                f.store(position, Ordering::SeqCst);
            }
            UnitOutcome::Skipped
        });

        assert_eq!(first_seen.load(Ordering::SeqCst), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn slow_units_are_reported_as_timed_out() {
        let pool = pool(2, Some(Duration::from_millis(200)));
        let units = days(3);
        let slow = units[2];

        let reports = pool.run(units, move |unit| {
            if unit == slow {
                std::thread::sleep(Duration::from_secs(2));
            }
            UnitOutcome::Succeeded(AppendOutcome::Inserted(0))
        });

        assert_eq!(reports[0].outcome, UnitOutcome::Succeeded(AppendOutcome::Inserted(0)));
        assert_eq!(reports[1].outcome, UnitOutcome::Succeeded(AppendOutcome::Inserted(0)));
        assert_eq!(reports[2].outcome, UnitOutcome::TimedOut);
    }

    #[test]
    fn panics_become_failures() {
        let pool = pool(2, None);
        let units = days(3);
        let bad = units[1];

        let reports = pool.run(units, move |unit| {
            if unit == bad {
                panic!("boom");
            }
            UnitOutcome::Skipped
        });

        assert_eq!(reports[1].outcome, UnitOutcome::Failed("panicked: boom".into()));
        assert_eq!(reports[2].outcome, UnitOutcome::Skipped);
    }

    #[test]
    fn empty_batch_is_empty() {
        let pool = pool(1, None);
        assert!(pool.run(Vec::new(), |_| UnitOutcome::Skipped).is_empty());
    }
}
