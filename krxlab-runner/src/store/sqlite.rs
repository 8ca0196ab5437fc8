//! Store operations over one open connection.

use rusqlite::params_from_iter;

use krxlab_core::RecordSet;

use super::query::Query;
use super::schema::StoredRecord;
use super::{AppendOutcome, StoreError};
use crate::connection::Connection;

/// Typed reads, counts and appends over a single connection.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn target(&self) -> &str {
        self.conn.target()
    }

    /// Create the table and its date index if absent.
    pub fn ensure_schema<R: StoredRecord>(&self) -> Result<(), StoreError> {
        self.conn.raw().execute_batch(&R::create_sql())?;
        Ok(())
    }

    fn check_query<R: StoredRecord>(query: &Query) -> Result<(), StoreError> {
        if query.has_date_bounds() && !R::is_dated() {
            return Err(StoreError::InvalidQuery {
                table: R::TABLE.to_string(),
                reason: "date bounds on an undated table".into(),
            });
        }
        Ok(())
    }

    pub fn read<R: StoredRecord>(&self, query: &Query) -> Result<RecordSet<R>, StoreError> {
        Self::check_query::<R>(query)?;
        let (clause, params) = query.where_clause();
        let sql = format!("{}{clause}", R::select_sql());

        let mut stmt = self.conn.raw().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| R::from_row(row))?;

        let mut set = RecordSet::new();
        for row in rows {
            // The primary key makes a repeat impossible; treat one as corruption.
            set.insert(row?).map_err(|e| StoreError::InvalidQuery {
                table: R::TABLE.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(set)
    }

    pub fn count<R: StoredRecord>(&self, query: &Query) -> Result<u64, StoreError> {
        Self::check_query::<R>(query)?;
        let (clause, params) = query.where_clause();
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", R::TABLE);

        let count: i64 = self
            .conn
            .raw()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Insert every row of `delta` in one transaction.
    ///
    /// Never updates: a row whose key is already stored (by an earlier run
    /// or a concurrent writer) is skipped and the rest still land.
    /// `AlreadyPresent` means a non-empty delta inserted nothing.
    pub fn append<R: StoredRecord>(&mut self, delta: &RecordSet<R>) -> Result<AppendOutcome, StoreError> {
        if delta.is_empty() {
            return Ok(AppendOutcome::Inserted(0));
        }

        let tx = self.conn.raw_mut().transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&R::insert_sql())?;
            for row in delta {
                inserted += stmt.execute(params_from_iter(row.to_values()))?;
            }
        }
        tx.commit()?;

        let skipped = delta.len() - inserted;
        if skipped > 0 {
            tracing::warn!(table = R::TABLE, inserted, skipped, "append skipped keys already stored");
        }

        if inserted == 0 {
            Ok(AppendOutcome::AlreadyPresent)
        } else {
            Ok(AppendOutcome::Inserted(inserted))
        }
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TargetConfig};
    use crate::connection::ConnectionProvider;
    use chrono::{NaiveDate, NaiveDateTime};
    use krxlab_core::domain::{DailyPrice, StockMaster};

    fn store(dir: &std::path::Path) -> Store {
        let mut config = Config::default();
        config
            .targets
            .insert("local".into(), TargetConfig::new(dir.join("krx.db")));
        let provider = ConnectionProvider::new(&config, None);
        Store::new(provider.get_connection(None).unwrap())
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 1, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn price(code: &str, date: NaiveDateTime, close: f64) -> DailyPrice {
        DailyPrice {
            code: code.into(),
            date,
            volume: 10,
            open: close,
            high: close,
            low: close,
            close,
            market_capitalization: Some(1_000_000),
            listed_stocks_number: None,
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store.ensure_schema::<DailyPrice>().unwrap();
        store.ensure_schema::<DailyPrice>().unwrap();

        let rows = RecordSet::from_rows(vec![
            price("A", at(2, 0, 0, 0), 100.0),
            price("B", at(2, 0, 0, 0), 200.0),
        ])
        .unwrap();
        assert_eq!(store.append(&rows).unwrap(), AppendOutcome::Inserted(2));

        let read: RecordSet<DailyPrice> = store.read(&Query::all()).unwrap();
        assert_eq!(read.into_rows(), rows.into_rows());
    }

    #[test]
    fn colliding_keys_are_skipped_and_new_rows_land() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store.ensure_schema::<DailyPrice>().unwrap();

        // Both writers diffed against an empty store; the second stored A first.
        let delta = RecordSet::from_rows(vec![
            price("A", at(2, 0, 0, 0), 999.0),
            price("B", at(2, 0, 0, 0), 200.0),
        ])
        .unwrap();
        let concurrent = RecordSet::from_rows(vec![price("A", at(2, 0, 0, 0), 100.0)]).unwrap();
        store.append(&concurrent).unwrap();

        assert_eq!(store.append(&delta).unwrap(), AppendOutcome::Inserted(1));

        let read: RecordSet<DailyPrice> = store.read(&Query::all()).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.get(&("A".to_string(), at(2, 0, 0, 0))).unwrap().close, 100.0);
        assert_eq!(read.get(&("B".to_string(), at(2, 0, 0, 0))).unwrap().close, 200.0);
    }

    #[test]
    fn fully_stored_delta_is_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store.ensure_schema::<DailyPrice>().unwrap();

        let rows = RecordSet::from_rows(vec![price("A", at(2, 0, 0, 0), 100.0)]).unwrap();
        store.append(&rows).unwrap();

        assert_eq!(store.append(&rows).unwrap(), AppendOutcome::AlreadyPresent);
        assert_eq!(store.count::<DailyPrice>(&Query::all()).unwrap(), 1);
    }

    #[test]
    fn day_query_includes_end_of_day_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store.ensure_schema::<DailyPrice>().unwrap();
        let rows = RecordSet::from_rows(vec![
            price("A", at(2, 0, 0, 0), 1.0),
            price("A", at(2, 23, 59, 59), 1.0),
            price("A", at(3, 0, 0, 0), 1.0),
        ])
        .unwrap();
        store.append(&rows).unwrap();

        let day = NaiveDate::from_ymd_opt(2018, 1, 2).unwrap();
        assert_eq!(store.count::<DailyPrice>(&Query::day(day)).unwrap(), 2);
        assert_eq!(
            store
                .count::<DailyPrice>(&Query::between(at(2, 0, 0, 0), at(3, 0, 0, 0)).code("A"))
                .unwrap(),
            3
        );
    }

    #[test]
    fn date_bounds_on_masters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_schema::<StockMaster>().unwrap();

        let day = NaiveDate::from_ymd_opt(2018, 1, 2).unwrap();
        let err = store.count::<StockMaster>(&Query::day(day)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));
    }

    #[test]
    fn empty_delta_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(dir.path());
        store.ensure_schema::<StockMaster>().unwrap();
        assert_eq!(
            store.append(&RecordSet::<StockMaster>::new()).unwrap(),
            AppendOutcome::Inserted(0)
        );
    }
}
