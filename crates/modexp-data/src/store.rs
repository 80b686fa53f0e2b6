//! SQLite storage for analysis runs and analyzed ModExp calls.
//!
//! Persisting the per-call results lets reports be regenerated without
//! re-reading the parquet dataset. Uses WAL mode and prepared statements
//! inside one transaction for batch inserts.

use chrono::{DateTime, Utc};
use eyre::Result;
use rusqlite::{Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::types::{CallRecord, RunRecord, RunTotals};

pub struct Store {
    conn: RefCell<Connection>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS analysis_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                data_dir TEXT NOT NULL,
                files_loaded INTEGER NOT NULL DEFAULT 0,
                files_failed INTEGER NOT NULL DEFAULT 0,
                total_calls INTEGER NOT NULL DEFAULT 0,
                invalid_records INTEGER NOT NULL DEFAULT 0,
                truncated INTEGER NOT NULL DEFAULT 0,
                finished INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS modexp_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES analysis_runs(id),
                block_number INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                from_address TEXT,
                to_address TEXT,
                base_size INTEGER NOT NULL,
                exponent_size INTEGER NOT NULL,
                modulus_size INTEGER NOT NULL,
                exponent TEXT NOT NULL,
                recorded_cost INTEGER,
                gas_price TEXT,
                current_cost INTEGER NOT NULL,
                new_cost INTEGER NOT NULL,
                computed_legacy_cost INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_modexp_calls_run ON modexp_calls(run_id);

            CREATE TABLE IF NOT EXISTS invalid_record_counts (
                run_id INTEGER NOT NULL REFERENCES analysis_runs(id),
                reason TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (run_id, reason)
            );
            ",
        )?;
        Ok(())
    }

    /// Register a new analysis run and return its id.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn begin_run(&self, started_at: DateTime<Utc>, data_dir: &str) -> Result<i64> {
        let conn = self.conn.borrow();
        conn.execute(
            "INSERT INTO analysis_runs (started_at, data_dir) VALUES (?, ?)",
            rusqlite::params![started_at.to_rfc3339(), data_dir],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Write final counters for a run and mark it finished.
    ///
    /// # Errors
    /// Returns error if database update fails.
    pub fn finish_run(&self, run_id: i64, totals: &RunTotals) -> Result<()> {
        self.conn.borrow().execute(
            "
            UPDATE analysis_runs
            SET files_loaded = ?, files_failed = ?, total_calls = ?,
                invalid_records = ?, truncated = ?, finished = 1
            WHERE id = ?
            ",
            rusqlite::params![
                totals.files_loaded,
                totals.files_failed,
                totals.total_calls,
                totals.invalid_records,
                totals.truncated,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Batch insert analyzed calls using a prepared statement and transaction.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn insert_call_records(&self, run_id: i64, records: &[CallRecord]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO modexp_calls (
                    run_id, block_number, tx_hash, from_address, to_address,
                    base_size, exponent_size, modulus_size, exponent, recorded_cost,
                    gas_price, current_cost, new_cost, computed_legacy_cost
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for r in records {
                stmt.execute(rusqlite::params![
                    run_id,
                    r.block_number,
                    r.tx_hash,
                    r.from_address,
                    r.to_address,
                    r.base_size,
                    r.exponent_size,
                    r.modulus_size,
                    r.exponent,
                    r.recorded_cost,
                    r.gas_price,
                    r.current_cost,
                    r.new_cost,
                    r.computed_legacy_cost,
                ])?;
            }
        }

        let count = records.len();
        tx.commit()?;
        Ok(count)
    }

    /// Replace the per-reason rejected row counts stored for a run.
    ///
    /// # Errors
    /// Returns error if database write fails.
    pub fn insert_invalid_counts(&self, run_id: i64, counts: &BTreeMap<String, u64>) -> Result<()> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM invalid_record_counts WHERE run_id = ?",
            rusqlite::params![run_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO invalid_record_counts (run_id, reason, count) VALUES (?, ?, ?)",
            )?;
            for (reason, count) in counts {
                stmt.execute(rusqlite::params![run_id, reason, count])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Per-reason rejected row counts for a run.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn load_invalid_counts(&self, run_id: i64) -> Result<BTreeMap<String, u64>> {
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare("SELECT reason, count FROM invalid_record_counts WHERE run_id = ?")?;
        let counts = stmt
            .query_map(rusqlite::params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            data_dir: row.get(2)?,
            files_loaded: row.get(3)?,
            files_failed: row.get(4)?,
            total_calls: row.get(5)?,
            invalid_records: row.get(6)?,
            truncated: row.get(7)?,
            finished: row.get(8)?,
        })
    }

    /// Fetch a run by id.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn get_run(&self, run_id: i64) -> Result<Option<RunRecord>> {
        let run = self
            .conn
            .borrow()
            .query_row(
                "
                SELECT id, started_at, data_dir, files_loaded, files_failed,
                       total_calls, invalid_records, truncated, finished
                FROM analysis_runs WHERE id = ?
                ",
                rusqlite::params![run_id],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Most recent run, finished or not.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        let run = self
            .conn
            .borrow()
            .query_row(
                "
                SELECT id, started_at, data_dir, files_loaded, files_failed,
                       total_calls, invalid_records, truncated, finished
                FROM analysis_runs ORDER BY id DESC LIMIT 1
                ",
                [],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Load every analyzed call stored for a run, in insertion order.
    ///
    /// # Errors
    /// Returns error if the query fails or a row cannot be decoded.
    pub fn load_call_records(&self, run_id: i64) -> Result<Vec<CallRecord>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "
            SELECT block_number, tx_hash, from_address, to_address, base_size,
                   exponent_size, modulus_size, exponent, recorded_cost, gas_price,
                   current_cost, new_cost, computed_legacy_cost
            FROM modexp_calls WHERE run_id = ? ORDER BY id
            ",
        )?;

        let records = stmt
            .query_map(rusqlite::params![run_id], |row| {
                Ok(CallRecord {
                    block_number: row.get(0)?,
                    tx_hash: row.get(1)?,
                    from_address: row.get(2)?,
                    to_address: row.get(3)?,
                    base_size: row.get(4)?,
                    exponent_size: row.get(5)?,
                    modulus_size: row.get(6)?,
                    exponent: row.get(7)?,
                    recorded_cost: row.get(8)?,
                    gas_price: row.get(9)?,
                    current_cost: row.get(10)?,
                    new_cost: row.get(11)?,
                    computed_legacy_cost: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of calls stored for a run.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn count_calls(&self, run_id: i64) -> Result<u64> {
        let count = self.conn.borrow().query_row(
            "SELECT COUNT(*) FROM modexp_calls WHERE run_id = ?",
            rusqlite::params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(tx_hash: &str, recorded_cost: Option<u64>) -> CallRecord {
        CallRecord {
            block_number: 18_000_000,
            tx_hash: tx_hash.to_string(),
            from_address: Some("0x1111111111111111111111111111111111111111".to_string()),
            to_address: Some("0x2222222222222222222222222222222222222222".to_string()),
            base_size: 32,
            exponent_size: 3,
            modulus_size: 32,
            exponent: "0x010001".to_string(),
            recorded_cost,
            gas_price: Some("25000000000".to_string()),
            current_cost: 200,
            new_cost: 500,
            computed_legacy_cost: 200,
        }
    }

    #[test]
    fn migrations_create_tables() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let conn = store.conn.borrow();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<Result<Vec<_>, _>>()
            .expect("all rows should parse");

        assert!(tables.contains(&"analysis_runs".to_string()));
        assert!(tables.contains(&"modexp_calls".to_string()));
        assert!(tables.contains(&"invalid_record_counts".to_string()));
    }

    #[test]
    fn invalid_counts_are_replaced_per_run() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let run_id = store.begin_run(Utc::now(), "data").expect("begin run");

        let mut counts = BTreeMap::new();
        counts.insert("missing_field".to_string(), 4);
        store.insert_invalid_counts(run_id, &counts).expect("insert");

        counts.insert("malformed".to_string(), 1);
        store.insert_invalid_counts(run_id, &counts).expect("insert");

        assert_eq!(store.load_invalid_counts(run_id).expect("load"), counts);
        assert!(store.load_invalid_counts(run_id + 1).expect("load").is_empty());
    }

    #[test]
    fn call_records_round_trip_per_run() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let first = store.begin_run(Utc::now(), "data/a").expect("begin run");
        let second = store.begin_run(Utc::now(), "data/b").expect("begin run");

        let records = vec![sample_record("0xaa", Some(200)), sample_record("0xbb", None)];
        let inserted = store
            .insert_call_records(first, &records)
            .expect("insert should succeed");
        assert_eq!(inserted, 2);
        store
            .insert_call_records(second, &records[..1])
            .expect("insert should succeed");

        let loaded = store.load_call_records(first).expect("load");
        assert_eq!(loaded, records);
        assert_eq!(store.count_calls(second).expect("count"), 1);
    }

    #[test]
    fn unattributed_calls_keep_null_addresses() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let run_id = store.begin_run(Utc::now(), "data").expect("begin run");

        let mut record = sample_record("0xcc", Some(200));
        record.from_address = None;
        record.to_address = None;
        store
            .insert_call_records(run_id, std::slice::from_ref(&record))
            .expect("insert should succeed");

        let loaded = store.load_call_records(run_id).expect("load");
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn finish_run_updates_latest() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        assert!(store.latest_run().expect("query").is_none());

        let run_id = store.begin_run(Utc::now(), "data/modexp").expect("begin run");
        let pending = store.get_run(run_id).expect("query").expect("run exists");
        assert!(!pending.finished);

        let totals = RunTotals {
            files_loaded: 10,
            files_failed: 1,
            total_calls: 42,
            invalid_records: 3,
            truncated: true,
        };
        store.finish_run(run_id, &totals).expect("finish run");

        let run = store.latest_run().expect("query").expect("run exists");
        assert_eq!(run.id, run_id);
        assert_eq!(run.data_dir, "data/modexp");
        assert_eq!(run.files_loaded, 10);
        assert_eq!(run.files_failed, 1);
        assert_eq!(run.total_calls, 42);
        assert_eq!(run.invalid_records, 3);
        assert!(run.truncated);
        assert!(run.finished);
    }
}
