//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The aggregator and reconciler go through `BucketStore`; they never
//! execute SQL directly.

use crate::{
    error::VolumeResult,
    period::{PeriodKey, PeriodScope},
    record::BucketRecord,
    types::{Cadence, RecordId, SizeBucket},
};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Connection,
};
use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

mod bucket_record;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// What the reconciler wants done with a key's total.
#[derive(Debug, Clone, PartialEq)]
pub enum TotalDecision<T> {
    /// Upsert this record. On return it carries the stored id.
    Write(BucketRecord),
    /// Leave the store untouched.
    Keep(T),
}

/// The store contract the engine is written against.
///
/// Every method is a single atomic operation from the store's point of
/// view. `write_total` is the only one that spans a read and a write.
pub trait BucketStore {
    /// All real-bucket records for `key`, excluding `total_volume`.
    fn read_siblings(&self, key: &PeriodKey) -> VolumeResult<Vec<BucketRecord>>;

    /// The `total_volume` record for `key`, if one exists.
    fn read_total(&self, key: &PeriodKey) -> VolumeResult<Option<BucketRecord>>;

    /// Insert-or-replace on the natural key (period_type, period_year,
    /// period_date, size). Returns the stored record with its id.
    fn upsert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord>;

    /// Read `key`'s real buckets and current total, let `decide` pick a
    /// new total, and upsert it, all in one write transaction. Writers on
    /// any other handle to the same database wait until it commits, so a
    /// total is never computed from siblings that changed underneath it.
    fn write_total<T, F>(&self, key: &PeriodKey, decide: F) -> VolumeResult<TotalDecision<T>>
    where
        F: FnOnce(&[BucketRecord], Option<&BucketRecord>) -> TotalDecision<T>;

    /// Insert a new record. Fails if the natural key is taken.
    fn insert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord>;

    /// Rows held by `size` within `scope`.
    fn count_rows(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<i64>;

    fn get(&self, id: RecordId) -> VolumeResult<Option<BucketRecord>>;

    /// Overwrite raw and derived metrics of an existing record by id.
    fn update_metrics(&self, record: &BucketRecord) -> VolumeResult<()>;

    /// Keys in `scope` with at least one real-bucket record, by date.
    fn period_keys(&self, scope: &PeriodScope) -> VolumeResult<Vec<PeriodKey>>;

    /// `total_volume` records in `scope`, by date.
    fn totals(&self, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>>;

    /// Records of one size in `scope`, by date.
    fn rows_for_size(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>>;

    /// An independent, migrated handle onto the same data, for batch
    /// workers. `None` when the backing data cannot be shared.
    fn fork(&self) -> VolumeResult<Option<Self>>
    where
        Self: Sized;
}

/// SQLite-backed store. The connection sits behind a mutex so one store
/// (and the engine owning it) can be shared between threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for private in-memory databases
    busy_timeout: Duration,
}

/// `:memory:`, the empty path and `mode=memory` URIs all name databases
/// that a second connection cannot reach by path.
fn is_memory_path(path: &str) -> bool {
    path.is_empty() || path == ":memory:" || path.contains("mode=memory")
}

impl SqliteStore {
    pub fn open(path: &str) -> VolumeResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> VolumeResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(busy_timeout)?;
        let path = (!is_memory_path(path)).then(|| path.to_string());
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            busy_timeout,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> VolumeResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> VolumeResult<Self> {
        match &self.path {
            Some(p) => Self::open_with_timeout(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> VolumeResult<()> {
        self.conn()
            .execute_batch(include_str!("../../../migrations/001_bucket_records.sql"))?;
        Ok(())
    }

    /// File path backing this store; `None` for in-memory databases.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Column codecs ──────────────────────────────────────────────

impl ToSql for SizeBucket {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SizeBucket {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Cadence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Cadence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
