//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use rmvolume_core::{
    engine::VolumeEngine,
    error::{VolumeError, VolumeResult},
    period::{PeriodKey, PeriodScope},
    reconciler::ShutdownSignal,
    record::{BucketRecord, RawMetrics},
    store::{BucketStore, SqliteStore, TotalDecision},
    types::{Cadence, RecordId, SizeBucket},
};
use std::cell::Cell;

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn monthly_key(y: i32, m: u32, d: u32) -> PeriodKey {
    PeriodKey::new(Cadence::Monthly, y, ymd(y, m, d))
}

pub fn plan(actual_received: f64, master_plan: f64) -> RawMetrics {
    RawMetrics {
        actual_received,
        master_plan,
        ..Default::default()
    }
}

/// Insert a real-bucket row directly, bypassing row-addition date rules.
pub fn put<S: BucketStore>(
    engine: &VolumeEngine<S>,
    key: PeriodKey,
    size: SizeBucket,
    metrics: RawMetrics,
) -> BucketRecord {
    engine
        .store()
        .insert(&BucketRecord::with_metrics(key, size, metrics))
        .expect("insert")
}

/// Wraps a SQLite store and fails every total write dated `fail_on`.
pub struct FailingStore {
    pub inner: SqliteStore,
    pub fail_on: NaiveDate,
}

impl FailingStore {
    pub fn new(fail_on: NaiveDate) -> Self {
        let inner = SqliteStore::in_memory().expect("in-memory store");
        inner.migrate().expect("migration");
        Self { inner, fail_on }
    }
}

fn injected() -> VolumeError {
    VolumeError::Persistence(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
        Some("injected constraint violation".into()),
    ))
}

impl BucketStore for FailingStore {
    fn read_siblings(&self, key: &PeriodKey) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.read_siblings(key)
    }
    fn read_total(&self, key: &PeriodKey) -> VolumeResult<Option<BucketRecord>> {
        self.inner.read_total(key)
    }
    fn upsert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        if record.key.period_date == self.fail_on {
            return Err(injected());
        }
        self.inner.upsert(record)
    }
    fn write_total<T, F>(&self, key: &PeriodKey, decide: F) -> VolumeResult<TotalDecision<T>>
    where
        F: FnOnce(&[BucketRecord], Option<&BucketRecord>) -> TotalDecision<T>,
    {
        if key.period_date == self.fail_on {
            return Err(injected());
        }
        self.inner.write_total(key, decide)
    }
    fn insert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        self.inner.insert(record)
    }
    fn count_rows(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<i64> {
        self.inner.count_rows(size, scope)
    }
    fn get(&self, id: RecordId) -> VolumeResult<Option<BucketRecord>> {
        self.inner.get(id)
    }
    fn update_metrics(&self, record: &BucketRecord) -> VolumeResult<()> {
        self.inner.update_metrics(record)
    }
    fn period_keys(&self, scope: &PeriodScope) -> VolumeResult<Vec<PeriodKey>> {
        self.inner.period_keys(scope)
    }
    fn totals(&self, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.totals(scope)
    }
    fn rows_for_size(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.rows_for_size(size, scope)
    }
    fn fork(&self) -> VolumeResult<Option<Self>> {
        Ok(None)
    }
}

/// Wraps a SQLite store and raises `signal` once `after` totals are written.
pub struct TripwireStore {
    pub inner: SqliteStore,
    pub signal: ShutdownSignal,
    pub after: usize,
    pub upserts: Cell<usize>,
}

impl TripwireStore {
    pub fn new(signal: ShutdownSignal, after: usize) -> Self {
        let inner = SqliteStore::in_memory().expect("in-memory store");
        inner.migrate().expect("migration");
        Self {
            inner,
            signal,
            after,
            upserts: Cell::new(0),
        }
    }
}

impl BucketStore for TripwireStore {
    fn read_siblings(&self, key: &PeriodKey) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.read_siblings(key)
    }
    fn read_total(&self, key: &PeriodKey) -> VolumeResult<Option<BucketRecord>> {
        self.inner.read_total(key)
    }
    fn upsert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        self.inner.upsert(record)
    }
    fn write_total<T, F>(&self, key: &PeriodKey, decide: F) -> VolumeResult<TotalDecision<T>>
    where
        F: FnOnce(&[BucketRecord], Option<&BucketRecord>) -> TotalDecision<T>,
    {
        let decision = self.inner.write_total(key, decide)?;
        if matches!(decision, TotalDecision::Write(_)) {
            self.upserts.set(self.upserts.get() + 1);
            if self.upserts.get() >= self.after {
                self.signal.trigger();
            }
        }
        Ok(decision)
    }
    fn insert(&self, record: &BucketRecord) -> VolumeResult<BucketRecord> {
        self.inner.insert(record)
    }
    fn count_rows(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<i64> {
        self.inner.count_rows(size, scope)
    }
    fn get(&self, id: RecordId) -> VolumeResult<Option<BucketRecord>> {
        self.inner.get(id)
    }
    fn update_metrics(&self, record: &BucketRecord) -> VolumeResult<()> {
        self.inner.update_metrics(record)
    }
    fn period_keys(&self, scope: &PeriodScope) -> VolumeResult<Vec<PeriodKey>> {
        self.inner.period_keys(scope)
    }
    fn totals(&self, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.totals(scope)
    }
    fn rows_for_size(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.inner.rows_for_size(size, scope)
    }
    fn fork(&self) -> VolumeResult<Option<Self>> {
        Ok(None)
    }
}
