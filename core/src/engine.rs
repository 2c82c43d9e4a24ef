//! The volume engine: the surface the dashboard and batch jobs call.
//!
//! RULES:
//!   - The store is the single source of truth. Every operation returns the
//!     stored state; callers never patch a cached copy.
//!   - `total_volume` rows are written by the reconciler only.
//!   - Inputs are validated before anything touches the store.

use crate::{
    capacity,
    config::EngineConfig,
    error::{VolumeError, VolumeResult},
    period::{PeriodKey, PeriodScope},
    reconciler::{BatchSummary, KeyStatus, ReconcileOutcome, Reconciler, ShutdownSignal},
    record::{validate_metric, BucketRecord, MetricField, RawMetrics},
    store::{BucketStore, SqliteStore},
    types::{Cadence, RecordId, SizeBucket, Year},
};
use serde::Serialize;

/// Result of a field edit: the stored record and, when edits trigger
/// reconciliation, what happened to its period's total.
///
/// Once the edit is stored this is always returned. A total that could not
/// be refreshed shows up as `KeyStatus::Failed` and stays at its old value
/// until the period is reconciled again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditResult {
    pub record: BucketRecord,
    pub total: Option<KeyStatus>,
}

impl EditResult {
    /// The period's total after the edit, when one was written or kept.
    pub fn total_record(&self) -> Option<&BucketRecord> {
        self.total
            .as_ref()
            .and_then(KeyStatus::outcome)
            .and_then(ReconcileOutcome::record)
    }
}

pub struct VolumeEngine<S: BucketStore = SqliteStore> {
    config: EngineConfig,
    store: S,
    reconciler: Reconciler,
}

impl<S: BucketStore> VolumeEngine<S> {
    pub fn new(config: EngineConfig, store: S) -> VolumeResult<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(&config);
        Ok(Self {
            config,
            store,
            reconciler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Raise this to stop a running batch after its in-flight keys.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.reconciler.shutdown_signal()
    }

    /// Replace the engine's stop flag with one owned elsewhere.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.reconciler = self.reconciler.with_shutdown(shutdown);
        self
    }

    // ── Reconciliation ─────────────────────────────────────────

    pub fn reconcile(&self, key: &PeriodKey) -> VolumeResult<ReconcileOutcome> {
        self.reconciler.reconcile_key(&self.store, key)
    }

    pub fn reconcile_scope(&self, scope: &PeriodScope) -> VolumeResult<BatchSummary>
    where
        S: Send,
    {
        self.reconciler.reconcile_scope(&self.store, scope)
    }

    // ── Row addition ───────────────────────────────────────────

    /// Append a blank row for `size` at the next free period date of
    /// (cadence, year).
    pub fn add_row(&self, size: SizeBucket, cadence: Cadence, year: Year) -> VolumeResult<BucketRecord> {
        if size.is_total() {
            return Err(VolumeError::validation(
                "size",
                "total_volume rows are created by reconciliation only",
            ));
        }
        let scope = PeriodScope::new(cadence, year);
        let count = self.store.count_rows(size, &scope)?;
        let date = capacity::next_in_scope(&scope, count)?;
        let record = self.store.insert(&BucketRecord::blank(scope.key(date), size))?;
        log::info!("added {size} row for {} (row {} of {})", record.key, count + 1, cadence.capacity());
        Ok(record)
    }

    // ── Edits ──────────────────────────────────────────────────

    /// Set one raw metric on a real bucket record, recompute its derived
    /// fields and, if configured, reconcile its period.
    ///
    /// The edit is committed before reconciliation runs. A reconcile
    /// failure is reported in `EditResult::total`, not as the error.
    pub fn edit_field(&self, id: RecordId, field: MetricField, value: f64) -> VolumeResult<EditResult> {
        validate_metric(field, value)?;
        let mut record = self.editable(id)?;
        record.metrics.set(field, value);
        self.commit(record)
    }

    /// Replace every raw metric of a real bucket record at once. Used by
    /// import collaborators that map a spreadsheet row onto a record id.
    pub fn replace_metrics(&self, id: RecordId, metrics: RawMetrics) -> VolumeResult<EditResult> {
        metrics.validate()?;
        let mut record = self.editable(id)?;
        record.metrics = metrics;
        self.commit(record)
    }

    fn editable(&self, id: RecordId) -> VolumeResult<BucketRecord> {
        let record = self.store.get(id)?.ok_or(VolumeError::NotFound { id })?;
        if record.size.is_total() {
            return Err(VolumeError::validation(
                "size",
                "total_volume is derived from its siblings and cannot be edited",
            ));
        }
        Ok(record)
    }

    fn commit(&self, mut record: BucketRecord) -> VolumeResult<EditResult> {
        record.refresh_derived();
        self.store.update_metrics(&record)?;
        log::debug!("record {:?} ({} {}) updated", record.id, record.size, record.key);

        let total = self
            .config
            .reconcile_on_edit
            .then(|| self.reconciler.status_for(&self.store, &record.key));
        Ok(EditResult { record, total })
    }

    // ── Reads ──────────────────────────────────────────────────

    /// `total_volume` series for a scope, by date.
    pub fn totals(&self, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.store.totals(scope)
    }

    /// One size bucket's rows for a scope, by date.
    pub fn rows(&self, size: SizeBucket, scope: &PeriodScope) -> VolumeResult<Vec<BucketRecord>> {
        self.store.rows_for_size(size, scope)
    }
}

impl VolumeEngine<SqliteStore> {
    /// Open (or create) a database at `path`, migrate it and wire an engine.
    pub fn open(path: &str, config: EngineConfig) -> VolumeResult<Self> {
        let store = SqliteStore::open_with_timeout(path, config.busy_timeout())?;
        store.migrate()?;
        Self::new(config, store)
    }

    /// In-memory engine with test defaults.
    pub fn build_test() -> VolumeResult<Self> {
        Self::build_test_with(EngineConfig::default_test())
    }

    pub fn build_test_with(config: EngineConfig) -> VolumeResult<Self> {
        let store = SqliteStore::in_memory()?;
        store.migrate()?;
        Self::new(config, store)
    }
}
