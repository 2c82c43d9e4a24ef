//! Reconciler. Keeps each period key's `total_volume` record in step with
//! its real buckets.
//!
//! Design:
//!   - One key at a time: read siblings → aggregate → upsert, inside a
//!     single store write transaction (`BucketStore::write_total`), so two
//!     reconciliations of the same key never interleave, whether they come
//!     from one engine or from separate connections.
//!   - Empty / all-zero aggregates never touch the store.
//!   - Gated mode leaves an existing total alone.
//!   - Batches fan keys out over up to `workers` threads, each on its own
//!     store handle. A failing key is reported and the batch moves on.
//!   - A raised `ShutdownSignal` stops workers picking up new keys; the
//!     rest are reported as skipped.

use crate::{
    aggregator::{aggregate, Aggregate},
    config::EngineConfig,
    error::VolumeResult,
    period::{PeriodKey, PeriodScope},
    record::BucketRecord,
    store::{BucketStore, TotalDecision},
    types::SizeBucket,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Recompute and upsert on every call. Partial sums are allowed.
    #[default]
    Always,
    /// Compute only while no total exists for the key.
    Gated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The freshly summed total, as stored.
    Upserted { record: BucketRecord },
    /// Gated mode found an existing total and left it untouched.
    Gated { record: BucketRecord },
    /// Nothing to persist: no buckets, or every summed metric is zero.
    Empty,
    /// `require_complete` is set and these sizes have no row yet.
    Incomplete { missing: Vec<SizeBucket> },
}

impl ReconcileOutcome {
    /// The authoritative total after reconciliation, when there is one.
    pub fn record(&self) -> Option<&BucketRecord> {
        match self {
            ReconcileOutcome::Upserted { record } | ReconcileOutcome::Gated { record } => Some(record),
            ReconcileOutcome::Empty | ReconcileOutcome::Incomplete { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Upserted { .. }   => "upserted",
            ReconcileOutcome::Gated { .. }      => "gated",
            ReconcileOutcome::Empty             => "empty",
            ReconcileOutcome::Incomplete { .. } => "incomplete",
        }
    }
}

/// Cooperative stop flag for batch jobs. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyStatus {
    Done { outcome: ReconcileOutcome },
    /// `kind` is `VolumeError::kind()` of the error that stopped the key.
    Failed { kind: String, reason: String },
    /// Not attempted because shutdown was requested.
    Skipped,
}

impl KeyStatus {
    pub fn outcome(&self) -> Option<&ReconcileOutcome> {
        match self {
            KeyStatus::Done { outcome } => Some(outcome),
            KeyStatus::Failed { .. } | KeyStatus::Skipped => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, KeyStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyReport {
    pub key: PeriodKey,
    pub status: KeyStatus,
}

/// Per-key outcomes of a batch, in period-date order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub scope: PeriodScope,
    pub reports: Vec<KeyReport>,
}

impl BatchSummary {
    fn count_outcome(&self, label: &str) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(&r.status, KeyStatus::Done { outcome } if outcome.label() == label))
            .count()
    }

    pub fn upserted(&self) -> usize {
        self.count_outcome("upserted")
    }

    pub fn gated(&self) -> usize {
        self.count_outcome("gated")
    }

    pub fn empty(&self) -> usize {
        self.count_outcome("empty")
    }

    pub fn incomplete(&self) -> usize {
        self.count_outcome("incomplete")
    }

    pub fn skipped(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, KeyStatus::Skipped))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PeriodKey, &str)> {
        self.reports.iter().filter_map(|r| match &r.status {
            KeyStatus::Failed { reason, .. } => Some((&r.key, reason.as_str())),
            _ => None,
        })
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// True when every key was attempted and none failed.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }

    pub fn outcome_for(&self, key: &PeriodKey) -> Option<&KeyStatus> {
        self.reports.iter().find(|r| r.key == *key).map(|r| &r.status)
    }
}

pub struct Reconciler {
    mode: ReconcileMode,
    require_complete: bool,
    workers: usize,
    shutdown: ShutdownSignal,
}

impl Reconciler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            mode: config.mode,
            require_complete: config.require_complete,
            workers: config.workers.max(1),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Share an externally owned stop flag (e.g. the process shutdown hook).
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    // ── Single key ─────────────────────────────────────────────

    /// Aggregate `key`'s buckets and persist the total per the configured mode.
    pub fn reconcile_key<S: BucketStore>(
        &self,
        store: &S,
        key: &PeriodKey,
    ) -> VolumeResult<ReconcileOutcome> {
        let decision = store.write_total(key, |siblings, existing| self.decide(key, siblings, existing))?;
        Ok(match decision {
            TotalDecision::Write(record) => {
                log::debug!("{key}: total upserted, actual_received={}", record.metrics.actual_received);
                ReconcileOutcome::Upserted { record }
            }
            TotalDecision::Keep(outcome) => outcome,
        })
    }

    /// Pick the new total for `key` from what the store holds right now.
    fn decide(
        &self,
        key: &PeriodKey,
        siblings: &[BucketRecord],
        existing: Option<&BucketRecord>,
    ) -> TotalDecision<ReconcileOutcome> {
        if self.mode == ReconcileMode::Gated {
            if let Some(existing) = existing {
                log::debug!("{key}: total exists, gated");
                return TotalDecision::Keep(ReconcileOutcome::Gated {
                    record: existing.clone(),
                });
            }
        }

        let candidate = match aggregate(key, siblings) {
            Aggregate::Empty => {
                log::debug!("{key}: empty aggregate, nothing to persist");
                return TotalDecision::Keep(ReconcileOutcome::Empty);
            }
            Aggregate::Candidate(c) => c,
        };

        if self.require_complete && !candidate.is_complete() {
            log::debug!("{key}: waiting on {} missing size(s)", candidate.missing.len());
            return TotalDecision::Keep(ReconcileOutcome::Incomplete {
                missing: candidate.missing,
            });
        }

        log::debug!("{key}: summed {} bucket(s)", candidate.contributors);
        TotalDecision::Write(candidate.record)
    }

    /// Reconcile `key` and fold any error into the returned status.
    pub fn status_for<S: BucketStore>(&self, store: &S, key: &PeriodKey) -> KeyStatus {
        match self.reconcile_key(store, key) {
            Ok(outcome) => KeyStatus::Done { outcome },
            Err(e) => {
                log::warn!("{key}: reconcile failed: {e}");
                KeyStatus::Failed {
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    // ── Batch ──────────────────────────────────────────────────

    /// Reconcile every key in `scope` that has at least one real bucket.
    ///
    /// Returns `Err` only if the key list itself cannot be read; per-key
    /// failures are recorded in the summary.
    pub fn reconcile_scope<S>(&self, store: &S, scope: &PeriodScope) -> VolumeResult<BatchSummary>
    where
        S: BucketStore + Send,
    {
        let keys = store.period_keys(scope)?;
        let wanted = self.workers.min(keys.len());
        let forks = if wanted > 1 {
            self.fork_workers(store, wanted - 1)
        } else {
            Vec::new()
        };

        log::info!(
            "reconciling {} key(s) in {scope} with {} worker(s)",
            keys.len(),
            forks.len() + 1
        );

        let reports = if forks.is_empty() {
            let next = AtomicUsize::new(0);
            self.drain(store, &keys, &next)
                .into_iter()
                .map(|(_, r)| r)
                .collect()
        } else {
            self.run_parallel(store, forks, &keys)
        };

        let summary = BatchSummary {
            scope: *scope,
            reports,
        };
        log::info!(
            "{scope}: {} upserted, {} gated, {} empty, {} incomplete, {} failed, {} skipped",
            summary.upserted(),
            summary.gated(),
            summary.empty(),
            summary.incomplete(),
            summary.failed(),
            summary.skipped()
        );
        Ok(summary)
    }

    fn fork_workers<S: BucketStore>(&self, store: &S, n: usize) -> Vec<S> {
        let mut forks = Vec::with_capacity(n);
        for _ in 0..n {
            match store.fork() {
                Ok(Some(fork)) => forks.push(fork),
                Ok(None) => {
                    log::debug!("store cannot be shared, running batch on one handle");
                    break;
                }
                Err(e) => {
                    log::warn!("could not open batch worker: {e}");
                    break;
                }
            }
        }
        forks
    }

    fn run_parallel<S>(&self, store: &S, forks: Vec<S>, keys: &[PeriodKey]) -> Vec<KeyReport>
    where
        S: BucketStore + Send,
    {
        let next = AtomicUsize::new(0);
        let mut indexed = thread::scope(|s| {
            let handles: Vec<_> = forks
                .into_iter()
                .map(|fork| {
                    let next = &next;
                    s.spawn(move || self.drain(&fork, keys, next))
                })
                .collect();

            // The caller's handle works alongside the forks.
            let mut all = self.drain(store, keys, &next);
            for handle in handles {
                all.extend(
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                );
            }
            all
        });
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, r)| r).collect()
    }

    /// Pull keys off the shared cursor until none are left.
    fn drain<S: BucketStore>(
        &self,
        store: &S,
        keys: &[PeriodKey],
        next: &AtomicUsize,
    ) -> Vec<(usize, KeyReport)> {
        let mut out = Vec::new();
        loop {
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some(key) = keys.get(i) else { break };
            out.push((i, self.report_for(store, key)));
        }
        out
    }

    fn report_for<S: BucketStore>(&self, store: &S, key: &PeriodKey) -> KeyReport {
        if self.shutdown.is_triggered() {
            return KeyReport {
                key: *key,
                status: KeyStatus::Skipped,
            };
        }
        KeyReport {
            key: *key,
            status: self.status_for(store, key),
        }
    }
}
