//! Scope-wide reconciliation: per-key failure isolation, shutdown, and
//! the multi-connection path on a file database.

mod common;

use common::{monthly_key, plan, put, FailingStore, TripwireStore};
use rmvolume_core::{
    aggregator::{aggregate, Aggregate},
    config::EngineConfig,
    engine::VolumeEngine,
    period::PeriodScope,
    reconciler::{BatchSummary, KeyStatus, ReconcileMode, ShutdownSignal},
    sample,
    store::BucketStore,
    types::{Cadence, SizeBucket},
};

fn fill_months<S: BucketStore>(engine: &VolumeEngine<S>, months: u32) {
    for m in 1..=months {
        let key = monthly_key(2024, m, 28);
        put(engine, key, SizeBucket::Below100g, plan(10.0 * m as f64, 10.0));
        put(engine, key, SizeBucket::Above720g, plan(5.0, 5.0));
    }
}

#[test]
fn one_failing_key_does_not_stop_the_batch() {
    let bad = monthly_key(2024, 3, 28);
    let engine =
        VolumeEngine::new(EngineConfig::default_test(), FailingStore::new(bad.period_date)).unwrap();
    fill_months(&engine, 5);

    let summary = engine.reconcile_scope(&bad.scope()).unwrap();
    assert_eq!(summary.reports.len(), 5);
    assert_eq!(summary.upserted(), 4);
    assert_eq!(summary.failed(), 1);
    assert!(!summary.is_clean());

    match summary.outcome_for(&bad) {
        Some(KeyStatus::Failed { kind, reason }) => {
            assert_eq!(*kind, "persistence");
            assert!(reason.contains("injected"), "{reason}");
        }
        other => panic!("expected failure for {bad}, got {other:?}"),
    }
    assert!(engine.store().read_total(&bad).unwrap().is_none());

    let totals = engine.totals(&bad.scope()).unwrap();
    assert_eq!(totals.len(), 4);
    assert!(totals.iter().all(|t| t.key != bad));
}

#[test]
fn shutdown_before_batch_skips_everything() {
    let engine = VolumeEngine::build_test().unwrap();
    fill_months(&engine, 3);
    engine.shutdown_signal().trigger();

    let scope = PeriodScope::new(Cadence::Monthly, 2024);
    let summary = engine.reconcile_scope(&scope).unwrap();
    assert_eq!(summary.skipped(), 3);
    assert_eq!(summary.upserted(), 0);
    assert!(engine.totals(&scope).unwrap().is_empty());
}

#[test]
fn shutdown_mid_batch_leaves_finished_keys_in_place() {
    let signal = ShutdownSignal::new();
    let engine = VolumeEngine::new(EngineConfig::default_test(), TripwireStore::new(signal.clone(), 2))
        .unwrap()
        .with_shutdown(signal);
    fill_months(&engine, 6);

    let scope = PeriodScope::new(Cadence::Monthly, 2024);
    let summary = engine.reconcile_scope(&scope).unwrap();
    assert_eq!(summary.upserted(), 2);
    assert_eq!(summary.skipped(), 4);
    assert_eq!(summary.failed(), 0);

    let done: Vec<_> = engine.totals(&scope).unwrap().into_iter().map(|t| t.key).collect();
    assert_eq!(done, vec![monthly_key(2024, 1, 28), monthly_key(2024, 2, 28)]);
}

#[test]
fn gated_batch_keeps_existing_totals() {
    let engine = VolumeEngine::build_test_with(
        EngineConfig::default_test().with_mode(ReconcileMode::Gated),
    )
    .unwrap();
    fill_months(&engine, 2);
    let scope = PeriodScope::new(Cadence::Monthly, 2024);

    let first = engine.reconcile_scope(&scope).unwrap();
    assert_eq!(first.upserted(), 2);

    put(&engine, monthly_key(2024, 1, 28), SizeBucket::From350To450g, plan(99.0, 0.0));
    let second = engine.reconcile_scope(&scope).unwrap();
    assert_eq!(second.gated(), 2);
    assert_eq!(second.upserted(), 0);

    let jan = engine.store().read_total(&monthly_key(2024, 1, 28)).unwrap().unwrap();
    assert_eq!(jan.metrics.actual_received, 15.0);
}

#[test]
fn parallel_batch_on_file_db_matches_sequential_aggregate() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.db");
    let engine = VolumeEngine::open(
        path.to_str().unwrap(),
        EngineConfig::default_test().with_workers(4),
    )
    .unwrap();

    let scope = PeriodScope::new(Cadence::Monthly, 2023);
    let created = sample::seed_scope(&engine, &scope, 12, 7).unwrap();
    assert_eq!(created, 12 * SizeBucket::REAL.len());

    let summary = engine.reconcile_scope(&scope).unwrap();
    assert!(summary.is_clean(), "{summary:?}");

    let keys = engine.store().period_keys(&scope).unwrap();
    assert_eq!(keys.len(), 12);
    let reported: Vec<_> = summary.reports.iter().map(|r| r.key).collect();
    assert_eq!(reported, keys, "reports follow period-date order");

    for key in &keys {
        let siblings = engine.store().read_siblings(key).unwrap();
        let stored = engine.store().read_total(key).unwrap();
        match aggregate(key, &siblings) {
            Aggregate::Empty => assert!(stored.is_none(), "{key}"),
            Aggregate::Candidate(c) => {
                let stored = stored.unwrap_or_else(|| panic!("{key}: missing total"));
                assert_eq!(stored.metrics, c.record.metrics, "{key}");
                assert_eq!(stored.derived, c.record.derived, "{key}");
            }
        }
    }

    // A second pass rewrites the same values under the same ids.
    let before = engine.totals(&scope).unwrap();
    engine.reconcile_scope(&scope).unwrap();
    assert_eq!(engine.totals(&scope).unwrap(), before);
}

#[test]
fn memory_paths_run_the_batch_on_one_connection() {
    for path in [":memory:", "file:batch_mem?mode=memory&cache=shared"] {
        let engine = VolumeEngine::open(path, EngineConfig::default()).unwrap();
        assert_eq!(engine.config().workers, 4);
        assert!(engine.store().path().is_none(), "{path}");
        assert!(engine.store().fork().unwrap().is_none(), "{path}");
        fill_months(&engine, 8);

        let scope = PeriodScope::new(Cadence::Monthly, 2024);
        let summary = engine.reconcile_scope(&scope).unwrap();
        assert!(summary.is_clean(), "{path}: {summary:?}");
        assert_eq!(summary.upserted(), 8, "{path}");
    }
}

#[test]
fn forked_file_handles_see_the_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fork.db");
    let engine = VolumeEngine::open(path.to_str().unwrap(), EngineConfig::default()).unwrap();
    let fork = engine.store().fork().unwrap().expect("file stores fork");
    assert_eq!(fork.path(), engine.store().path());
    assert!(fork.period_keys(&PeriodScope::new(Cadence::Daily, 2024)).unwrap().is_empty());
}

#[test]
fn batch_summary_survives_json() {
    let bad = monthly_key(2024, 2, 28);
    let engine =
        VolumeEngine::new(EngineConfig::default_test(), FailingStore::new(bad.period_date)).unwrap();
    fill_months(&engine, 3);
    let summary = engine.reconcile_scope(&bad.scope()).unwrap();

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains(r#""status":"failed""#), "{json}");
    assert!(json.contains(r#""outcome":"upserted""#), "{json}");

    let back: BatchSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);
    assert_eq!(back.failed(), 1);
    assert_eq!(back.upserted(), 2);
}
