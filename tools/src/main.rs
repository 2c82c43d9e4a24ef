//! volume-runner: headless driver for the raw-material volume engine.
//!
//! Usage:
//!   volume-runner --db rm.db --period monthly --year 2024 --seed 42 --rows 12
//!   volume-runner --db rm.db --period weekly --year 2024 --add-row 260g-350g
//!   volume-runner --db rm.db --period daily --year 2024 --edit 17 --field master_plan --value 40
//!   volume-runner --db rm.db --period monthly --year 2024 --mode gated --workers 8 --json
//!   volume-runner --db rm.db --period monthly --year 2024 --config data/engine.json

use anyhow::{bail, Result};
use rmvolume_core::{
    config::EngineConfig,
    engine::VolumeEngine,
    period::PeriodScope,
    reconciler::{BatchSummary, KeyStatus, ReconcileMode},
    record::{BucketRecord, MetricField},
    sample,
    types::{Cadence, SizeBucket},
};
use std::env;

#[derive(serde::Serialize)]
struct RunReport {
    scope: PeriodScope,
    seeded: Option<usize>,
    added: Option<BucketRecord>,
    edited: Option<rmvolume_core::engine::EditResult>,
    batch: BatchSummary,
    totals: Vec<BucketRecord>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag(&args, "--db").unwrap_or("rm_volume.db");
    let period: Cadence = flag(&args, "--period").unwrap_or("monthly").parse()?;
    let year = parse_arg(&args, "--year", 2024i32);
    let json = args.iter().any(|a| a == "--json");

    let mut config = match flag(&args, "--config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(mode) = flag(&args, "--mode") {
        config.mode = match mode {
            "always" => ReconcileMode::Always,
            "gated" => ReconcileMode::Gated,
            other => bail!("unknown mode '{other}' (expected always or gated)"),
        };
    }
    config.workers = parse_arg(&args, "--workers", config.workers);

    if !json {
        println!("rm-volume: volume-runner");
        println!("  db:        {db}");
        println!("  scope:     {period}/{year}");
        println!("  mode:      {:?}", config.mode);
        println!("  workers:   {}", config.workers);
        println!();
    }

    let engine = VolumeEngine::open(db, config)?;
    log::info!("opened {}", engine.store().path().unwrap_or(":memory:"));
    let scope = PeriodScope::new(period, year);

    let seeded = match flag(&args, "--seed") {
        Some(raw) => {
            let seed: u64 = raw.parse()?;
            let rows = parse_arg(&args, "--rows", 12i64);
            Some(sample::seed_scope(&engine, &scope, rows, seed)?)
        }
        None => None,
    };

    let added = match flag(&args, "--add-row") {
        Some(raw) => {
            let size: SizeBucket = raw.parse()?;
            Some(engine.add_row(size, period, year)?)
        }
        None => None,
    };

    let edited = match flag(&args, "--edit") {
        Some(raw) => {
            let id: i64 = raw.parse()?;
            let Some(field) = flag(&args, "--field") else {
                bail!("--edit needs --field");
            };
            let field: MetricField = field.parse()?;
            let Some(value) = flag(&args, "--value") else {
                bail!("--edit needs --value");
            };
            Some(engine.edit_field(id, field, value.parse()?)?)
        }
        None => None,
    };

    let batch = engine.reconcile_scope(&scope)?;
    let totals = engine.totals(&scope)?;
    let failed = batch.failed();

    if json {
        let report = RunReport {
            scope,
            seeded,
            added,
            edited,
            batch,
            totals,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(seeded, added.as_ref(), &batch, &totals);
    }

    if failed > 0 {
        bail!("{failed} period(s) failed to reconcile");
    }
    Ok(())
}

fn print_summary(
    seeded: Option<usize>,
    added: Option<&BucketRecord>,
    batch: &BatchSummary,
    totals: &[BucketRecord],
) {
    if let Some(n) = seeded {
        println!("  seeded rows:    {n}");
    }
    if let Some(r) = added {
        println!("  added row:      {} {} (id {:?})", r.size, r.key.period_date, r.id);
    }

    println!("=== RECONCILE SUMMARY ===");
    println!("  scope:          {}", batch.scope);
    println!("  keys:           {}", batch.reports.len());
    println!("  upserted:       {}", batch.upserted());
    println!("  gated:          {}", batch.gated());
    println!("  empty:          {}", batch.empty());
    println!("  incomplete:     {}", batch.incomplete());
    println!("  failed:         {}", batch.failed());
    for report in &batch.reports {
        if let KeyStatus::Failed { kind, reason } = &report.status {
            println!("    {} [{kind}] {reason}", report.key);
        }
    }

    println!();
    println!("=== TOTAL VOLUME ===");
    if totals.is_empty() {
        println!("  (no totals yet)");
    }
    for t in totals {
        println!(
            "  {} | actual {:>8.0} | plan {:>8.0} | excess {:>6.0} | comp {:>4.0}%",
            t.key.period_date,
            t.metrics.actual_received,
            t.metrics.master_plan,
            t.derived.excess,
            t.derived.comp_to_master_plan
        );
    }
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == name)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
