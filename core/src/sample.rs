//! Deterministic demo data.
//!
//! RULE: demo figures never come from a platform RNG. The same seed
//! always produces the same intake year, so demo databases are
//! reproducible.

use crate::{
    engine::VolumeEngine,
    error::VolumeResult,
    period::PeriodScope,
    record::RawMetrics,
    store::BucketStore,
    types::SizeBucket,
};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct SampleRng {
    inner: Pcg64Mcg,
}

impl SampleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Whole-unit value in [lo, hi).
    pub fn units(&mut self, lo: f64, hi: f64) -> f64 {
        (lo + (hi - lo) * self.next_f64()).floor()
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// One plausible row of intake figures.
pub fn sample_metrics(rng: &mut SampleRng) -> RawMetrics {
    let master_plan = rng.units(20.0, 120.0);
    let abp = (master_plan * (0.9 + 0.2 * rng.next_f64())).floor();
    let actual_received = (master_plan * (0.6 + 0.8 * rng.next_f64())).floor();
    let w_requirements = (actual_received * (0.5 + 0.4 * rng.next_f64())).floor();
    RawMetrics {
        abp,
        master_plan,
        actual_received,
        w_requirements,
        advance_prod: rng.units(0.0, 15.0),
        safekeep: rng.units(0.0, 10.0),
    }
}

/// Fill `rows_per_size` rows of every real size in `scope` with demo
/// figures. Roughly one row in ten is left blank to mimic partial entry.
/// Writes go straight to the store; reconcile the scope afterwards.
///
/// Returns the number of rows created.
pub fn seed_scope<S: BucketStore>(
    engine: &VolumeEngine<S>,
    scope: &PeriodScope,
    rows_per_size: i64,
    seed: u64,
) -> VolumeResult<usize> {
    let mut rng = SampleRng::new(seed);
    let mut created = 0usize;
    for size in SizeBucket::REAL {
        for _ in 0..rows_per_size {
            let mut record = engine.add_row(size, scope.period_type, scope.period_year)?;
            created += 1;
            if rng.chance(0.1) {
                continue;
            }
            record.metrics = sample_metrics(&mut rng);
            record.refresh_derived();
            engine.store().update_metrics(&record)?;
        }
    }
    log::info!("seeded {created} row(s) in {scope} from seed {seed}");
    Ok(created)
}
