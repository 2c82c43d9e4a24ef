//! Aggregator. Folds the real buckets of one period key into a candidate
//! `total_volume` record.
//!
//! Derived fields of the candidate are recomputed from the summed raw
//! metrics; per-bucket derived values are never summed.

use crate::{
    period::PeriodKey,
    record::{BucketRecord, RawMetrics},
    types::SizeBucket,
};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// No contributing buckets, or every summed metric is zero.
    /// Nothing may be persisted for this key.
    Empty,
    Candidate(Candidate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// `size == TotalVolume`, `id == None`.
    pub record: BucketRecord,
    /// Number of real bucket records that were summed.
    pub contributors: usize,
    /// Real sizes with no record for this key.
    pub missing: Vec<SizeBucket>,
}

impl Candidate {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Sum `siblings` into a candidate total for `key`.
///
/// Records of other keys and any existing `total_volume` record are ignored.
pub fn aggregate(key: &PeriodKey, siblings: &[BucketRecord]) -> Aggregate {
    let mut sum = RawMetrics::default();
    let mut present = BTreeSet::new();
    let mut contributors = 0usize;

    for record in siblings
        .iter()
        .filter(|r| r.key == *key && !r.size.is_total())
    {
        sum.accumulate(&record.metrics);
        present.insert(record.size);
        contributors += 1;
    }

    if contributors == 0 || sum.is_zero() {
        return Aggregate::Empty;
    }

    let missing = SizeBucket::REAL
        .iter()
        .filter(|s| !present.contains(*s))
        .copied()
        .collect();

    Aggregate::Candidate(Candidate {
        record: BucketRecord::with_metrics(*key, SizeBucket::TotalVolume, sum),
        contributors,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cadence;
    use chrono::NaiveDate;

    fn key(day: u32) -> PeriodKey {
        PeriodKey::for_date(Cadence::Daily, NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
    }

    fn rec(key: PeriodKey, size: SizeBucket, actual: f64, plan: f64) -> BucketRecord {
        BucketRecord::with_metrics(
            key,
            size,
            RawMetrics {
                actual_received: actual,
                master_plan: plan,
                ..Default::default()
            },
        )
    }

    #[test]
    fn ignores_foreign_keys_and_existing_totals() {
        let k = key(1);
        let siblings = vec![
            rec(k, SizeBucket::Below100g, 10.0, 5.0),
            rec(k, SizeBucket::TotalVolume, 999.0, 999.0),
            rec(key(2), SizeBucket::Above720g, 500.0, 1.0),
        ];
        let Aggregate::Candidate(c) = aggregate(&k, &siblings) else {
            panic!("expected a candidate");
        };
        assert_eq!(c.contributors, 1);
        assert_eq!(c.record.metrics.actual_received, 10.0);
        assert_eq!(c.record.metrics.master_plan, 5.0);
        assert_eq!(c.missing.len(), SizeBucket::REAL.len() - 1);
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(aggregate(&key(1), &[]), Aggregate::Empty);
    }
}
