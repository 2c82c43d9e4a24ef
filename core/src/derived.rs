//! Derived field calculator.
//!
//! `excess` and `comp_to_master_plan` are never authored. They are
//! recomputed from `actual_received` and `master_plan` every time those
//! change, for real buckets and aggregated totals alike.

use crate::record::RawMetrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedFields {
    pub excess: f64,
    pub comp_to_master_plan: f64,
}

impl DerivedFields {
    pub fn compute(metrics: &RawMetrics) -> Self {
        Self {
            excess: excess(metrics.actual_received, metrics.master_plan),
            comp_to_master_plan: comp_to_master_plan(metrics.actual_received, metrics.master_plan),
        }
    }
}

/// `max(actual_received - master_plan, 0)`, rounded to a whole unit.
pub fn excess(actual_received: f64, master_plan: f64) -> f64 {
    let diff = (actual_received - master_plan).round();
    if diff.is_finite() && diff > 0.0 {
        diff
    } else {
        0.0
    }
}

/// Percentage of master plan received, rounded. Zero when there is no plan.
pub fn comp_to_master_plan(actual_received: f64, master_plan: f64) -> f64 {
    if master_plan.is_nan() || master_plan <= 0.0 {
        return 0.0;
    }
    let pct = (actual_received / master_plan * 100.0).round();
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}
