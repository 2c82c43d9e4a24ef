//! Bucket records: one row of raw-material intake per (period key, size).

use crate::{
    derived::DerivedFields,
    error::{VolumeError, VolumeResult},
    period::PeriodKey,
    types::{RecordId, SizeBucket},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The six authored metric fields. `excess` and `comp_to_master_plan`
/// are derived and deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Abp,
    MasterPlan,
    ActualReceived,
    WRequirements,
    AdvanceProd,
    Safekeep,
}

impl MetricField {
    pub const ALL: [MetricField; 6] = [
        MetricField::Abp,
        MetricField::MasterPlan,
        MetricField::ActualReceived,
        MetricField::WRequirements,
        MetricField::AdvanceProd,
        MetricField::Safekeep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Abp            => "abp",
            MetricField::MasterPlan     => "master_plan",
            MetricField::ActualReceived => "actual_received",
            MetricField::WRequirements  => "w_requirements",
            MetricField::AdvanceProd    => "advance_prod",
            MetricField::Safekeep       => "safekeep",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if let Some(field) = MetricField::ALL.iter().find(|f| f.as_str() == wanted) {
            return Ok(*field);
        }
        let reason = match wanted.as_str() {
            "excess" | "comp_to_master_plan" => "derived field is not editable",
            _ => "unknown metric field",
        };
        Err(VolumeError::validation(s.to_string(), reason))
    }
}

/// Raw, authored metrics. All values are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawMetrics {
    #[serde(default)]
    pub abp: f64,
    #[serde(default)]
    pub master_plan: f64,
    #[serde(default)]
    pub actual_received: f64,
    #[serde(default)]
    pub w_requirements: f64,
    #[serde(default)]
    pub advance_prod: f64,
    #[serde(default)]
    pub safekeep: f64,
}

impl RawMetrics {
    pub fn get(&self, field: MetricField) -> f64 {
        match field {
            MetricField::Abp            => self.abp,
            MetricField::MasterPlan     => self.master_plan,
            MetricField::ActualReceived => self.actual_received,
            MetricField::WRequirements  => self.w_requirements,
            MetricField::AdvanceProd    => self.advance_prod,
            MetricField::Safekeep       => self.safekeep,
        }
    }

    pub fn set(&mut self, field: MetricField, value: f64) {
        let slot = match field {
            MetricField::Abp            => &mut self.abp,
            MetricField::MasterPlan     => &mut self.master_plan,
            MetricField::ActualReceived => &mut self.actual_received,
            MetricField::WRequirements  => &mut self.w_requirements,
            MetricField::AdvanceProd    => &mut self.advance_prod,
            MetricField::Safekeep       => &mut self.safekeep,
        };
        *slot = value;
    }

    /// Pointwise add. Non-finite values contribute nothing.
    pub fn accumulate(&mut self, other: &RawMetrics) {
        for field in MetricField::ALL {
            let v = other.get(field);
            if v.is_finite() {
                self.set(field, self.get(field) + v);
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        MetricField::ALL.iter().all(|f| self.get(*f) == 0.0)
    }

    pub fn validate(&self) -> VolumeResult<()> {
        for field in MetricField::ALL {
            validate_metric(field, self.get(field))?;
        }
        Ok(())
    }
}

/// A single metric value must be a finite, non-negative number.
pub fn validate_metric(field: MetricField, value: f64) -> VolumeResult<()> {
    if !value.is_finite() {
        return Err(VolumeError::validation(field.as_str(), "value must be a finite number"));
    }
    if value < 0.0 {
        return Err(VolumeError::validation(
            field.as_str(),
            format!("value must be non-negative, got {value}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// `None` until the store assigns one.
    pub id: Option<RecordId>,
    #[serde(flatten)]
    pub key: PeriodKey,
    pub size: SizeBucket,
    #[serde(flatten)]
    pub metrics: RawMetrics,
    #[serde(flatten)]
    pub derived: DerivedFields,
}

impl BucketRecord {
    /// A blank row: all metrics zero.
    pub fn blank(key: PeriodKey, size: SizeBucket) -> Self {
        Self::with_metrics(key, size, RawMetrics::default())
    }

    /// Build a record and compute its derived fields.
    pub fn with_metrics(key: PeriodKey, size: SizeBucket, metrics: RawMetrics) -> Self {
        Self {
            id: None,
            key,
            size,
            derived: DerivedFields::compute(&metrics),
            metrics,
        }
    }

    /// Recompute derived fields from the current raw metrics.
    pub fn refresh_derived(&mut self) {
        self.derived = DerivedFields::compute(&self.metrics);
    }

    /// Reject records that must not reach the store.
    pub fn validate(&self) -> VolumeResult<()> {
        self.metrics.validate()
    }
}
