//! Period identity: which reporting instant a record belongs to.

use crate::types::{Cadence, Year};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// (cadence, year, date): one reporting instant. All real buckets sharing
/// a key are summed into that key's `total_volume` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub period_type: Cadence,
    pub period_year: Year,
    pub period_date: NaiveDate,
}

impl PeriodKey {
    pub fn new(period_type: Cadence, period_year: Year, period_date: NaiveDate) -> Self {
        Self {
            period_type,
            period_year,
            period_date,
        }
    }

    /// Key whose year is taken from the date itself.
    pub fn for_date(period_type: Cadence, period_date: NaiveDate) -> Self {
        Self::new(period_type, period_date.year(), period_date)
    }

    pub fn scope(&self) -> PeriodScope {
        PeriodScope::new(self.period_type, self.period_year)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.period_type, self.period_year, self.period_date)
    }
}

/// (cadence, year): the unit of batch reconciliation and row capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodScope {
    pub period_type: Cadence,
    pub period_year: Year,
}

impl PeriodScope {
    pub fn new(period_type: Cadence, period_year: Year) -> Self {
        Self {
            period_type,
            period_year,
        }
    }

    pub fn key(&self, period_date: NaiveDate) -> PeriodKey {
        PeriodKey::new(self.period_type, self.period_year, period_date)
    }
}

impl fmt::Display for PeriodScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.period_type, self.period_year)
    }
}
