//! Period capacity generator: where the next row of a size bucket lands
//! inside a (cadence, year), and when the year is full.

use crate::{
    error::{VolumeError, VolumeResult},
    period::PeriodScope,
    types::{Cadence, Year},
};
use chrono::{Datelike, Days, NaiveDate};

/// `period_date` for the row that follows `count` existing rows.
///
/// - monthly: last day of month `count + 1`
/// - weekly:  Jan 1 + `count * 7 + 6` days
/// - daily:   Jan 1 + `count` days
pub fn next_period_date(cadence: Cadence, year: Year, count: i64) -> VolumeResult<NaiveDate> {
    if count < 0 {
        return Err(VolumeError::validation(
            "count",
            format!("row count must be non-negative, got {count}"),
        ));
    }

    let capacity = cadence.capacity();
    let exceeded = || VolumeError::CapacityExceeded {
        cadence,
        year,
        count,
        capacity,
    };
    if count >= capacity {
        return Err(exceeded());
    }

    let jan_1 = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| VolumeError::validation("period_year", format!("year {year} out of range")))?;

    // count < capacity <= 366, so the conversions below cannot truncate.
    let date = match cadence {
        Cadence::Monthly => last_day_of_month(year, count as u32 + 1),
        Cadence::Weekly => jan_1.checked_add_days(Days::new(count as u64 * 7 + 6)),
        Cadence::Daily => jan_1.checked_add_days(Days::new(count as u64)),
    }
    .ok_or_else(|| VolumeError::validation("period_year", format!("year {year} out of range")))?;

    // Day 366 of a non-leap year would land in the following year.
    if cadence == Cadence::Daily && date.year() != year {
        return Err(exceeded());
    }
    Ok(date)
}

/// Convenience over a scope.
pub fn next_in_scope(scope: &PeriodScope, count: i64) -> VolumeResult<NaiveDate> {
    next_period_date(scope.period_type, scope.period_year, count)
}

fn last_day_of_month(year: Year, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next?.pred_opt()
}
