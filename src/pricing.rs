// Booking price computation: inclusive day count times the daily rate.
// One formula everywhere. Create and edit must price the same range the
// same way, which the workflow tests assert.

use chrono::NaiveDate;

use crate::domain::DateRange;

// Inclusive whole-day count: a same-day booking is one day, Mon-Tue is two.
pub fn day_count(from: NaiveDate, to: NaiveDate) -> i64 {
    DateRange::new(from, to).day_count()
}

// amount = inclusive day count * daily rate. The rate is already in major
// currency units; no proration, discounts, or taxes.
pub fn compute_amount(from: NaiveDate, to: NaiveDate, daily_rate: f64) -> f64 {
    day_count(from, to) as f64 * daily_rate
}
