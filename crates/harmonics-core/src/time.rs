//! Time axis: timestamps as fractional years since the Unix epoch.
//!
//! The regression's `t` covariate and every harmonic angle are expressed in
//! these units, so a base frequency `omega = 1.0` is one cycle per year.

use chrono::{DateTime, Utc};

/// Length of the year used for the time axis (Julian year).
pub const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

/// Fractional years elapsed since 1970-01-01T00:00:00Z. Negative before the epoch.
pub fn decimal_years_since_epoch(ts: DateTime<Utc>) -> f64 {
    let secs = ts.timestamp() as f64 + ts.timestamp_subsec_nanos() as f64 * 1e-9;
    secs / SECONDS_PER_YEAR
}

/// Inverse of [`decimal_years_since_epoch`], to the nearest nanosecond.
/// Returns `None` for non-finite or out-of-range inputs.
pub fn from_decimal_years(years: f64) -> Option<DateTime<Utc>> {
    if !years.is_finite() {
        return None;
    }
    let secs = years * SECONDS_PER_YEAR;
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    if whole.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(whole as i64, nanos)
}
