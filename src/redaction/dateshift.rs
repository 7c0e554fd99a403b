//! Per-subject date shifting
//!
//! All temporal fields of a subject move by the same constant offset, so the
//! relative order of events and the intervals between them survive
//! de-identification.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Shift a date by the subject's offset
pub fn shift_date(date: NaiveDate, offset_days: i64) -> NaiveDate {
    date + Duration::days(offset_days)
}

/// Shift a date-time by the subject's offset
pub fn shift_datetime(at: DateTime<Utc>, offset_days: i64) -> DateTime<Utc> {
    at + Duration::days(offset_days)
}
