//! Date and time handling for record fields.
//!
//! Record fields carry dates as `YYYYMMDD` strings and timestamps as
//! `YYYYMMDDHHMMSS` strings. Values are parsed into `chrono` types at the
//! point arithmetic is needed and formatted straight back.

use chrono::{NaiveDate, NaiveDateTime};

use crate::{EpsError, EpsResult};

pub const DATE_FORMAT: &str = "%Y%m%d";
pub const DATE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Sentinel used when no activity date applies. Sorts after every real date.
pub const MAX_ACTIVITY_DATE: &str = "99991231";

pub fn parse_date(value: &str) -> EpsResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| EpsError::InvalidDate(value.to_owned()))
}

pub fn parse_date_time(value: &str) -> EpsResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
        .map_err(|_| EpsError::InvalidDate(value.to_owned()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_date_time(date_time: NaiveDateTime) -> String {
    date_time.format(DATE_TIME_FORMAT).to_string()
}

/// The date part of a timestamp string. Plain dates pass through unchanged.
pub fn date_part(value: &str) -> &str {
    if value.len() > 8 {
        &value[..8]
    } else {
        value
    }
}
