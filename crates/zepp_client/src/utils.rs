//! Date and time helpers shared by the fetcher, decoder and pipeline.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Vendor date format used in query parameters and `date_time` fields.
pub const VENDOR_DATE_FORMAT: &str = "%Y-%m-%d";

/// Midnight (UTC) at the start of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Midnight at the end of `date` (the start of the following day).
pub fn day_end(date: NaiveDate) -> DateTime<Utc> {
    day_start(date) + Duration::days(1)
}

/// Timestamp for a day's counters: the last second of `date`, or `now` while
/// the day is still running.
pub fn day_stamp(date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    (day_end(date) - Duration::seconds(1)).min(now)
}

/// The inclusive range of dates covered by a trailing window of `days` days
/// ending on `today`.
pub fn query_window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let span = i64::from(days.max(1)) - 1;
    (today - Duration::days(span), today)
}

/// Every date from `start` to `end`, inclusive, ascending.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

pub fn parse_vendor_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), VENDOR_DATE_FORMAT).ok()
}

pub fn format_vendor_date(date: NaiveDate) -> String {
    date.format(VENDOR_DATE_FORMAT).to_string()
}
