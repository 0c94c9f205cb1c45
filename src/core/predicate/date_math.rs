// SPDX-License-Identifier: MIT OR Apache-2.0

//! Date arithmetic for predicate operands: `$dateAdd`, `$dateSubtract`,
//! `$dateDiff`.
//!
//! Month and year arithmetic preserves the day of month where possible and
//! clamps to the last day of the target month otherwise.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// Units accepted by the date-arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DateUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "year" => Some(DateUnit::Year),
            "month" => Some(DateUnit::Month),
            "day" => Some(DateUnit::Day),
            "hour" => Some(DateUnit::Hour),
            "minute" => Some(DateUnit::Minute),
            "second" => Some(DateUnit::Second),
            "millisecond" => Some(DateUnit::Millisecond),
            _ => None,
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn shift_months(start: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let total = start.year() as i64 * 12 + start.month0() as i64 + months;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = start.day().min(days_in_month(year, month));
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => Utc
            .from_utc_datetime(&date.and_time(start.naive_utc().time())),
        None => start,
    }
}

/// `start + amount * unit`. A negative amount subtracts.
pub fn date_add(start: DateTime<Utc>, unit: DateUnit, amount: i64) -> DateTime<Utc> {
    match unit {
        DateUnit::Year => shift_months(start, amount.saturating_mul(12)),
        DateUnit::Month => shift_months(start, amount),
        DateUnit::Day => start + Duration::days(amount),
        DateUnit::Hour => start + Duration::hours(amount),
        DateUnit::Minute => start + Duration::minutes(amount),
        DateUnit::Second => start + Duration::seconds(amount),
        DateUnit::Millisecond => start + Duration::milliseconds(amount),
    }
}

/// `start - amount * unit`.
pub fn date_subtract(start: DateTime<Utc>, unit: DateUnit, amount: i64) -> DateTime<Utc> {
    date_add(start, unit, -amount)
}

/// Number of unit boundaries crossed between `start` and `end` (UTC).
pub fn date_diff(start: DateTime<Utc>, end: DateTime<Utc>, unit: DateUnit) -> i64 {
    match unit {
        DateUnit::Year => end.year() as i64 - start.year() as i64,
        DateUnit::Month => {
            (end.year() as i64 - start.year() as i64) * 12 + end.month() as i64
                - start.month() as i64
        }
        DateUnit::Day => (end.date_naive() - start.date_naive()).num_days(),
        DateUnit::Hour => {
            end.timestamp().div_euclid(3_600) - start.timestamp().div_euclid(3_600)
        }
        DateUnit::Minute => end.timestamp().div_euclid(60) - start.timestamp().div_euclid(60),
        DateUnit::Second => end.timestamp() - start.timestamp(),
        DateUnit::Millisecond => end.timestamp_millis() - start.timestamp_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_add_days_and_smaller_units() {
        let start = at("2024-06-01T12:30:00Z");
        assert_eq!(date_add(start, DateUnit::Day, 3), at("2024-06-04T12:30:00Z"));
        assert_eq!(date_add(start, DateUnit::Hour, -13), at("2024-05-31T23:30:00Z"));
        assert_eq!(
            date_add(start, DateUnit::Millisecond, 250),
            at("2024-06-01T12:30:00.250Z")
        );
    }

    #[test]
    fn test_month_arithmetic_clamps_to_month_end() {
        // 2024-01-31 + 1 month = 2024-02-29 (leap year)
        assert_eq!(
            date_add(at("2024-01-31T00:00:00Z"), DateUnit::Month, 1),
            at("2024-02-29T00:00:00Z")
        );
        // non-leap February
        assert_eq!(
            date_add(at("2023-01-31T00:00:00Z"), DateUnit::Month, 1),
            at("2023-02-28T00:00:00Z")
        );
        // day preserved where possible
        assert_eq!(
            date_add(at("2024-01-15T06:00:00Z"), DateUnit::Month, 1),
            at("2024-02-15T06:00:00Z")
        );
    }

    #[test]
    fn test_month_arithmetic_across_year_boundary() {
        assert_eq!(
            date_add(at("2024-11-30T00:00:00Z"), DateUnit::Month, 3),
            at("2025-02-28T00:00:00Z")
        );
        assert_eq!(
            date_add(at("2024-03-31T00:00:00Z"), DateUnit::Month, -1),
            at("2024-02-29T00:00:00Z")
        );
    }

    #[test]
    fn test_year_arithmetic_clamps_leap_day() {
        assert_eq!(
            date_add(at("2024-02-29T00:00:00Z"), DateUnit::Year, 1),
            at("2025-02-28T00:00:00Z")
        );
    }

    #[test]
    fn test_subtract_is_negative_add() {
        let start = at("2024-06-15T00:00:00Z");
        assert_eq!(
            date_subtract(start, DateUnit::Day, 7),
            date_add(start, DateUnit::Day, -7)
        );
    }

    #[test]
    fn test_diff_counts_boundaries_crossed() {
        assert_eq!(
            date_diff(at("2024-05-31T23:59:00Z"), at("2024-06-01T00:01:00Z"), DateUnit::Day),
            1
        );
        assert_eq!(
            date_diff(at("2024-06-01T00:00:00Z"), at("2024-06-01T23:59:59Z"), DateUnit::Day),
            0
        );
        assert_eq!(
            date_diff(at("2023-12-15T00:00:00Z"), at("2024-01-05T00:00:00Z"), DateUnit::Month),
            1
        );
        assert_eq!(
            date_diff(at("2023-06-01T00:00:00Z"), at("2024-06-01T00:00:00Z"), DateUnit::Year),
            1
        );
        assert_eq!(
            date_diff(at("2024-06-01T00:00:30Z"), at("2024-06-01T00:01:10Z"), DateUnit::Minute),
            1
        );
    }

    #[test]
    fn test_diff_is_signed() {
        assert_eq!(
            date_diff(at("2024-06-05T00:00:00Z"), at("2024-06-01T00:00:00Z"), DateUnit::Day),
            -4
        );
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!(DateUnit::parse("day"), Some(DateUnit::Day));
        assert_eq!(DateUnit::parse("millisecond"), Some(DateUnit::Millisecond));
        assert_eq!(DateUnit::parse("fortnight"), None);
    }
}
