// Granularity levels and calendar-correct time bucketing
use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::series::SeriesPoint;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularityLevel {
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Padded x-axis extent for a rendered series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisBounds {
    pub min_ms: i64,
    pub max_ms: i64,
    pub min_interval_ms: i64,
}

impl GranularityLevel {
    pub const ALL: [GranularityLevel; 5] = [
        GranularityLevel::Minute,
        GranularityLevel::Hour,
        GranularityLevel::Day,
        GranularityLevel::Month,
        GranularityLevel::Year,
    ];

    /// Floors `timestamp_ms` to the start of its UTC bucket.
    ///
    /// Month and year use calendar arithmetic: the result is day 1 of the
    /// containing month (or January 1st), never a fixed number of days back.
    pub fn align(self, timestamp_ms: i64) -> i64 {
        match self {
            GranularityLevel::Minute => floor_to(timestamp_ms, MINUTE_MS),
            GranularityLevel::Hour => floor_to(timestamp_ms, HOUR_MS),
            GranularityLevel::Day => floor_to(timestamp_ms, DAY_MS),
            GranularityLevel::Month | GranularityLevel::Year => {
                let Some(instant) = DateTime::from_timestamp_millis(timestamp_ms) else {
                    return timestamp_ms;
                };
                let month = if self == GranularityLevel::Month {
                    instant.month()
                } else {
                    1
                };
                NaiveDate::from_ymd_opt(instant.year(), month, 1)
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|start| start.and_utc().timestamp_millis())
                    .unwrap_or(timestamp_ms)
            }
        }
    }

    /// Nominal bucket width, for axis padding only.
    pub fn duration_ms(self) -> i64 {
        match self {
            GranularityLevel::Minute => MINUTE_MS,
            GranularityLevel::Hour => HOUR_MS,
            GranularityLevel::Day => DAY_MS,
            GranularityLevel::Month => 2_628_000_000,
            GranularityLevel::Year => 31_540_000_000,
        }
    }

    /// Smallest spacing between two axis labels at this level.
    pub fn min_label_interval_ms(self) -> i64 {
        match self {
            GranularityLevel::Minute => 5 * MINUTE_MS,
            GranularityLevel::Hour => HOUR_MS,
            GranularityLevel::Day => DAY_MS,
            GranularityLevel::Month => 30 * DAY_MS,
            GranularityLevel::Year => 365 * DAY_MS,
        }
    }

    /// Moves one level along minute..year, clamped at both ends.
    pub fn step(self, direction: Direction) -> GranularityLevel {
        let index = self.index();
        let next = match direction {
            Direction::Up => (index + 1).min(Self::ALL.len() - 1),
            Direction::Down => index.saturating_sub(1),
        };
        Self::ALL[next]
    }

    /// Name the historical backend expects for `aggregation_level`.
    pub fn backend_name(self) -> &'static str {
        match self {
            GranularityLevel::Minute => "minute",
            GranularityLevel::Hour => "hourly",
            GranularityLevel::Day => "daily",
            GranularityLevel::Month => "monthly",
            GranularityLevel::Year => "yearly",
        }
    }

    /// Floors the start of a range to its bucket, swapping the ends when
    /// inverted. The end never moves backward, so the last partial bucket is
    /// still covered.
    pub fn align_range(self, start_ms: i64, end_ms: i64) -> (i64, i64) {
        let (start_ms, end_ms) = if start_ms > end_ms {
            (end_ms, start_ms)
        } else {
            (start_ms, end_ms)
        };
        let start = self.align(start_ms);
        let end = end_ms.max(start);
        (start, end)
    }

    /// Pads the first and last point by one bucket width. `None` for an empty series.
    pub fn axis_bounds(self, points: &[SeriesPoint]) -> Option<AxisBounds> {
        let first = points.first()?;
        let last = points.last()?;
        Some(AxisBounds {
            min_ms: first.time_ms - self.duration_ms(),
            max_ms: last.time_ms + self.duration_ms(),
            min_interval_ms: self.min_label_interval_ms(),
        })
    }

    fn index(self) -> usize {
        match self {
            GranularityLevel::Minute => 0,
            GranularityLevel::Hour => 1,
            GranularityLevel::Day => 2,
            GranularityLevel::Month => 3,
            GranularityLevel::Year => 4,
        }
    }
}

fn floor_to(timestamp_ms: i64, width: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(width)
}

impl fmt::Display for GranularityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GranularityLevel::Minute => "minute",
            GranularityLevel::Hour => "hour",
            GranularityLevel::Day => "day",
            GranularityLevel::Month => "month",
            GranularityLevel::Year => "year",
        };
        f.write_str(name)
    }
}

impl FromStr for GranularityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(GranularityLevel::Minute),
            "hour" | "hourly" => Ok(GranularityLevel::Hour),
            "day" | "daily" => Ok(GranularityLevel::Day),
            "month" | "monthly" => Ok(GranularityLevel::Month),
            "year" | "yearly" => Ok(GranularityLevel::Year),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_align_day_returns_utc_midnight() {
        let mid_day = ms(2024, 3, 14, 13, 27, 45) + 123;
        assert_eq!(GranularityLevel::Day.align(mid_day), ms(2024, 3, 14, 0, 0, 0));
    }

    #[test]
    fn test_align_month_uses_calendar_start() {
        let end_of_january = ms(2024, 1, 31, 23, 59, 0);
        assert_eq!(
            GranularityLevel::Month.align(end_of_january),
            ms(2024, 1, 1, 0, 0, 0)
        );

        let leap_day = ms(2024, 2, 29, 12, 0, 0);
        assert_eq!(GranularityLevel::Month.align(leap_day), ms(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn test_align_minute_hour_year() {
        let t = ms(2023, 7, 9, 8, 41, 17) + 999;
        assert_eq!(GranularityLevel::Minute.align(t), ms(2023, 7, 9, 8, 41, 0));
        assert_eq!(GranularityLevel::Hour.align(t), ms(2023, 7, 9, 8, 0, 0));
        assert_eq!(GranularityLevel::Year.align(t), ms(2023, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_align_before_epoch() {
        let t = ms(1969, 12, 31, 23, 59, 30);
        assert_eq!(GranularityLevel::Minute.align(t), ms(1969, 12, 31, 23, 59, 0));
        assert_eq!(GranularityLevel::Day.align(t), ms(1969, 12, 31, 0, 0, 0));
    }

    #[test]
    fn test_align_is_idempotent() {
        let t = ms(2022, 11, 5, 6, 7, 8);
        for level in GranularityLevel::ALL {
            let once = level.align(t);
            assert_eq!(level.align(once), once, "{}", level);
        }
    }

    #[test]
    fn test_step_is_clamped() {
        assert_eq!(GranularityLevel::Minute.step(Direction::Up), GranularityLevel::Hour);
        assert_eq!(GranularityLevel::Year.step(Direction::Up), GranularityLevel::Year);
        assert_eq!(GranularityLevel::Minute.step(Direction::Down), GranularityLevel::Minute);
        assert_eq!(GranularityLevel::Month.step(Direction::Down), GranularityLevel::Day);
    }

    #[test]
    fn test_durations() {
        assert_eq!(GranularityLevel::Minute.duration_ms(), 60_000);
        assert_eq!(GranularityLevel::Hour.duration_ms(), 3_600_000);
        assert_eq!(GranularityLevel::Day.duration_ms(), 86_400_000);
        assert_eq!(GranularityLevel::Month.duration_ms(), 2_628_000_000);
        assert_eq!(GranularityLevel::Year.duration_ms(), 31_540_000_000);
    }

    #[test]
    fn test_align_range_swaps_and_aligns_start() {
        let start = ms(2024, 5, 20, 10, 0, 0);
        let end = ms(2024, 3, 2, 10, 0, 0);
        let (s, e) = GranularityLevel::Month.align_range(start, end);
        assert_eq!(s, ms(2024, 3, 1, 0, 0, 0));
        assert_eq!(e, ms(2024, 5, 20, 10, 0, 0));
    }

    #[test]
    fn test_align_range_keeps_last_partial_bucket() {
        let (s, e) = GranularityLevel::Day
            .align_range(ms(2024, 3, 13, 0, 0, 0), ms(2024, 3, 14, 10, 30, 0));
        assert_eq!(s, ms(2024, 3, 13, 0, 0, 0));
        assert_eq!(e, ms(2024, 3, 14, 10, 30, 0));

        // an end already on a boundary stays there
        let (_, e) = GranularityLevel::Hour
            .align_range(ms(2024, 3, 13, 0, 15, 0), ms(2024, 3, 13, 6, 0, 0));
        assert_eq!(e, ms(2024, 3, 13, 6, 0, 0));
    }

    #[test]
    fn test_axis_bounds_pad_by_one_bucket() {
        let points = vec![SeriesPoint::new(1_000_000, 1.0), SeriesPoint::new(2_000_000, 2.0)];
        let bounds = GranularityLevel::Minute.axis_bounds(&points).unwrap();
        assert_eq!(bounds.min_ms, 1_000_000 - 60_000);
        assert_eq!(bounds.max_ms, 2_000_000 + 60_000);
        assert_eq!(bounds.min_interval_ms, 300_000);
        assert!(GranularityLevel::Day.axis_bounds(&[]).is_none());
    }

    #[test]
    fn test_parse_backend_names() {
        assert_eq!("hourly".parse::<GranularityLevel>(), Ok(GranularityLevel::Hour));
        assert_eq!("Year".parse::<GranularityLevel>(), Ok(GranularityLevel::Year));
        assert!("weekly".parse::<GranularityLevel>().is_err());
        assert_eq!(GranularityLevel::Month.backend_name(), "monthly");
    }
}
