//! Time buckets and the granularity fan-out.
//!
//! Buckets are floor divisions of epoch time: an hour is 3600 seconds, a
//! day 24 hours, a week 7 days and a "month" a fixed 28 days. Months are
//! not calendar months. Flooring uses `div_euclid`, so times before 1970
//! land in negative buckets without a gap at zero.

use std::fmt;

pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const HOURS_PER_DAY: i64 = 24;
pub const DAYS_PER_WEEK: i64 = 7;
pub const DAYS_PER_MONTH: i64 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    /// Single-letter tag used in output rows.
    pub fn tag(self) -> &'static str {
        match self {
            Granularity::Hour => "h",
            Granularity::Day => "d",
            Granularity::Week => "w",
            Granularity::Month => "m",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.tag() == tag)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub fn hour_bucket(epoch_secs: i64) -> i64 {
    epoch_secs.div_euclid(SECONDS_PER_HOUR)
}

/// The hour bucket and the day, week and month buckets containing it.
pub fn fan_out(hour_bucket: i64) -> [(Granularity, i64); 4] {
    let day = hour_bucket.div_euclid(HOURS_PER_DAY);
    [
        (Granularity::Hour, hour_bucket),
        (Granularity::Day, day),
        (Granularity::Week, day.div_euclid(DAYS_PER_WEEK)),
        (Granularity::Month, day.div_euclid(DAYS_PER_MONTH)),
    ]
}
