//! Quarter-hour ticks sampled from the wall clock
//!
//! A tick is the nominal (hour, quarter) a firing belongs to. The clock
//! fires at :00/:15/:30/:45 but the sample is taken with a fixed lookahead,
//! so a firing that happens a little early or late still lands in the right
//! quarter.

use std::fmt;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;

/// Forward offset applied to the wall clock before truncating to the quarter.
pub const LOOKAHEAD_SECS: i64 = 7 * 60 + 30;

/// Length of one quarter in seconds.
pub const QUARTER_SECS: i64 = 15 * 60;

/// One quarter-hour boundary event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Tick {
    hour: u8,
    quarter: u8,
}

impl Tick {
    /// Build a tick, `None` if hour is not 0..=23 or quarter not 0..=3.
    pub fn new(hour: u8, quarter: u8) -> Option<Self> {
        (hour < 24 && quarter < 4).then_some(Self { hour, quarter })
    }

    /// Sample the tick a wall-clock instant belongs to.
    pub fn at(time: NaiveDateTime) -> Self {
        let advanced = time + Duration::seconds(LOOKAHEAD_SECS);
        Self {
            hour: advanced.hour() as u8,
            quarter: (advanced.minute() / 15) as u8,
        }
    }

    /// Hour of day, 0..=23.
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Full quarters past the hour, 0..=3.
    pub fn quarter(&self) -> u8 {
        self.quarter
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.quarter as u32 * 15)
    }
}

/// Wrap an hour count onto the 12-hour dial: 0 → 12, 13 → 1.
pub fn twelve_hour(hours: u8) -> u8 {
    match hours % 12 {
        0 => 12,
        h => h,
    }
}

/// The first quarter-hour boundary strictly after `now`.
pub fn next_boundary(now: NaiveDateTime) -> NaiveDateTime {
    let into_quarter = (now.minute() as i64 % 15) * 60 + now.second() as i64;
    let floor = now.with_nanosecond(0).unwrap_or(now) - Duration::seconds(into_quarter);
    floor + Duration::seconds(QUARTER_SECS)
}
