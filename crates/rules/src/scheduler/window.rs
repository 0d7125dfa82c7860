//! Window boundary arithmetic in a fixed reporting offset.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::schema::Frequency;

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Computes digest windows for a reporting timezone.
#[derive(Debug, Clone, Copy)]
pub struct WindowClock {
    offset: FixedOffset,
    week_start: Weekday,
}

impl WindowClock {
    pub fn new(offset: FixedOffset, week_start: Weekday) -> Self {
        Self { offset, week_start }
    }

    /// UTC reporting, weeks starting Monday.
    pub fn utc() -> Self {
        Self::new(Utc.fix(), Weekday::Mon)
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    /// The window of `frequency` containing `at`, or `None` for realtime.
    pub fn window_for(&self, frequency: Frequency, at: DateTime<Utc>) -> Option<Window> {
        let local_date = at.with_timezone(&self.offset).date_naive();
        let (start_date, length) = match frequency {
            Frequency::Realtime => return None,
            Frequency::Daily => (local_date, Duration::days(1)),
            Frequency::Weekly => {
                let back = days_since(local_date.weekday(), self.week_start);
                (local_date - Duration::days(back), Duration::days(7))
            }
        };
        let start = self.local_midnight(start_date);
        Some(Window {
            start,
            end: start + length,
        })
    }

    /// Local midnight of `date`, expressed in UTC.
    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }
}

impl Default for WindowClock {
    fn default() -> Self {
        Self::utc()
    }
}

/// Days from the most recent `start` weekday (inclusive) to `day`.
fn days_since(day: Weekday, start: Weekday) -> i64 {
    let d = i64::from(day.num_days_from_monday());
    let s = i64::from(start.num_days_from_monday());
    (d - s).rem_euclid(7)
}
