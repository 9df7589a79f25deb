//! Wall clock abstraction and fixed-offset business time.
//!
//! Shops operate on a single fixed UTC offset (UTC+3 by default); no DST.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Mutex;

use crate::error::{ArabicaError, Result};

/// Source of "now". Injected so lifecycle ticks can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Conversions between UTC instants and the business-local calendar.
#[derive(Debug, Clone, Copy)]
pub struct BusinessTime {
    offset: FixedOffset,
}

impl BusinessTime {
    pub fn new(utc_offset_hours: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            ArabicaError::Config(format!("invalid UTC offset: {utc_offset_hours}h"))
        })?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date_naive()
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveTime {
        self.local(at).time()
    }

    /// The UTC instant of a local wall-clock time on a local date.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time) - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&naive)
    }

    /// Build a UTC instant from local calendar fields. Handy in tests.
    pub fn at(&self, date: NaiveDate, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| ArabicaError::Validation(format!("invalid time {hour}:{minute}")))?;
        Ok(self.to_utc(date, time))
    }
}

/// `YYYY-MM` key for month-partitioned files.
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Parse an `HH:MM` time-of-day string.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| ArabicaError::Validation(format!("invalid time '{s}': {e}")))
}
