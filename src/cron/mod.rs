//! Five-field cron expressions
//!
//! [`CronExpression`] is parsed once and then evaluated against timestamps at
//! minute granularity. Day-of-month and day-of-week follow the classic cron
//! rule: when both are restricted a timestamp matches if either one does;
//! when one of them is a bare `*` only the other constrains.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use cronloop::cron::CronExpression;
//!
//! let schedule: CronExpression = "0 1 * * *".parse().unwrap();
//! assert!(schedule.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 1, 0, 0).unwrap()));
//! assert!(!schedule.matches(&Utc.with_ymd_and_hms(2024, 1, 2, 1, 5, 0).unwrap()));
//! ```

mod field;

pub use field::CronField;

use crate::errors::CronParseError;
use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Timelike};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use field::{DAY_OF_MONTH, DAY_OF_WEEK, HOUR, MINUTE, MONTH};

/// How far ahead `next_due_after` searches before giving up (covers leap years)
const SEARCH_HORIZON_DAYS: u64 = 366 * 4 + 1;

/// A parsed, immutable five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpression {
    /// Parse an expression such as `*/5 * * * *` or `0 0 1 * sun`
    pub fn parse(text: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
            return Err(CronParseError::FieldCount {
                found: fields.len(),
            });
        };

        Ok(Self {
            source: fields.join(" "),
            minute: CronField::parse(minute, &MINUTE)?,
            hour: CronField::parse(hour, &HOUR)?,
            day_of_month: CronField::parse(day_of_month, &DAY_OF_MONTH)?,
            month: CronField::parse(month, &MONTH)?,
            day_of_week: CronField::parse(day_of_week, &DAY_OF_WEEK)?,
        })
    }

    /// The normalised expression text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the expression fires during the minute containing `timestamp`
    pub fn matches<Tz: TimeZone>(&self, timestamp: &DateTime<Tz>) -> bool {
        self.minute.contains(timestamp.minute())
            && self.hour.contains(timestamp.hour())
            && self.month.contains(timestamp.month())
            && self.day_matches(
                timestamp.day(),
                timestamp.weekday().num_days_from_sunday(),
            )
    }

    fn day_matches(&self, day_of_month: u32, day_of_week: u32) -> bool {
        let dom = self.day_of_month.contains(day_of_month);
        let dow = self.day_of_week.contains(day_of_week);

        match (
            self.day_of_month.is_restricted(),
            self.day_of_week.is_restricted(),
        ) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First minute strictly after `from` at which the expression fires.
    ///
    /// Returns `None` when no such minute exists within four years (for example
    /// `0 0 30 2 *`). Local times skipped by a DST transition are skipped here too.
    pub fn next_due_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let timezone = from.timezone();
        let local = from.naive_local();
        let start = local
            .date()
            .and_hms_opt(local.hour(), local.minute(), 0)?
            .checked_add_signed(chrono::Duration::minutes(1))?;

        let mut date = start.date();
        let horizon = date.checked_add_days(Days::new(SEARCH_HORIZON_DAYS))?;

        while date <= horizon {
            if self.month.contains(date.month())
                && self.day_matches(date.day(), date.weekday().num_days_from_sunday())
            {
                for hour in self.hour.values() {
                    for minute in self.minute.values() {
                        let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        let candidate = date.and_time(time);
                        if candidate < start {
                            continue;
                        }
                        if let Some(due) = timezone.from_local_datetime(&candidate).earliest() {
                            return Some(due);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }

        None
    }
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for CronExpression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for CronExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(|e| de::Error::custom(format!("invalid cron expression '{text}': {e}")))
    }
}
