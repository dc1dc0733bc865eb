//! Wall-clock source for derived fields.
//!
//! Derived values (`today`, `timestamp`, `data_dir`, ...) are computed from the
//! current local time. The client reads it through [`Clock`] so tests can freeze it.

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Source of the current local date and time.
pub trait Clock: Send + Sync {
    /// Current local time (no timezone attached).
    fn now(&self) -> NaiveDateTime;
}

/// Reads the host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// Freeze at midnight of the given date.
    pub fn at_date(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN))
    }

    /// Freeze at a `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` string.
    pub fn parse(text: &str) -> Result<Self, chrono::ParseError> {
        match NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            Ok(dt) => Ok(Self(dt)),
            Err(_) => NaiveDate::parse_from_str(text, "%Y-%m-%d").map(Self::at_date),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_parse() {
        let clock = FixedClock::parse("2020-01-01 11:53:12").unwrap();
        assert_eq!(clock.now().format("%Y-%m-%d_%H%M").to_string(), "2020-01-01_1153");

        let clock = FixedClock::parse("1984-07-22").unwrap();
        assert_eq!(clock.now().format("%H%M").to_string(), "0000");
        assert!(FixedClock::parse("yesterday").is_err());
    }
}
