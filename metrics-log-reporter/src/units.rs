use std::{fmt, str::FromStr};

use thiserror::Error;

/// Error returned when a string does not name a [`TimeUnit`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown time unit `{0}`")]
pub struct ParseUnitError(String);

/// A unit of time, used to convert rates and durations before they are reported.
///
/// Conversion is a linear scaling by the number of nanoseconds (or seconds) in one unit.  The
/// lowercase plural name of the unit (`seconds`, `milliseconds`, and so on) is what ends up in the
/// `rate_unit` and `duration_unit` fields of a record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl TimeUnit {
    /// Number of nanoseconds in one of this unit.
    pub const fn as_nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 60 * 60 * 1_000_000_000,
            TimeUnit::Days => 24 * 60 * 60 * 1_000_000_000,
        }
    }

    /// Number of seconds in one of this unit, possibly fractional.
    pub fn as_secs_f64(self) -> f64 {
        self.as_nanos() as f64 / TimeUnit::Seconds.as_nanos() as f64
    }

    /// Lowercase plural name of the unit.
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }

    /// Converts a per-second rate into a rate per this unit.
    ///
    /// A rate of 2 events per second is 120 events per minute.
    pub fn convert_rate(self, per_second: f64) -> f64 {
        per_second * self.as_secs_f64()
    }

    /// Converts a duration in nanoseconds into this unit.
    pub fn convert_duration(self, nanos: f64) -> f64 {
        nanos / self.as_nanos() as f64
    }

    /// Label used for the `rate_unit` field, e.g. `events/seconds`.
    pub fn rate_label(self) -> String {
        format!("events/{}", self.as_str())
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanosecond" | "nanoseconds" => TimeUnit::Nanoseconds,
            "us" | "µs" | "microsecond" | "microseconds" => TimeUnit::Microseconds,
            "ms" | "millisecond" | "milliseconds" => TimeUnit::Milliseconds,
            "s" | "sec" | "second" | "seconds" => TimeUnit::Seconds,
            "m" | "min" | "minute" | "minutes" => TimeUnit::Minutes,
            "h" | "hour" | "hours" => TimeUnit::Hours,
            "d" | "day" | "days" => TimeUnit::Days,
            _ => return Err(ParseUnitError(s.to_string())),
        };
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::TimeUnit;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_labels() {
        assert_eq!(TimeUnit::Seconds.rate_label(), "events/seconds");
        assert_eq!(TimeUnit::Minutes.rate_label(), "events/minutes");
        assert_eq!(TimeUnit::Milliseconds.to_string(), "milliseconds");
    }

    #[test]
    fn test_duration_conversion() {
        assert_relative_eq!(TimeUnit::Milliseconds.convert_duration(2_000_000.0), 2.0);
        assert_relative_eq!(TimeUnit::Microseconds.convert_duration(1_500.0), 1.5);
        assert_relative_eq!(TimeUnit::Seconds.convert_duration(250_000_000.0), 0.25);
    }

    #[test]
    fn test_rate_conversion() {
        assert_relative_eq!(TimeUnit::Seconds.convert_rate(3.5), 3.5);
        assert_relative_eq!(TimeUnit::Minutes.convert_rate(2.0), 120.0);
        assert_relative_eq!(TimeUnit::Milliseconds.convert_rate(1_000.0), 1.0);
    }

    #[test]
    fn test_parse() {
        let cases = [
            ("ms", TimeUnit::Milliseconds),
            ("SECONDS", TimeUnit::Seconds),
            (" minute ", TimeUnit::Minutes),
            ("ns", TimeUnit::Nanoseconds),
            ("Days", TimeUnit::Days),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<TimeUnit>(), Ok(expected));
        }

        assert!("fortnight".parse::<TimeUnit>().is_err());
    }

    proptest! {
        #[test]
        fn rate_conversion_is_linear_and_invertible(rate in 0.0f64..1.0e9) {
            let per_minute = TimeUnit::Minutes.convert_rate(rate);
            assert_relative_eq!(per_minute, rate * 60.0, max_relative = 1e-12);
            assert_relative_eq!(per_minute / 60.0, rate, max_relative = 1e-12);
        }
    }
}
