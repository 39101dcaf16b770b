//! Compact duration values (`30s`, `3m`, `1h`) used for detector windows.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EvalError, Result};

/// Unit of time for a [`Timespan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimespanUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

impl TimespanUnit {
    fn suffix(self) -> char {
        match self {
            TimespanUnit::Second => 's',
            TimespanUnit::Minute => 'm',
            TimespanUnit::Hour => 'h',
            TimespanUnit::Day => 'd',
            TimespanUnit::Week => 'w',
        }
    }

    fn seconds(self) -> u64 {
        match self {
            TimespanUnit::Second => 1,
            TimespanUnit::Minute => 60,
            TimespanUnit::Hour => 3600,
            TimespanUnit::Day => 86_400,
            TimespanUnit::Week => 604_800,
        }
    }
}

/// A parsed timespan like `15s`, `3m`, `1h`, `7d`.
///
/// Serialized as its string form so configuration files stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timespan {
    pub count: u64,
    pub unit: TimespanUnit,
}

impl Timespan {
    pub const fn minutes(count: u64) -> Self {
        Timespan {
            count,
            unit: TimespanUnit::Minute,
        }
    }

    pub const fn seconds(count: u64) -> Self {
        Timespan {
            count,
            unit: TimespanUnit::Second,
        }
    }

    /// Parse a timespan string like `"1h"`, `"15s"`, `"3m"`, `"7d"`.
    ///
    /// Supported units: `s`, `m`, `h`, `d`, `w`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(EvalError::InvalidTimespan(s.to_string()));
        }
        let (count_str, unit_str) = s.split_at(s.len() - 1);
        let count: u64 = count_str
            .parse()
            .map_err(|_| EvalError::InvalidTimespan(s.to_string()))?;

        let unit = match unit_str {
            "s" => TimespanUnit::Second,
            "m" => TimespanUnit::Minute,
            "h" => TimespanUnit::Hour,
            "d" => TimespanUnit::Day,
            "w" => TimespanUnit::Week,
            _ => return Err(EvalError::InvalidTimespan(s.to_string())),
        };

        // Reject spans that do not fit a TimeDelta.
        count
            .checked_mul(unit.seconds())
            .filter(|secs| *secs <= i64::MAX as u64 / 1000)
            .ok_or_else(|| EvalError::InvalidTimespan(s.to_string()))?;

        Ok(Timespan { count, unit })
    }

    /// Total length in seconds.
    pub fn as_secs(&self) -> u64 {
        self.count * self.unit.seconds()
    }

    /// Length as a signed duration for timestamp arithmetic.
    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::seconds(self.as_secs() as i64)
    }

    pub fn is_zero(&self) -> bool {
        self.count == 0
    }

    /// Length in minutes, rendered without a trailing `.0` for whole minutes.
    pub fn minutes_label(&self) -> String {
        let secs = self.as_secs();
        if secs % 60 == 0 {
            (secs / 60).to_string()
        } else {
            format!("{:.2}", secs as f64 / 60.0)
                .trim_end_matches('0')
                .to_string()
        }
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Timespan {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        Timespan::parse(s)
    }
}

impl Serialize for Timespan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timespan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timespan::parse(&raw).map_err(serde::de::Error::custom)
    }
}
