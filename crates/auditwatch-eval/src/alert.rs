//! Alert values produced when a detector's window saturates.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::timespan::Timespan;
use crate::window::WindowKey;

/// Severity level of a fired alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
            Level::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A single `name: value` line of alert detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertField {
    pub name: String,
    pub value: String,
}

impl AlertField {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        AlertField {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

/// The result of a detector firing. Immutable once built.
///
/// The timestamp is the triggering event's own time, so the same log
/// produces identical alerts whether it is scanned or tailed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Name of the detector that fired.
    pub rule: String,
    /// Human-readable headline.
    pub title: String,
    pub level: Level,
    /// Grouping key whose window saturated.
    pub key: WindowKey,
    /// Number of occurrences in the window when the alert fired.
    pub count: usize,
    /// The detector's time window.
    pub window: Timespan,
    /// Ordered detail lines for rendering.
    pub details: Vec<AlertField>,
    /// Timestamp of the event that triggered the alert.
    pub timestamp: NaiveDateTime,
}

impl Alert {
    /// Look up a detail value by its display name.
    pub fn detail(&self, name: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Title line followed by one `name: value` line per detail.
impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "🚨 {}", self.title)?;
        for field in &self.details {
            write!(f, "\n{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}
