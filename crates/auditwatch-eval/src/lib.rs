//! # auditwatch-eval
//!
//! Sliding-window threat detection over newline-delimited JSON audit events.
//!
//! Two detectors ship with the crate:
//!
//! - **Brute-force login**: repeated failed `login_attempt` events from one
//!   client IP (or, optionally, against one username from external sources).
//! - **Insider repeated access**: repeated denied `patient_read_attempt`
//!   events by one `(username, role)`.
//!
//! ## Architecture
//!
//! - [`EventSource`] yields parsed [`AuditEvent`]s, either by scanning a log
//!   once ([`BatchSource`]) or by following it as it grows ([`TailSource`]).
//! - Each [`Detector`] owns a private [`WindowTracker`]; windows are evaluated
//!   against each event's own timestamp, so a replayed log fires the same
//!   alerts a live run would have.
//! - When a window reaches its threshold the detector emits an [`Alert`] and
//!   clears that key, suppressing alert storms.
//! - The [`Runner`] drives source → detectors → [`AlertSink`] in batch or
//!   live mode with identical per-event dispatch.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::Cursor;
//! use auditwatch_eval::{Alert, BatchSource, Runner, WatchConfig};
//!
//! let mut log = String::new();
//! for second in 0..5 {
//!     log.push_str(&format!(
//!         r#"{{"event":"login_attempt","username":"admin","success":false,"client_ip":"203.0.113.5","timestamp":"2024-07-10T12:00:0{second}Z"}}"#
//!     ));
//!     log.push('\n');
//! }
//!
//! let mut source = BatchSource::from_reader(Cursor::new(log), "example");
//! let mut runner = Runner::from_config(&WatchConfig::default(), Vec::<Alert>::new());
//! let stats = runner.run_batch(&mut source).unwrap();
//! assert_eq!(stats.alerts, 1);
//! ```

pub mod alert;
pub mod config;
pub mod error;
pub mod event;
pub mod rule;
pub mod runner;
pub mod sink;
pub mod source;
pub mod timespan;
pub mod window;

// Re-export the most commonly used types at crate root
pub use alert::{Alert, AlertField, Level};
pub use config::{
    BruteForceConfig, DetectorConfig, InsiderConfig, LiveConfig, LoginGrouping, StartPosition,
    WatchConfig,
};
pub use error::{EvalError, Result};
pub use event::{AuditEvent, LOGIN_ATTEMPT, PATIENT_READ_ATTEMPT, parse_timestamp};
pub use rule::{BruteForceLogin, Detector, DetectorRule, InsiderRepeatedAccess, ThresholdDetector};
pub use runner::{RunStats, Runner};
pub use sink::{AlertSink, FanoutSink, JsonSink, TextSink};
pub use source::{BatchSource, EventSource, SourcePoll, SourceStats, TailSource};
pub use timespan::Timespan;
pub use window::{WindowKey, WindowTracker};
// Live-mode callers need the token type to stop a run.
pub use tokio_util::sync::CancellationToken;
