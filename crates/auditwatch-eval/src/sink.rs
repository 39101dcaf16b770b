//! Alert delivery.
//!
//! Sinks report failures through their return value; the runner logs them
//! and keeps going, so a broken output never stops detection.

use std::io::{self, Write};

use tokio::sync::mpsc::UnboundedSender;

use crate::alert::Alert;
use crate::error::{EvalError, Result};

/// Receives fired alerts.
pub trait AlertSink: Send {
    fn emit(&mut self, alert: &Alert) -> Result<()>;

    /// Flush buffered output, if any.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Text
// =============================================================================

/// Human-readable rendering: title line, `name: value` lines, blank separator.
pub struct TextSink<W> {
    out: W,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(out: W) -> Self {
        TextSink { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl TextSink<io::Stdout> {
    pub fn stdout() -> Self {
        TextSink::new(io::stdout())
    }
}

impl<W: Write + Send> AlertSink for TextSink<W> {
    fn emit(&mut self, alert: &Alert) -> Result<()> {
        writeln!(self.out, "{alert}\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

// =============================================================================
// JSON
// =============================================================================

/// One JSON document per alert (NDJSON unless `pretty` is set).
pub struct JsonSink<W> {
    out: W,
    pretty: bool,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W, pretty: bool) -> Self {
        JsonSink { out, pretty }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> AlertSink for JsonSink<W> {
    fn emit(&mut self, alert: &Alert) -> Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, alert)?;
        } else {
            serde_json::to_writer(&mut self.out, alert)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Delivers every alert to each inner sink.
///
/// A failing sink does not stop delivery to the others; the first error is
/// returned after all sinks have been tried.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn emit(&mut self, alert: &Alert) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(alert) {
                log::warn!("alert sink failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&mut self) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

// =============================================================================
// In-process delivery
// =============================================================================

/// Collects alerts in memory.
impl AlertSink for Vec<Alert> {
    fn emit(&mut self, alert: &Alert) -> Result<()> {
        self.push(alert.clone());
        Ok(())
    }
}

/// Forwards alerts to a downstream queue.
impl AlertSink for UnboundedSender<Alert> {
    fn emit(&mut self, alert: &Alert) -> Result<()> {
        self.send(alert.clone()).map_err(|_| {
            EvalError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "alert receiver dropped",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertField, Level};
    use crate::timespan::Timespan;
    use crate::window::WindowKey;
    use chrono::NaiveDate;

    fn sample() -> Alert {
        Alert {
            rule: "insider_repeated_access".to_string(),
            title: "INSIDER THREAT: Repeated Unauthorized Patient Record Access".to_string(),
            level: Level::High,
            key: WindowKey::pair("bob", "billing"),
            count: 3,
            window: Timespan::minutes(5),
            details: vec![
                AlertField::new("User", "bob"),
                AlertField::new("Role", "billing"),
            ],
            timestamp: NaiveDate::from_ymd_opt(2024, 7, 10)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap(),
        }
    }

    struct BrokenSink;

    impl AlertSink for BrokenSink {
        fn emit(&mut self, _alert: &Alert) -> Result<()> {
            Err(EvalError::Io(io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_text_sink_block() {
        let mut sink = TextSink::new(Vec::new());
        sink.emit(&sample()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "🚨 INSIDER THREAT: Repeated Unauthorized Patient Record Access\nUser: bob\nRole: billing\n\n"
        );
    }

    #[test]
    fn test_json_sink_ndjson() {
        let mut sink = JsonSink::new(Vec::new(), false);
        sink.emit(&sample()).unwrap();
        sink.emit(&sample()).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["key"], serde_json::json!(["bob", "billing"]));
        assert_eq!(v["count"], 3);
    }

    #[test]
    fn test_fanout_continues_past_failures() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = FanoutSink::new().with(BrokenSink).with(tx);
        assert_eq!(sink.len(), 2);
        let err = sink.emit(&sample()).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(rx.try_recv().unwrap(), sample());
    }

    #[test]
    fn test_channel_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = tx;
        sink.emit(&sample()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), sample());
        drop(rx);
        assert!(sink.emit(&sample()).is_err());
    }
}
