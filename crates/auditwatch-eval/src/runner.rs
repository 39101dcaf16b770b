//! Wires an event source through the configured detectors into a sink.
//!
//! # Dispatch
//!
//! 1. The runner pulls one event from the source
//! 2. The event is offered to every detector, in registration order
//! 3. Each detector that fires produces an alert, which goes to the sink
//! 4. A detector error is logged and does not stop the remaining detectors
//!
//! Batch mode drains the source to its end and returns. Live mode keeps
//! polling until the cancellation token fires. It suspends during the idle
//! waits the source asks for and yields to the scheduler after every event,
//! so a busy log cannot starve the task that cancels it.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::alert::Alert;
use crate::config::WatchConfig;
use crate::error::Result;
use crate::event::AuditEvent;
use crate::rule::{BruteForceLogin, Detector, InsiderRepeatedAccess};
use crate::sink::AlertSink;
use crate::source::{EventSource, SourcePoll, SourceStats};

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Line accounting reported by the source.
    pub source: SourceStats,
    /// Events offered to the detectors.
    pub events: u64,
    /// Alerts fired.
    pub alerts: u64,
    /// Detector evaluations that failed.
    pub rule_errors: u64,
    /// Alerts the sink failed to deliver.
    pub sink_errors: u64,
}

/// Drives events from a source through detectors into a sink.
pub struct Runner {
    detectors: Vec<Box<dyn Detector>>,
    sink: Box<dyn AlertSink>,
    max_tracked_keys: usize,
    stats: RunStats,
}

impl Runner {
    /// Create a runner with no detectors.
    pub fn new(sink: impl AlertSink + 'static) -> Self {
        Runner {
            detectors: Vec::new(),
            sink: Box::new(sink),
            max_tracked_keys: WatchConfig::default().max_tracked_keys,
            stats: RunStats::default(),
        }
    }

    /// Create a runner with the brute-force and insider detectors configured
    /// from `config`.
    pub fn from_config(config: &WatchConfig, sink: impl AlertSink + 'static) -> Self {
        let mut runner = Runner::new(sink);
        runner.max_tracked_keys = config.max_tracked_keys;
        runner.add_detector(BruteForceLogin::detector(&config.brute_force));
        runner.add_detector(InsiderRepeatedAccess::detector(&config.insider));
        runner
    }

    /// Register an additional detector.
    pub fn add_detector(&mut self, detector: impl Detector + 'static) {
        self.detectors.push(Box::new(detector));
    }

    pub fn detectors(&self) -> impl Iterator<Item = &dyn Detector> {
        self.detectors.iter().map(|d| d.as_ref())
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Offer one event to every detector and deliver any alerts.
    ///
    /// Returns the alerts fired by this event, in detector order.
    pub fn process_event(&mut self, event: &AuditEvent) -> Vec<Alert> {
        self.stats.events += 1;
        let mut fired = Vec::new();

        for detector in &mut self.detectors {
            match detector.evaluate(event) {
                Ok(Some(alert)) => fired.push(alert),
                Ok(None) => {}
                Err(e) => {
                    self.stats.rule_errors += 1;
                    log::warn!(
                        "{}: skipping {} event at {}: {e}",
                        detector.name(),
                        event.event_type(),
                        event.timestamp()
                    );
                }
            }
            detector.maintain(event, self.max_tracked_keys);
        }

        for alert in &fired {
            self.stats.alerts += 1;
            if let Err(e) = self.sink.emit(alert) {
                self.stats.sink_errors += 1;
                log::warn!("failed to deliver {} alert: {e}", alert.rule);
            }
        }

        fired
    }

    /// Drain a source to its current end and return the run's counters.
    ///
    /// A source that reports "nothing yet" is treated as finished.
    pub fn run_batch<S: EventSource + ?Sized>(&mut self, source: &mut S) -> Result<RunStats> {
        loop {
            match source.poll_event()? {
                SourcePoll::Event(event) => {
                    self.process_event(&event);
                }
                SourcePoll::Pending(_) | SourcePoll::Exhausted => break,
            }
        }
        Ok(self.finish(source))
    }

    /// Follow a source until `cancel` fires or the source is exhausted.
    ///
    /// Cancellation is observed before every poll and during every idle
    /// wait. The loop also yields after each event, so on a single-threaded
    /// runtime the canceller gets to run even while lines keep arriving.
    /// Shutdown takes at most one idle interval. The source keeps
    /// its read position and any partial line, so it can be handed to
    /// another run later.
    pub async fn run_live<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        while !cancel.is_cancelled() {
            match source.poll_event() {
                Ok(SourcePoll::Event(event)) => {
                    self.process_event(&event);
                    tokio::task::yield_now().await;
                }
                Ok(SourcePoll::Pending(idle)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle) => {}
                    }
                }
                Ok(SourcePoll::Exhausted) => break,
                Err(e) => {
                    self.finish(source);
                    return Err(e);
                }
            }
        }
        Ok(self.finish(source))
    }

    fn finish<S: EventSource + ?Sized>(&mut self, source: &S) -> RunStats {
        self.stats.source = source.stats();
        if let Err(e) = self.sink.flush() {
            log::warn!("failed to flush alert sink: {e}");
        }
        self.stats
    }
}
