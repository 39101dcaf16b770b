//! Detector rules: predicate, key extraction and alert rendering.
//!
//! A [`DetectorRule`] describes *what* to count: which events are relevant,
//! how they are grouped and how an alert reads. A [`ThresholdDetector`]
//! pairs one rule with its own [`WindowTracker`] and does the counting.
//! Adding a detector means implementing [`DetectorRule`] and registering
//! `ThresholdDetector::new(rule, config)` with the runner.

use crate::alert::{Alert, AlertField, Level};
use crate::config::{BruteForceConfig, DetectorConfig, InsiderConfig, LoginGrouping};
use crate::error::Result;
use crate::event::{AuditEvent, LOGIN_ATTEMPT, PATIENT_READ_ATTEMPT};
use crate::window::{UNKNOWN, WindowKey, WindowTracker};

// =============================================================================
// Traits
// =============================================================================

/// Static description of one threshold detection.
pub trait DetectorRule: Send {
    /// Stable machine name, used in structured alerts and diagnostics.
    fn name(&self) -> &str;

    /// Whether the event counts toward this rule at all.
    fn matches(&self, event: &AuditEvent) -> bool;

    /// Grouping key for a matching event.
    fn key(&self, event: &AuditEvent) -> Result<WindowKey>;

    /// What the key is made of, for summaries.
    fn grouping(&self) -> String {
        "key".to_string()
    }

    /// Build the alert for a saturated window.
    ///
    /// `event` is the occurrence that pushed the count to the threshold.
    fn render(
        &self,
        event: &AuditEvent,
        key: &WindowKey,
        count: usize,
        config: &DetectorConfig,
    ) -> Result<Alert>;
}

/// Anything the runner can offer events to.
pub trait Detector: Send {
    fn name(&self) -> &str;

    /// Offer one event. Returns an alert if this event saturated a window.
    fn evaluate(&mut self, event: &AuditEvent) -> Result<Option<Alert>>;

    /// Drop expired per-key state if more than `max_keys` keys are tracked.
    fn maintain(&mut self, _latest: &AuditEvent, _max_keys: usize) {}

    /// Human-readable summary of the detector's knobs.
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

// =============================================================================
// Threshold detector
// =============================================================================

/// A [`DetectorRule`] plus the private window state it counts into.
pub struct ThresholdDetector<R> {
    rule: R,
    config: DetectorConfig,
    tracker: WindowTracker,
    /// Key count below which `maintain` will not prune again.
    prune_at: usize,
}

impl<R: DetectorRule> ThresholdDetector<R> {
    pub fn new(rule: R, config: DetectorConfig) -> Self {
        let tracker = WindowTracker::new(config.window.as_delta(), config.capacity);
        ThresholdDetector {
            rule,
            config,
            tracker,
            prune_at: 0,
        }
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }
}

impl<R: DetectorRule> Detector for ThresholdDetector<R> {
    fn name(&self) -> &str {
        self.rule.name()
    }

    /// Count the event and fire when the threshold is reached.
    ///
    /// Firing clears the key's window, so a sustained flood yields one alert
    /// per `threshold` new matching events rather than one per event.
    fn evaluate(&mut self, event: &AuditEvent) -> Result<Option<Alert>> {
        if !self.rule.matches(event) {
            return Ok(None);
        }

        let key = self.rule.key(event)?;
        let count = self.tracker.add(&key, event.timestamp());
        if count < self.config.threshold {
            return Ok(None);
        }

        log::debug!("{}: {key} reached {count} events", self.rule.name());
        let alert = self.rule.render(event, &key, count, &self.config)?;
        self.tracker.clear(&key);
        Ok(Some(alert))
    }

    /// Prune expired keys once the map outgrows `max_keys`.
    ///
    /// After a prune the next one waits until a quarter of `max_keys` new
    /// keys have arrived, so a map full of live keys is not rescanned on
    /// every event.
    fn maintain(&mut self, latest: &AuditEvent, max_keys: usize) {
        let keys = self.tracker.key_count();
        if keys <= max_keys || keys < self.prune_at {
            return;
        }
        let dropped = self.tracker.prune(latest.timestamp());
        self.prune_at = self.tracker.key_count() + (max_keys / 4).max(1);
        log::debug!("{}: pruned {dropped} expired keys", self.rule.name());
    }

    fn describe(&self) -> String {
        format!(
            "{}: {} events in {} per {} (capacity {})",
            self.rule.name(),
            self.config.threshold,
            self.config.window,
            self.rule.grouping(),
            self.config.capacity
        )
    }
}

// =============================================================================
// Brute-force login
// =============================================================================

/// Repeated failed logins from one source.
///
/// By default every failed `login_attempt` counts and is grouped by
/// `client_ip`. The username variant groups by the targeted account and,
/// when `require_external_source` is set, only counts logins tagged
/// `source: "external"`.
#[derive(Debug, Clone)]
pub struct BruteForceLogin {
    group_by: LoginGrouping,
    require_external_source: bool,
}

impl BruteForceLogin {
    pub const NAME: &'static str = "brute_force_login";

    pub fn new(group_by: LoginGrouping, require_external_source: bool) -> Self {
        BruteForceLogin {
            group_by,
            require_external_source,
        }
    }

    /// Build the rule and its detector from configuration.
    pub fn detector(config: &BruteForceConfig) -> ThresholdDetector<Self> {
        ThresholdDetector::new(
            Self::new(config.group_by, config.require_external_source),
            config.detector(),
        )
    }
}

impl Default for BruteForceLogin {
    fn default() -> Self {
        Self::new(LoginGrouping::ClientIp, false)
    }
}

impl DetectorRule for BruteForceLogin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if event.event_type() != LOGIN_ATTEMPT || event.is_true("success") {
            return false;
        }
        !self.require_external_source || event.get_str("source") == Some("external")
    }

    fn key(&self, event: &AuditEvent) -> Result<WindowKey> {
        let field = match self.group_by {
            LoginGrouping::ClientIp => "client_ip",
            LoginGrouping::Username => "username",
        };
        let value = event.scalar_field(field)?;
        Ok(WindowKey::single(value.unwrap_or_else(|| UNKNOWN.to_string())))
    }

    fn grouping(&self) -> String {
        let field = match self.group_by {
            LoginGrouping::ClientIp => "client_ip",
            LoginGrouping::Username => "username",
        };
        if self.require_external_source {
            format!("{field}, source=external only")
        } else {
            field.to_string()
        }
    }

    fn render(
        &self,
        event: &AuditEvent,
        key: &WindowKey,
        count: usize,
        config: &DetectorConfig,
    ) -> Result<Alert> {
        let subject = key.to_string();
        let minutes = config.window.minutes_label();

        let (title, details) = match self.group_by {
            LoginGrouping::ClientIp => {
                let username = event
                    .context_field("username")
                    .unwrap_or_else(|| UNKNOWN.to_string());
                (
                    "EXTERNAL THREAT: Possible Brute-Force Login Attempts (IP-based)",
                    vec![
                        AlertField::new("Source IP", subject),
                        AlertField::new("Failed attempts", count),
                        AlertField::new("Window (minutes)", minutes),
                        AlertField::new("Example username targeted", username),
                    ],
                )
            }
            LoginGrouping::Username => {
                let mut details = vec![
                    AlertField::new("Targeted username", subject),
                    AlertField::new("Failed attempts", count),
                    AlertField::new("Window (minutes)", minutes),
                ];
                if let Some(ip) = event.context_field("client_ip") {
                    details.push(AlertField::new("Last client IP", ip));
                }
                ("EXTERNAL THREAT DETECTED: Brute Force Login", details)
            }
        };

        Ok(Alert {
            rule: Self::NAME.to_string(),
            title: title.to_string(),
            level: Level::High,
            key: key.clone(),
            count,
            window: config.window,
            details,
            timestamp: event.timestamp(),
        })
    }
}

// =============================================================================
// Insider repeated access
// =============================================================================

/// Repeated denied reads of protected patient records by one identity.
///
/// Grouped by `(username, role)`; allowed reads neither count nor reset
/// the window.
#[derive(Debug, Clone, Default)]
pub struct InsiderRepeatedAccess;

impl InsiderRepeatedAccess {
    pub const NAME: &'static str = "insider_repeated_access";

    pub fn detector(config: &InsiderConfig) -> ThresholdDetector<Self> {
        ThresholdDetector::new(InsiderRepeatedAccess, config.detector())
    }
}

impl DetectorRule for InsiderRepeatedAccess {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        event.event_type() == PATIENT_READ_ATTEMPT && !event.is_true("allowed")
    }

    fn key(&self, event: &AuditEvent) -> Result<WindowKey> {
        let username = event.scalar_field("username")?;
        let role = event.scalar_field("role")?;
        Ok(WindowKey::pair(
            username.unwrap_or_else(|| UNKNOWN.to_string()),
            role.unwrap_or_else(|| UNKNOWN.to_string()),
        ))
    }

    fn grouping(&self) -> String {
        "username+role".to_string()
    }

    fn render(
        &self,
        event: &AuditEvent,
        key: &WindowKey,
        count: usize,
        config: &DetectorConfig,
    ) -> Result<Alert> {
        let parts = key.parts();
        let mut details = vec![
            AlertField::new("User", parts.first().map_or(UNKNOWN, String::as_str)),
            AlertField::new("Role", parts.get(1).map_or(UNKNOWN, String::as_str)),
        ];
        if let Some(ip) = event.context_field("client_ip") {
            details.push(AlertField::new("Client IP", ip));
        }
        details.push(AlertField::new("Denied attempts", count));
        details.push(AlertField::new(
            "Window (minutes)",
            config.window.minutes_label(),
        ));

        Ok(Alert {
            rule: Self::NAME.to_string(),
            title: "INSIDER THREAT: Repeated Unauthorized Patient Record Access".to_string(),
            level: Level::High,
            key: key.clone(),
            count,
            window: config.window,
            details,
            timestamp: event.timestamp(),
        })
    }
}
