use std::time::Duration;

/// Deployment-tunable engine configuration.
///
/// Sweep cadence is the caller's timer concern; the engine only consumes
/// the thresholds and buckets below.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extraction candidates below this confidence are stored but flagged
    /// in the merge summary for caller-side surfacing.
    pub low_confidence_threshold: f64,
    /// Risk alerts fire on an upward crossing of this score.
    pub risk_alert_threshold: f64,
    /// Days-before-due buckets that produce a reminder.
    pub reminder_lookahead_days: Vec<i64>,
    /// Maximum attempts against the extraction capability.
    pub extractor_max_attempts: u32,
    /// Base backoff between extraction attempts; doubled per retry.
    pub extractor_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.4,
            risk_alert_threshold: 0.7,
            reminder_lookahead_days: vec![7, 3, 1],
            extractor_max_attempts: 3,
            extractor_backoff: Duration::from_millis(250),
        }
    }
}
