//! Engine settings.
//!
//! All tunable behavior of the engine lives here: warmup ramp and
//! thresholds, reputation deltas, sync cadence, and the retry policy for
//! network operations. Loaded from JSON at startup or constructed in code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Warmup controller settings.
    pub warmup: WarmupEngineSettings,
    /// Inbox sync settings.
    pub sync: SyncEngineSettings,
    /// Retry policy for transient network failures.
    pub retry: RetryPolicy,
    /// Deliverability guard settings.
    pub deliverability: DeliverabilitySettings,
    /// Interval between sequencing passes over each active campaign.
    #[serde(with = "duration_secs")]
    pub sequencer_tick_interval: Duration,
    /// Base URL for open-tracking pixels. Tracking is disabled when unset,
    /// regardless of per-campaign settings.
    pub tracking_pixel_base: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            warmup: WarmupEngineSettings::default(),
            sync: SyncEngineSettings::default(),
            retry: RetryPolicy::default(),
            deliverability: DeliverabilitySettings::default(),
            sequencer_tick_interval: Duration::from_secs(60),
            tracking_pixel_base: None,
        }
    }
}

/// Warmup controller settings shared across accounts.
///
/// Per-account volume settings live on
/// [`WarmupSettings`](crate::domain::WarmupSettings); these are the
/// engine-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupEngineSettings {
    /// Lower bound on the randomized interval between warmup ticks.
    #[serde(with = "duration_secs")]
    pub min_tick_interval: Duration,
    /// Upper bound on the randomized interval between warmup ticks.
    #[serde(with = "duration_secs")]
    pub max_tick_interval: Duration,
    /// Cumulative sent volume required before warmup can complete.
    pub completion_sent_threshold: u64,
    /// Reputation required before warmup can complete.
    pub completion_reputation_threshold: u8,
    /// Reputation deltas applied on sync feedback.
    pub reputation: ReputationDeltas,
    /// Spam rate over the trailing week above which warmup auto-pauses.
    pub spam_rate_pause_threshold: f64,
    /// Give warmup traffic its own per-account budget instead of sharing
    /// the daily/hourly budget with campaign sends.
    pub separate_pool: bool,
    /// Base delay between consecutive warmup sends from one account, in
    /// seconds. Jitter is applied on top.
    pub delay_between_sends_secs: u64,
}

impl Default for WarmupEngineSettings {
    fn default() -> Self {
        Self {
            min_tick_interval: Duration::from_secs(10 * 60),
            max_tick_interval: Duration::from_secs(40 * 60),
            completion_sent_threshold: 200,
            completion_reputation_threshold: 90,
            reputation: ReputationDeltas::default(),
            spam_rate_pause_threshold: 0.1,
            separate_pool: false,
            delay_between_sends_secs: 60,
        }
    }
}

/// Bounded reputation adjustments. Positive events move reputation up by a
/// small delta; negative events move it down by a larger one. The result is
/// always clamped to [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReputationDeltas {
    /// Successful delivery.
    pub delivery: i32,
    /// Recorded open.
    pub open: i32,
    /// Recorded reply.
    pub reply: i32,
    /// Bounce came back.
    pub bounce: i32,
    /// Message landed in spam.
    pub spam: i32,
}

impl Default for ReputationDeltas {
    fn default() -> Self {
        Self {
            delivery: 1,
            open: 2,
            reply: 3,
            bounce: -8,
            spam: -10,
        }
    }
}

/// Inbox synchronizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEngineSettings {
    /// Interval between sync passes per account.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Lookback window for an account's first-ever sync, in days.
    pub initial_lookback_days: u32,
    /// Network timeout for IMAP operations.
    #[serde(with = "duration_secs")]
    pub imap_timeout: Duration,
}

impl Default for SyncEngineSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            initial_lookback_days: 7,
            imap_timeout: Duration::from_secs(60),
        }
    }
}

/// Retry policy for transient network failures.
///
/// Expressed as an explicit policy object so backoff behavior is
/// independently testable rather than buried in call sites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Random jitter fraction in [0, 1] applied to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay before attempt `n` (0-based retry count),
    /// before jitter: `base_delay * 2^n`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Deliverability guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverabilitySettings {
    /// Bounces from one domain before it is blacklisted.
    pub bounce_blacklist_threshold: u32,
}

impl Default for DeliverabilitySettings {
    fn default() -> Self {
        Self {
            bounce_blacklist_threshold: 3,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip() {
        let settings = EngineSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: EngineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sync.interval, Duration::from_secs(300));
        assert_eq!(back.retry.max_attempts, 3);
    }

    #[test]
    fn reputation_deltas_signs() {
        let deltas = ReputationDeltas::default();
        assert!(deltas.delivery > 0);
        assert!(deltas.reply > 0);
        assert!(deltas.bounce < 0);
        assert!(deltas.spam < deltas.bounce);
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn warmup_defaults() {
        let warmup = WarmupEngineSettings::default();
        assert!(warmup.min_tick_interval < warmup.max_tick_interval);
        assert!(warmup.spam_rate_pause_threshold > 0.0);
    }
}
