//! Transfer service configuration

use std::time::Duration;

use rand::Rng;

use crate::config::TransferSettings;

/// Randomized exponential backoff between conflict retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Full-jitter delay before retry number `attempt` (1-based):
    /// uniform in `[0, min(cap, base * 2^(attempt-1))]`
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ceiling = self
            .base
            .saturating_mul(1u32 << exp)
            .min(self.cap)
            .as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}

/// Feature flags of the transfer service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Append a transaction record in the same atomic unit
    pub record_history: bool,
    /// Re-run the transaction when the store reports a conflict
    pub retry_on_conflict: bool,
    /// `None` retries until the transaction commits
    pub max_retries: Option<u32>,
    pub backoff: Option<Backoff>,
    /// Report duration and retries in wire responses
    pub include_telemetry: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            record_history: true,
            retry_on_conflict: true,
            max_retries: None,
            backoff: None,
            include_telemetry: true,
        }
    }
}

impl TransferConfig {
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }

    /// Whether another attempt may follow `retries` conflicts so far
    pub fn may_retry(&self, retries: u32) -> bool {
        self.retry_on_conflict && self.max_retries.is_none_or(|max| retries < max)
    }
}

impl From<&TransferSettings> for TransferConfig {
    fn from(s: &TransferSettings) -> Self {
        let backoff = s.backoff_base_ms.map(|base| {
            Backoff::new(
                Duration::from_millis(base),
                Duration::from_millis(s.backoff_cap_ms.max(base)),
            )
        });
        Self {
            record_history: s.record_history,
            retry_on_conflict: s.retry_on_conflict,
            max_retries: s.max_retries,
            backoff,
            include_telemetry: s.include_telemetry,
        }
    }
}

#[derive(Debug, Default)]
pub struct TransferConfigBuilder {
    config: TransferConfig,
}

impl TransferConfigBuilder {
    pub fn record_history(mut self, enabled: bool) -> Self {
        self.config.record_history = enabled;
        self
    }

    pub fn retry_on_conflict(mut self, enabled: bool) -> Self {
        self.config.retry_on_conflict = enabled;
        self
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = Some(max);
        self
    }

    pub fn unbounded_retries(mut self) -> Self {
        self.config.max_retries = None;
        self
    }

    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.backoff = Some(Backoff::new(base, cap));
        self
    }

    pub fn include_telemetry(mut self, enabled: bool) -> Self {
        self.config.include_telemetry = enabled;
        self
    }

    pub fn build(self) -> TransferConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_default_retries_forever_without_backoff() {
        let config = TransferConfig::default();
        assert!(config.may_retry(0));
        assert!(config.may_retry(1_000_000));
        assert!(config.backoff.is_none());
    }

    #[test]
    fn test_builder_caps_retries() {
        let config = TransferConfig::builder().max_retries(2).build();
        assert!(config.may_retry(1));
        assert!(!config.may_retry(2));

        let config = TransferConfig::builder().retry_on_conflict(false).build();
        assert!(!config.may_retry(0));
    }

    #[test]
    fn test_backoff_stays_under_cap() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..40 {
            let delay = backoff.delay(attempt, &mut rng);
            assert!(delay <= Duration::from_millis(50), "attempt {attempt}: {delay:?}");
        }
        let first = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        for _ in 0..100 {
            assert!(first.delay(1, &mut rng) <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_from_settings() {
        let settings = TransferSettings {
            max_retries: Some(5),
            backoff_base_ms: Some(20),
            backoff_cap_ms: 10,
            record_history: false,
            ..TransferSettings::default()
        };
        let config = TransferConfig::from(&settings);
        assert_eq!(config.max_retries, Some(5));
        assert!(!config.record_history);
        // cap never below base
        assert_eq!(
            config.backoff,
            Some(Backoff::new(Duration::from_millis(20), Duration::from_millis(20)))
        );
    }
}
