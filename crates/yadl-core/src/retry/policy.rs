use rand::Rng;
use std::time::Duration;

use super::classify::FailureClass;
use crate::config::RetryConfig;

/// Decision returned by the retry policy for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue immediately.
    RetryNow,
    /// Requeue after the given delay.
    RetryAfter(Duration),
    /// Stop; the item becomes `Failed`.
    GiveUp,
}

/// Per-class retry policy.
///
/// Transient failures walk a capped exponential backoff curve against the
/// item's attempt budget. Rate-limited failures use a flat (or
/// platform-hinted) delay and their own hit budget. Permanent failures are
/// never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per item, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound on any computed backoff delay.
    pub max_delay: Duration,
    /// Wait after a rate-limit signal with no platform hint.
    pub rate_limit_delay: Duration,
    /// How many rate-limit signals an item absorbs before giving up.
    pub max_rate_limit_hits: u32,
    /// Random jitter fraction added to transient backoff (0.25 = up to
    /// +25%). Zero disables jitter, which the deterministic tests rely on.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            rate_limit_delay: Duration::from_secs(cfg.rate_limit_delay_secs),
            max_rate_limit_hits: cfg.max_rate_limit_hits,
            jitter: 0.25,
        }
    }

    /// Decide what to do after a failed attempt.
    ///
    /// `attempts` is the number of attempts consumed against the transient
    /// budget so far (≥ 1: the failed attempt is counted). `rate_limit_hits`
    /// counts rate-limited failures, which have their own budget.
    /// `server_hint` is a platform-provided retry-after, honored for
    /// rate-limited failures.
    pub fn decide(
        &self,
        attempts: u32,
        rate_limit_hits: u32,
        class: FailureClass,
        server_hint: Option<Duration>,
    ) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp,
            FailureClass::RateLimited => {
                if rate_limit_hits >= self.max_rate_limit_hits {
                    return RetryDecision::GiveUp;
                }
                RetryDecision::RetryAfter(server_hint.unwrap_or(self.rate_limit_delay))
            }
            FailureClass::Transient => {
                if attempts >= self.max_attempts {
                    return RetryDecision::GiveUp;
                }
                let delay = self.backoff_delay(attempts);
                if delay.is_zero() {
                    RetryDecision::RetryNow
                } else {
                    RetryDecision::RetryAfter(delay)
                }
            }
        }
    }

    /// `base * 2^(attempts-1)`, jittered, capped at `max_delay`.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = 1u32 << attempts.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(exp);
        let jittered = if self.jitter > 0.0 && !raw.is_zero() {
            raw.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..self.jitter))
        } else {
            raw
        };
        jittered.min(self.max_delay)
    }
}
