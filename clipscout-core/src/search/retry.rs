use std::time::Duration;

use crate::config::RetrySection;
use crate::kind::ErrorKind;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    network_base_delay: Duration,
    rate_limit_base_delay: Duration,
    bot_detection_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
    /// The failing session must be discarded before the next attempt.
    pub force_reinit: bool,
}

impl RetryDecision {
    fn stop(force_reinit: bool) -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
            force_reinit,
        }
    }
}

impl RetryPolicy {
    pub fn new(config: RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            network_base_delay: Duration::from_millis(config.network_base_delay_ms),
            rate_limit_base_delay: Duration::from_millis(config.rate_limit_base_delay_ms),
            bot_detection_delay: Duration::from_millis(config.bot_detection_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on the summed delays of one call.
    pub fn max_total_delay(&self) -> Duration {
        self.max_delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }

    pub fn forces_reinit(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::BotDetection
    }

    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn should_retry(
        &self,
        attempt: u32,
        kind: ErrorKind,
        prior_bot_detections: u32,
    ) -> RetryDecision {
        let force_reinit = self.forces_reinit(kind);
        if attempt >= self.max_attempts {
            return RetryDecision::stop(force_reinit);
        }
        let delay = match kind {
            ErrorKind::InvalidInput => return RetryDecision::stop(false),
            ErrorKind::BotDetection if prior_bot_detections > 0 => {
                return RetryDecision::stop(force_reinit)
            }
            ErrorKind::BotDetection => self.bot_detection_delay.min(self.max_delay),
            ErrorKind::RateLimit => self.exponential(self.rate_limit_base_delay, attempt),
            ErrorKind::Network | ErrorKind::Initialization => {
                self.exponential(self.network_base_delay, attempt)
            }
        };
        RetryDecision {
            retry: true,
            delay,
            force_reinit,
        }
    }

    fn exponential(&self, base: Duration, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        base.saturating_mul(1u32 << shift).min(self.max_delay)
    }
}

/// Per-call bookkeeping on top of a shared `RetryPolicy`.
#[derive(Debug)]
pub struct RetryLedger<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    bot_detections: u32,
    total_delay: Duration,
}

impl<'a> RetryLedger<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            bot_detections: 0,
            total_delay: Duration::ZERO,
        }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }

    pub fn record_failure(&mut self, kind: ErrorKind) -> RetryDecision {
        let decision = self
            .policy
            .should_retry(self.attempts, kind, self.bot_detections);
        if kind == ErrorKind::BotDetection {
            self.bot_detections += 1;
        }
        if decision.retry {
            self.total_delay += decision.delay;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetrySection {
            max_attempts: 3,
            network_base_delay_ms: 1_000,
            rate_limit_base_delay_ms: 5_000,
            bot_detection_delay_ms: 5_000,
            max_delay_ms: 30_000,
        })
    }

    #[test]
    fn network_delay_doubles_per_attempt() {
        let policy = policy();
        let first = policy.should_retry(1, ErrorKind::Network, 0);
        let second = policy.should_retry(2, ErrorKind::Network, 0);
        assert!(first.retry && second.retry);
        assert_eq!(first.delay, Duration::from_secs(1));
        assert_eq!(second.delay, Duration::from_secs(2));
        assert!(!first.force_reinit);
    }

    #[test]
    fn no_retry_once_attempts_are_spent() {
        let policy = policy();
        for kind in [
            ErrorKind::Network,
            ErrorKind::RateLimit,
            ErrorKind::Initialization,
            ErrorKind::BotDetection,
        ] {
            assert!(!policy.should_retry(3, kind, 0).retry, "{kind:?}");
        }
    }

    #[test]
    fn invalid_input_is_never_retried() {
        let decision = policy().should_retry(1, ErrorKind::InvalidInput, 0);
        assert!(!decision.retry);
        assert!(!decision.force_reinit);
    }

    #[test]
    fn rate_limit_waits_longer_than_network() {
        let policy = policy();
        for attempt in 1..3 {
            let network = policy.should_retry(attempt, ErrorKind::Network, 0).delay;
            let throttled = policy.should_retry(attempt, ErrorKind::RateLimit, 0).delay;
            assert!(throttled > network);
        }
    }

    #[test]
    fn bot_detection_retries_once_with_reinit() {
        let policy = policy();
        let first = policy.should_retry(1, ErrorKind::BotDetection, 0);
        assert!(first.retry);
        assert!(first.force_reinit);
        assert_eq!(first.delay, Duration::from_secs(5));

        let second = policy.should_retry(2, ErrorKind::BotDetection, 1);
        assert!(!second.retry);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::new(RetrySection {
            max_attempts: 10,
            network_base_delay_ms: 1_000,
            rate_limit_base_delay_ms: 20_000,
            bot_detection_delay_ms: 60_000,
            max_delay_ms: 8_000,
        });
        assert_eq!(
            policy.should_retry(9, ErrorKind::Network, 0).delay,
            Duration::from_secs(8)
        );
        assert_eq!(
            policy.should_retry(1, ErrorKind::RateLimit, 0).delay,
            Duration::from_secs(8)
        );
        assert_eq!(
            policy.should_retry(1, ErrorKind::BotDetection, 0).delay,
            Duration::from_secs(8)
        );
        assert_eq!(policy.max_total_delay(), Duration::from_secs(72));
    }

    #[test]
    fn ledger_stays_within_total_bound() {
        let policy = policy();
        let mut ledger = RetryLedger::new(&policy);
        loop {
            ledger.begin_attempt();
            if !ledger.record_failure(ErrorKind::RateLimit).retry {
                break;
            }
        }
        assert_eq!(ledger.attempts(), policy.max_attempts());
        assert!(ledger.total_delay() <= policy.max_total_delay());
    }

    #[test]
    fn zero_attempts_is_treated_as_one() {
        let policy = RetryPolicy::new(RetrySection {
            max_attempts: 0,
            ..RetrySection::default()
        });
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1, ErrorKind::Network, 0).retry);
        assert_eq!(policy.max_total_delay(), Duration::ZERO);
    }
}
