// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger configuration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for operations that fail with a lock timeout.
///
/// Delays grow exponentially from `base_delay`, are capped at `max_delay`, and
/// are scaled by a random factor in `[1 - jitter, 1 + jitter]` so that
/// contending callers do not retry in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || jitter.is_nan() {
            return delay;
        }
        let scale = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        // Scaling can leave the representable range when the bounds are huge.
        Duration::try_from_secs_f64(delay.as_secs_f64() * scale).unwrap_or(delay)
    }

    /// Whether another retry is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Ledger-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Lock timeout for single-account operations and snapshots
    pub lock_timeout: Duration,
    /// Retry policy for lock timeouts
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_without_jitter() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_secs(1),
        )
        .with_jitter(0.25);

        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(74), "{delay:?}");
            assert!(delay <= Duration::from_millis(126), "{delay:?}");
        }
    }

    #[test]
    fn jitter_on_maximal_delay_does_not_overflow() {
        let policy = RetryPolicy::exponential(3, Duration::MAX, Duration::MAX).with_jitter(0.5);

        for attempt in 1..=3 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay > Duration::from_secs(u64::MAX / 4), "{delay:?}");
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::exponential(2, Duration::ZERO, Duration::ZERO);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn config_builders() {
        let config = LedgerConfig::default()
            .with_lock_timeout(Duration::from_millis(5))
            .with_retry(RetryPolicy::no_retry());
        assert_eq!(config.lock_timeout, Duration::from_millis(5));
        assert_eq!(config.retry.max_attempts, 0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = LedgerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LedgerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
