//! Injectable retry backoff policies
//!
//! Retry behavior is a pure function of the attempt number so it can be
//! tested deterministically without real delays. The executor and the
//! deletion verifier both consume a [`BackoffPolicy`]; production wiring
//! uses [`ExponentialBackoff`], tests use [`NoBackoff`].

use std::time::Duration;

/// Decides how long to wait before retry attempt `attempt` (0-based)
/// and how many attempts are allowed in total.
pub trait BackoffPolicy: Send + Sync {
    /// Delay to wait after a failure of the given 0-based attempt.
    fn delay(&self, attempt: u32) -> Duration;

    /// Total attempts allowed (including the first).
    fn max_attempts(&self) -> u32;
}

/// Doubling backoff: `base * 2^attempt`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Create a policy with the given base delay and attempt budget.
    #[must_use]
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // Cap the shift so a large attempt number cannot overflow.
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Zero-delay policy for tests.
#[derive(Debug, Clone)]
pub struct NoBackoff {
    max_attempts: u32,
}

impl NoBackoff {
    /// Create a zero-delay policy with the given attempt budget.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl BackoffPolicy for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
