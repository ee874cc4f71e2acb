use std::time::Duration;

use rand::Rng;

use crate::config::NegotiationConfig;

/// Upper bound (exclusive) of the jitter fraction added on top of a delay.
pub const MAX_JITTER: f64 = 0.2;

const MAX_EXPONENT: u32 = 64;

pub trait JitterSource: Send + Sync {
    /// Returns a fraction in `[0, MAX_JITTER)`.
    fn sample(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..MAX_JITTER)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, MAX_JITTER)
    }
}

/// `min(max, base * 2^attempt) * (1 + jitter)`. Saturates at `max` instead of
/// overflowing for large attempt numbers.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let base_ns = base.as_nanos() as f64;
    let max_ns = max.as_nanos() as f64;
    let exp = attempt.min(MAX_EXPONENT) as i32;
    let without_jitter = (base_ns * 2f64.powi(exp)).min(max_ns);
    let jitter_factor = 1.0 + jitter.clamp(0.0, MAX_JITTER);
    Duration::from_nanos((without_jitter * jitter_factor).round() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &NegotiationConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        backoff_delay(attempt, self.base, self.max, jitter.sample())
    }

    /// The delay before jitter is applied.
    pub fn capped(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base, self.max, 0.0)
    }
}
