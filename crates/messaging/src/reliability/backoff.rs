//! Backoff policy and per-task backoff counter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for waits between consecutive failed operations
///
/// The wait for the n-th consecutive failure (0-based) is
/// `min * factor^n`, clamped to `[min, max]`. With jitter enabled the wait is
/// drawn uniformly from `[min, computed]` so that pollers failing together
/// spread their retries out.
///
/// The policy itself is immutable and cheap to clone. Progress through the
/// schedule lives in a [`Backoff`] counter; each concurrent task must own
/// its own counter.
///
/// # Example
///
/// ```
/// use harbor_messaging::BackoffPolicy;
/// use std::time::Duration;
///
/// let mut backoff = BackoffPolicy::exponential()
///     .with_min(Duration::from_millis(100))
///     .with_max(Duration::from_secs(10))
///     .with_jitter(false)
///     .counter();
///
/// assert_eq!(backoff.next(), Duration::from_millis(100));
/// assert_eq!(backoff.next(), Duration::from_millis(200));
/// assert_eq!(backoff.next(), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Multiplier applied per consecutive failure
    pub factor: f64,

    /// Wait after the first failure, and lower bound of every wait
    #[serde(with = "duration_millis")]
    pub min: Duration,

    /// Upper bound of every wait
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Randomize waits within `[min, computed]`
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// Exponential backoff with sensible defaults
    ///
    /// - 2x factor
    /// - 1 second minimum
    /// - 30 second maximum
    /// - jitter enabled
    pub fn exponential() -> Self {
        Self {
            factor: 2.0,
            min: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Constant wait, no growth and no jitter
    pub fn fixed(interval: Duration) -> Self {
        Self {
            factor: 1.0,
            min: interval,
            max: interval,
            jitter: false,
        }
    }

    /// Set the growth factor (values below 1.0 are raised to 1.0)
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = if factor.is_finite() {
            factor.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Set the minimum wait
    pub fn with_min(mut self, min: Duration) -> Self {
        self.min = min;
        self
    }

    /// Set the maximum wait
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Create a fresh counter starting at the first stage of this policy
    pub fn counter(&self) -> Backoff {
        Backoff::new(self.clone())
    }

    /// Wait before retrying after the given number of previous consecutive
    /// failures (0 for the first failure), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.max.max(self.min);

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let computed = self.min.as_secs_f64() * self.factor.max(1.0).powi(exponent);

        if !computed.is_finite() || computed >= ceiling.as_secs_f64() {
            return ceiling;
        }
        // f64 seconds can exceed what a Duration holds; clamp in Duration space
        Duration::try_from_secs_f64(computed).map_or(ceiling, |d| d.clamp(self.min, ceiling))
    }

    /// Wait for the given attempt with jitter applied if enabled
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base <= self.min {
            return base;
        }

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(self.min.as_secs_f64()..=base.as_secs_f64());
        Duration::try_from_secs_f64(jittered).map_or(base, |d| d.clamp(self.min, base))
    }
}

/// Mutable progress through a [`BackoffPolicy`]
///
/// Not shared between tasks: every poller creates its own counter and keeps
/// it across loop iterations, so consecutive failures of that poller advance
/// the schedule and a success resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a counter at the first stage of `policy`
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Wait for the current failure, advancing to the next stage
    pub fn next(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Return to the first stage
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures recorded since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The policy driving this counter
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
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
    fn test_exponential_defaults() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.factor, 2.0);
        assert_eq!(policy.min, Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(30));
        assert!(policy.jitter);
    }

    #[test]
    fn test_base_delay_growth() {
        let policy = BackoffPolicy::exponential();

        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn test_max_cap() {
        let policy = BackoffPolicy::exponential().with_max(Duration::from_secs(5));

        assert_eq!(policy.base_delay(3), Duration::from_secs(5));
        assert_eq!(policy.base_delay(1_000), Duration::from_secs(5));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_unbounded_ceiling_never_panics() {
        for jitter in [false, true] {
            let mut backoff = BackoffPolicy::exponential()
                .with_max(Duration::MAX)
                .with_jitter(jitter)
                .counter();

            let mut previous = Duration::ZERO;
            for _ in 0..100 {
                let delay = backoff.next();
                assert!(delay >= Duration::from_secs(1));
                if !jitter {
                    assert!(delay >= previous);
                }
                previous = delay;
            }
        }

        let policy = BackoffPolicy::exponential().with_max(Duration::MAX);
        assert_eq!(policy.base_delay(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_monotonic_until_ceiling() {
        let policy = BackoffPolicy::exponential().with_factor(1.5);

        let delays: Vec<_> = (0..20).map(|n| policy.base_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max));
        assert_eq!(*delays.last().unwrap(), policy.max);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = BackoffPolicy::exponential();

        for attempt in 0..10 {
            let base = policy.base_delay(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= policy.min);
                assert!(delay <= base);
            }
        }
    }

    #[test]
    fn test_fixed() {
        let mut backoff = BackoffPolicy::fixed(Duration::from_millis(250)).counter();
        for _ in 0..5 {
            assert_eq!(backoff.next(), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_factor_floor() {
        let policy = BackoffPolicy::exponential().with_factor(0.5);
        assert_eq!(policy.factor, 1.0);

        let policy = BackoffPolicy::exponential().with_factor(f64::NAN);
        assert_eq!(policy.factor, 1.0);
    }

    #[test]
    fn test_counter_advances_and_resets() {
        let mut backoff = BackoffPolicy::exponential().with_jitter(false).counter();

        assert_eq!(backoff.next(), Duration::from_secs(1));
        assert_eq!(backoff.next(), Duration::from_secs(2));
        assert_eq!(backoff.next(), Duration::from_secs(4));
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next(), Duration::from_secs(1));
    }

    #[test]
    fn test_counters_are_independent() {
        let policy = BackoffPolicy::exponential().with_jitter(false);
        let mut a = policy.counter();
        let mut b = policy.counter();

        a.next();
        a.next();

        assert_eq!(b.next(), Duration::from_secs(1));
        assert_eq!(a.next(), Duration::from_secs(4));
    }

    #[test]
    fn test_serialization() {
        let policy = BackoffPolicy::exponential()
            .with_min(Duration::from_millis(500))
            .with_jitter(false);

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"min\":500"));

        let parsed: BackoffPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
