use crate::error::{InvokeError, RateLimited};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

const MAX_JITTER_FRACTION: f64 = 0.999_999;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, first try included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to every wait
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("initial_delay must be positive")]
    ZeroDelay,
    #[error("multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroDelay);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        Ok(())
    }

    /// Deterministic part of the wait after failed attempt `attempt` (1-based):
    /// `initial_delay * multiplier^(attempt - 1)`, saturating at `Duration::MAX`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Source of the random fraction added to each backoff delay.
///
/// Implementations must return values in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Constant jitter, for reproducible timing.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Emitted before every backoff sleep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryNotice {
    pub attempt: u32,
    pub max_attempts: u32,
    pub wait: Duration,
}

impl fmt::Display for RetryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API rate limit reached. Retry {}/{} in {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.wait.as_secs_f64()
        )
    }
}

/// Result of a single attempt, after classification.
#[derive(Debug, PartialEq)]
pub enum AttemptOutcome<T, E> {
    Success(T),
    RetryableFailure(E),
    FatalFailure(E),
}

impl<T, E: RateLimited> From<Result<T, E>> for AttemptOutcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(err) if err.is_rate_limited() => AttemptOutcome::RetryableFailure(err),
            Err(err) => AttemptOutcome::FatalFailure(err),
        }
    }
}

/// Session-wide count of rate-limited attempts, owned by the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    total: u64,
}

impl RetryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn record(&mut self) {
        self.total += 1;
    }
}

/// Per-invocation bookkeeping; lives for one call to [`RetryPolicy::invoke`].
#[derive(Debug, Default)]
pub struct InvocationState {
    attempts_made: u32,
}

impl InvocationState {
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    fn begin_attempt(&mut self) -> u32 {
        self.attempts_made += 1;
        self.attempts_made
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Arc<dyn JitterSource>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            config: RetryConfig::default(),
            jitter: Arc::new(RandomJitter),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            jitter: Arc::new(RandomJitter),
        })
    }

    pub fn with_jitter(mut self, source: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(source);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Full wait after failed attempt `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let fraction = self.jitter.sample().clamp(0.0, MAX_JITTER_FRACTION);
        let jitter = Duration::try_from_secs_f64(self.config.jitter.as_secs_f64() * fraction)
            .unwrap_or(Duration::MAX);
        self.config.base_delay(attempt).saturating_add(jitter)
    }

    /// Run `operation` until it succeeds, fails fatally, or exhausts the
    /// attempt budget. Every rate-limited attempt is added to `counter`.
    pub async fn invoke<F, Fut, T, E>(
        &self,
        counter: &mut RetryCounter,
        operation: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimited + fmt::Display,
    {
        self.invoke_with_notices(counter, |_| {}, operation).await
    }

    /// Like [`invoke`](Self::invoke), handing every [`RetryNotice`] to
    /// `on_notice` before sleeping. Every rate-limited attempt waits, the
    /// last one included, before the budget is checked.
    pub async fn invoke_with_notices<F, Fut, T, E, N>(
        &self,
        counter: &mut RetryCounter,
        mut on_notice: N,
        mut operation: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimited + fmt::Display,
        N: FnMut(&RetryNotice),
    {
        let mut state = InvocationState::default();

        loop {
            let attempt = state.begin_attempt();

            match AttemptOutcome::from(operation().await) {
                AttemptOutcome::Success(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                AttemptOutcome::FatalFailure(err) => {
                    warn!("Attempt {} failed with non-retryable error: {}", attempt, err);
                    return Err(InvokeError::Fatal(err));
                }
                AttemptOutcome::RetryableFailure(err) => {
                    let notice = RetryNotice {
                        attempt,
                        max_attempts: self.config.max_attempts,
                        wait: self.delay_for(attempt),
                    };
                    warn!("{} ({})", notice, err);
                    on_notice(&notice);
                    sleep(notice.wait).await;
                    counter.record();

                    if state.attempts_made() >= self.config.max_attempts {
                        warn!("Operation rate limited on all {} attempts: {}", attempt, err);
                        return Err(InvokeError::ExhaustedRetries {
                            attempts: attempt,
                            last: err,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Busy,
        Broken,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Busy => write!(f, "429 Too Many Requests"),
                TestError::Broken => write!(f, "400 Bad Request"),
            }
        }
    }

    impl RateLimited for TestError {
        fn is_rate_limited(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        })
        .unwrap()
        .with_jitter(FixedJitter(0.5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;
        let start = Instant::now();

        let result = policy(3)
            .invoke(&mut counter, || {
                calls += 1;
                async { Ok::<_, TestError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
        assert_eq!(counter.total(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_two_rate_limits() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;
        let mut notices = Vec::new();

        let result = policy(3)
            .invoke_with_notices(
                &mut counter,
                |notice| notices.push(*notice),
                || {
                    calls += 1;
                    let call = calls;
                    async move {
                        if call < 3 {
                            Err(TestError::Busy)
                        } else {
                            Ok("done")
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
        assert_eq!(counter.total(), 2);
        let waits: Vec<Duration> = notices.iter().map(|n| n.wait).collect();
        assert_eq!(
            waits,
            vec![Duration::from_millis(1500), Duration::from_millis(2500)]
        );
        assert_eq!(notices[1].attempt, 2);
        assert_eq!(notices[1].max_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_follow_backoff_schedule() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;
        let start = Instant::now();

        let _ = policy(3)
            .invoke(&mut counter, || {
                calls += 1;
                let call = calls;
                async move {
                    if call < 3 {
                        Err(TestError::Busy)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(4000));
        assert!(elapsed < Duration::from_millis(4100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;

        let result = policy(3)
            .invoke(&mut counter, || {
                calls += 1;
                async { Err::<(), _>(TestError::Busy) }
            })
            .await;

        match result {
            Err(InvokeError::ExhaustedRetries { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, TestError::Busy);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls, 3);
        assert_eq!(counter.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_rate_limit_still_waits_and_notifies() {
        let policy = RetryPolicy::new(RetryConfig::default())
            .unwrap()
            .with_jitter(FixedJitter(0.0));
        let mut counter = RetryCounter::new();
        let mut notices = Vec::new();
        let start = Instant::now();

        let result = policy
            .invoke_with_notices(
                &mut counter,
                |notice| notices.push(*notice),
                || async { Err::<(), _>(TestError::Busy) },
            )
            .await;

        assert!(result.unwrap_err().is_exhausted());
        let waits: Vec<Duration> = notices.iter().map(|n| n.wait).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(notices[2].attempt, 3);
        assert_eq!(notices[2].max_attempts, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(counter.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;
        let mut notices = 0;
        let start = Instant::now();

        let result = policy(5)
            .invoke_with_notices(
                &mut counter,
                |_| notices += 1,
                || {
                    calls += 1;
                    async { Err::<(), _>(TestError::Broken) }
                },
            )
            .await;

        assert!(matches!(result, Err(InvokeError::Fatal(TestError::Broken))));
        assert_eq!(calls, 1);
        assert_eq!(notices, 0);
        assert_eq!(counter.total(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_after_rate_limit_stops_immediately() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;

        let result = policy(5)
            .invoke(&mut counter, || {
                calls += 1;
                let call = calls;
                async move {
                    if call == 1 {
                        Err::<(), _>(TestError::Busy)
                    } else {
                        Err(TestError::Broken)
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(InvokeError::Fatal(TestError::Broken))));
        assert_eq!(calls, 2);
        assert_eq!(counter.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_accumulates_across_invocations() {
        let policy = policy(2);
        let mut counter = RetryCounter::new();

        let _ = policy
            .invoke(&mut counter, || async { Err::<(), _>(TestError::Busy) })
            .await;
        let _ = policy
            .invoke(&mut counter, || async { Ok::<_, TestError>(()) })
            .await;
        let _ = policy
            .invoke(&mut counter, || async { Err::<(), _>(TestError::Broken) })
            .await;

        assert_eq!(counter.total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_budget() {
        let mut counter = RetryCounter::new();
        let mut calls = 0;

        let result = policy(1)
            .invoke(&mut counter, || {
                calls += 1;
                async { Err::<(), _>(TestError::Busy) }
            })
            .await;

        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(calls, 1);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_base_delay_grows_geometrically() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(250),
            multiplier: 3.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.base_delay(1), Duration::from_millis(250));
        assert_eq!(config.base_delay(2), Duration::from_millis(750));
        assert_eq!(config.base_delay(3), Duration::from_millis(2250));
    }

    #[test]
    fn test_base_delay_saturates_instead_of_overflowing() {
        let doubling = RetryConfig::default();
        assert_eq!(doubling.base_delay(65), Duration::MAX);
        assert_eq!(doubling.base_delay(u32::MAX), Duration::MAX);

        let steep = RetryConfig {
            multiplier: 1e10,
            ..RetryConfig::default()
        };
        assert_eq!(steep.base_delay(2), Duration::from_secs(10_000_000_000));
        assert_eq!(steep.base_delay(3), Duration::MAX);

        let policy = RetryPolicy::new(steep)
            .unwrap()
            .with_jitter(FixedJitter(0.5));
        assert_eq!(policy.delay_for(3), Duration::MAX);
        assert_eq!(policy.delay_for(50), Duration::MAX);
    }

    #[test]
    fn test_random_jitter_stays_in_unit_interval() {
        let policy = RetryPolicy::default();
        for _ in 0..1000 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2));
        }
    }

    #[test]
    fn test_out_of_range_jitter_is_clamped() {
        let policy = RetryPolicy::default().with_jitter(FixedJitter(7.0));
        assert!(policy.delay_for(1) < Duration::from_secs(2));
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let zero_attempts = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(
            RetryPolicy::new(zero_attempts).unwrap_err(),
            ConfigError::ZeroAttempts
        );

        let zero_delay = RetryConfig {
            initial_delay: Duration::ZERO,
            ..RetryConfig::default()
        };
        assert_eq!(zero_delay.validate(), Err(ConfigError::ZeroDelay));

        let shrinking = RetryConfig {
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert_eq!(
            shrinking.validate(),
            Err(ConfigError::InvalidMultiplier(0.5))
        );
    }

    #[test]
    fn test_outcome_classification() {
        let ok: AttemptOutcome<u8, TestError> = Ok(1).into();
        let busy: AttemptOutcome<u8, TestError> = Err(TestError::Busy).into();
        let broken: AttemptOutcome<u8, TestError> = Err(TestError::Broken).into();
        assert_eq!(ok, AttemptOutcome::Success(1));
        assert_eq!(busy, AttemptOutcome::RetryableFailure(TestError::Busy));
        assert_eq!(broken, AttemptOutcome::FatalFailure(TestError::Broken));
    }

    #[test]
    fn test_notice_message() {
        let notice = RetryNotice {
            attempt: 2,
            max_attempts: 3,
            wait: Duration::from_millis(2340),
        };
        assert_eq!(
            notice.to_string(),
            "API rate limit reached. Retry 2/3 in 2.3 seconds..."
        );
    }
}
