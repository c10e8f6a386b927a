use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::address::AddressKey;
use crate::cache::Coordinate;
use crate::config::AppConfig;
use crate::errors::ResolutionError;

const MAX_BACKOFF_EXPONENT: u32 = 10;

/// One external lookup, with no retry or spacing of its own.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, key: &AddressKey) -> Result<Coordinate, ResolutionError>;
}

/// Time source for spacing and backoff; tests substitute a manual clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_jitter: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.geocoder_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.geocoder_backoff_base_ms),
            max_jitter: Duration::from_millis(config.geocoder_backoff_jitter_ms),
            request_timeout: config.request_timeout(),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base × 2^(attempt−1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

pub struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self, clock: &dyn Clock) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = clock.now().saturating_duration_since(prev);
            if elapsed < self.min_interval {
                clock.sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(clock.now());
    }
}

pub struct RateLimitedResolver {
    geocoder: Arc<dyn Geocoder>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    jitter_rng: Mutex<StdRng>,
}

impl RateLimitedResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, min_interval: Duration, policy: RetryPolicy) -> Self {
        Self::with_clock(geocoder, min_interval, policy, Arc::new(TokioClock))
    }

    pub fn from_config(geocoder: Arc<dyn Geocoder>, config: &AppConfig) -> Self {
        Self::new(geocoder, config.min_interval(), RetryPolicy::from_config(config))
    }

    pub fn with_clock(
        geocoder: Arc<dyn Geocoder>,
        min_interval: Duration,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            geocoder,
            limiter: RateLimiter::new(min_interval),
            policy,
            clock,
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub async fn resolve(&self, key: &AddressKey) -> Result<Coordinate, ResolutionError> {
        if key.is_empty() {
            return Err(ResolutionError::Malformed(format!(
                "{} key has no address components",
                key.variant().as_tag()
            )));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.wait(self.clock.as_ref()).await;
            let outcome = match timeout(self.policy.request_timeout, self.geocoder.geocode(key)).await
            {
                Ok(result) => result,
                Err(_) => Err(ResolutionError::Timeout),
            };

            match outcome {
                Ok(coordinate) => {
                    debug!(key = %key, attempt, "geocoder resolved key");
                    return Ok(coordinate);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        ?err,
                        key = %key,
                        attempt,
                        "geocoder lookup failed; retrying after {:?}",
                        delay
                    );
                    self.clock.sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    warn!(?err, key = %key, attempt, "geocoder retries exhausted");
                    return Err(ResolutionError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    debug!(?err, key = %key, attempt, "geocoder returned a definitive failure");
                    return Err(err);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff(attempt);
        let jitter_ms = self.policy.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = self.jitter_rng.lock().gen_range(0..jitter_ms);
        base + Duration::from_millis(jitter)
    }
}
