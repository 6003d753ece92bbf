//! # Rate Limiter & Retry Policy
//!
//! One token bucket per platform adapter, refilled continuously from the
//! adapter's declared per-minute budget. Remote callers acquire a token
//! before every outbound call; exhausted buckets suspend the caller until
//! refill or cancellation.
//!
//! Retries on transient failures use exponential backoff with jitter,
//! capped by the configured attempt budget. Authentication errors never
//! retry.

use crate::error::{Result, SyncError};
use core_runtime::SyncSettings;
use platform_traits::{Platform, PlatformError};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bucket applied to platforms that never declared a budget.
const DEFAULT_BUDGET_PER_MINUTE: u32 = 60;

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(budget_per_minute: u32) -> Self {
        let capacity = budget_per_minute.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Per-platform token buckets serializing outbound adapter calls.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<Platform, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a platform's budget. Called when its adapter registers.
    pub fn register(&self, platform: Platform, budget_per_minute: u32) {
        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
        buckets.insert(platform, TokenBucket::new(budget_per_minute));
    }

    /// Acquire one token for `platform`, suspending until refill when the
    /// bucket is empty. Returns [`SyncError::Cancelled`] if the token fires
    /// while waiting.
    pub async fn acquire(&self, platform: Platform, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let wait = {
                let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
                let bucket = buckets
                    .entry(platform)
                    .or_insert_with(|| TokenBucket::new(DEFAULT_BUDGET_PER_MINUTE));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            debug!(%platform, wait_ms = wait.as_millis() as u64, "rate limit wait");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            }
        }
    }
}

/// Exponential backoff with jitter for transient remote failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Fraction of the delay randomized in both directions.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.retry_max_attempts,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            jitter_ratio: settings.retry_jitter_ratio,
        }
    }

    /// Whether `error` deserves another attempt after `attempt` failures.
    pub fn should_retry(&self, error: &PlatformError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Backoff before attempt `attempt + 1`; doubles per attempt with
    /// `jitter_ratio` randomization.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

/// One rate-limited remote call with retry.
///
/// Acquires a token before every attempt. Transient and rate-limit
/// failures back off with jitter up to the attempt budget and then
/// surface as [`SyncError::RetriesExhausted`]; authentication and
/// permission failures surface immediately; cancellation is observed at
/// every suspension point.
pub async fn call_with_retry<T, F, Fut>(
    limiter: &RateLimiter,
    retry: &RetryPolicy,
    platform: Platform,
    cancel: &CancellationToken,
    make: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = platform_traits::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        limiter.acquire(platform, cancel).await?;

        attempt += 1;
        // Race the call against cancellation so an in-flight request is
        // abandoned at the next suspension point.
        let result = tokio::select! {
            result = make() => result,
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                if retry.should_retry(&error, attempt) {
                    let delay = retry.delay_for(attempt);
                    tracing::warn!(
                        %platform,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "remote call failed; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    }
                } else if error.is_retryable() {
                    return Err(SyncError::RetriesExhausted {
                        attempts: attempt,
                        cause: error.to_string(),
                    });
                } else {
                    return Err(error.into());
                }
            }
        }
    }
}
