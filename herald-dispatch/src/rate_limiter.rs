//! Admission rate limiting using the token bucket algorithm
//!
//! The limiter caps how fast messages are *admitted* for sending so the
//! remote endpoint is not overwhelmed. It does not bound how many admitted
//! sends are still running.
//!
//! # Token Bucket Algorithm
//!
//! - Tokens are added to the bucket at a constant rate (`refill_rate`)
//! - Each admitted message consumes one token
//! - If no tokens are available, admission waits
//! - The bucket holds at most `capacity` tokens; anything beyond is dropped
//!
//! # Example
//!
//! ```text
//! Rate limit: 10 msg/sec, burst: 20
//! - Bucket starts empty
//! - Tokens refill at 10/sec
//! - After 2s idle, 20 messages can be admitted back to back (burst)
//! - Then limited to 10/sec sustained rate
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Slack used when comparing token counts, so that floating point drift
/// never leaves a waiter sleeping for zero time forever.
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct TokenBucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum tokens (burst limit)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

impl TokenBucket {
    fn new(messages_per_second: u32, burst_limit: u32) -> Self {
        Self {
            tokens: 0.0,
            capacity: f64::from(burst_limit.max(1)),
            refill_rate: f64::from(messages_per_second.max(1)),
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time, discarding overflow
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        let tokens_to_add = elapsed * self.refill_rate;
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            return Duration::ZERO;
        }

        let tokens_needed = 1.0 - self.tokens;
        let seconds = tokens_needed / self.refill_rate;
        Duration::from_secs_f64(seconds).max(Duration::from_micros(1))
    }
}

/// Token bucket gate shared by the listen loop
#[derive(Debug)]
pub struct RateLimiter {
    bucket: parking_lot::Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter admitting `messages_per_second` with bursts of up to
    /// `burst_limit` messages. Zero values are treated as one.
    #[must_use]
    pub fn new(messages_per_second: u32, burst_limit: u32) -> Self {
        Self {
            bucket: parking_lot::Mutex::new(TokenBucket::new(messages_per_second, burst_limit)),
        }
    }

    /// Take a token if one is available
    ///
    /// # Errors
    ///
    /// Returns the time to wait until the next token when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();

        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.time_until_available())
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tracing::trace!(
                wait_seconds = wait.as_secs_f64(),
                "Rate limit reached, waiting for a token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Current bucket state (for monitoring/debugging)
    pub fn stats(&self) -> RateLimitStats {
        let mut bucket = self.bucket.lock();
        bucket.refill();

        RateLimitStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_rate: bucket.refill_rate,
        }
    }
}

/// Snapshot of the limiter
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Currently available tokens
    pub available_tokens: f64,
    /// Maximum capacity (burst limit)
    pub capacity: f64,
    /// Refill rate (tokens per second)
    pub refill_rate: f64,
}
