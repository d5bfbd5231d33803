//! Token-bucket rate limiting with adaptive backoff.
//!
//! Every POST draws from the global bucket plus the post burst/sustained
//! pair; DELETE draws from the global bucket plus the delete pair. On top
//! of bucket pacing, a streak of 429/5xx responses adds an exponential
//! backoff sleep before any acquire returns.

use std::time::Instant;

use tokio::time::{sleep, Duration};

/// Tokens-per-window configuration for one bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub tokens: u32,
    pub window_sec: u32,
}

/// A continuously refilling token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens per second.
    rate: f64,
    updated: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(cfg: BucketConfig) -> Self {
        Self {
            capacity: f64::from(cfg.tokens),
            tokens: f64::from(cfg.tokens),
            rate: f64::from(cfg.tokens) / f64::from(cfg.window_sec.max(1)),
            updated: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.updated).as_secs_f64();
        self.updated = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
    }

    /// Take `n` tokens, sleeping until enough have refilled.
    pub async fn acquire(&mut self, n: u32) {
        let n = f64::from(n);
        loop {
            self.refill();
            if self.tokens >= n {
                self.tokens -= n;
                return;
            }
            let wait = ((n - self.tokens) / self.rate).max(0.001);
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Tokens currently available (after refill), for inspection.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

/// Rate limiter configuration: one global bucket plus burst/sustained pairs
/// per direction.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub global: BucketConfig,
    pub post_burst: BucketConfig,
    pub post_sustained: BucketConfig,
    pub delete_burst: BucketConfig,
    pub delete_sustained: BucketConfig,
    pub adaptive_backoff_base_ms: u64,
    pub adaptive_backoff_max_ms: u64,
}

/// Global + endpoint buckets with adaptive backoff on 429/5xx.
#[derive(Debug)]
pub struct RateLimiter {
    global: TokenBucket,
    post_burst: TokenBucket,
    post_sustained: TokenBucket,
    delete_burst: TokenBucket,
    delete_sustained: TokenBucket,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    error_streak: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            global: TokenBucket::new(cfg.global),
            post_burst: TokenBucket::new(cfg.post_burst),
            post_sustained: TokenBucket::new(cfg.post_sustained),
            delete_burst: TokenBucket::new(cfg.delete_burst),
            delete_sustained: TokenBucket::new(cfg.delete_sustained),
            backoff_base_ms: cfg.adaptive_backoff_base_ms,
            backoff_max_ms: cfg.adaptive_backoff_max_ms,
            error_streak: 0,
        }
    }

    /// Acquire one POST token from each bucket in the POST path.
    pub async fn acquire_post(&mut self) {
        self.global.acquire(1).await;
        self.post_burst.acquire(1).await;
        self.post_sustained.acquire(1).await;
        self.adaptive_wait().await;
    }

    /// Acquire one DELETE token from each bucket in the DELETE path.
    pub async fn acquire_delete(&mut self) {
        self.global.acquire(1).await;
        self.delete_burst.acquire(1).await;
        self.delete_sustained.acquire(1).await;
        self.adaptive_wait().await;
    }

    /// Feed a venue response status into the backoff streak. 429 and 5xx
    /// grow the streak; anything else shrinks it toward zero.
    pub fn record_response(&mut self, status_code: u16) {
        if status_code == 429 || status_code >= 500 {
            self.error_streak = self.error_streak.saturating_add(1);
        } else {
            self.error_streak = self.error_streak.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }

    /// Backoff sleep of `base * 2^(streak-1)` ms, capped.
    fn backoff_ms(&self) -> u64 {
        if self.error_streak == 0 {
            return 0;
        }
        let exp = self.error_streak.saturating_sub(1).min(32);
        self.backoff_max_ms
            .min(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }

    async fn adaptive_wait(&self) {
        let ms = self.backoff_ms();
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            global: BucketConfig { tokens: 1000, window_sec: 1 },
            post_burst: BucketConfig { tokens: 100, window_sec: 1 },
            post_sustained: BucketConfig { tokens: 1000, window_sec: 10 },
            delete_burst: BucketConfig { tokens: 100, window_sec: 1 },
            delete_sustained: BucketConfig { tokens: 1000, window_sec: 10 },
            adaptive_backoff_base_ms: 100,
            adaptive_backoff_max_ms: 5000,
        }
    }

    #[tokio::test]
    async fn bucket_depletes_and_refills() {
        let mut bucket = TokenBucket::new(BucketConfig { tokens: 2, window_sec: 1 });
        bucket.acquire(1).await;
        bucket.acquire(1).await;
        assert!(bucket.available() < 1.0);
        // The third acquire has to wait for refill.
        let start = Instant::now();
        bucket.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn error_streak_grows_on_429_and_5xx_and_shrinks_otherwise() {
        let mut limiter = RateLimiter::new(config());
        limiter.record_response(429);
        limiter.record_response(503);
        assert_eq!(limiter.error_streak(), 2);
        limiter.record_response(200);
        assert_eq!(limiter.error_streak(), 1);
        limiter.record_response(200);
        limiter.record_response(200);
        assert_eq!(limiter.error_streak(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut limiter = RateLimiter::new(config());
        assert_eq!(limiter.backoff_ms(), 0);
        limiter.record_response(500);
        assert_eq!(limiter.backoff_ms(), 100);
        limiter.record_response(500);
        assert_eq!(limiter.backoff_ms(), 200);
        for _ in 0..10 {
            limiter.record_response(500);
        }
        assert_eq!(limiter.backoff_ms(), 5000);
    }

    #[tokio::test]
    async fn acquire_post_and_delete_draw_from_their_buckets() {
        let mut limiter = RateLimiter::new(config());
        limiter.acquire_post().await;
        limiter.acquire_delete().await;
        assert!(limiter.global.available() <= 998.0 + 1.0);
        assert!(limiter.post_burst.available() <= 99.5);
        assert!(limiter.delete_burst.available() <= 99.5);
    }
}
