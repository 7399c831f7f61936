//! Per-(key, category) token bucket admission (C5).

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Metadata,
    Download,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refills proportionally to elapsed time, then attempts to consume one
    /// token. Returns `Ok(())` on admission, `Err(retry_after)` on denial.
    /// `tokens` is left untouched on denial, per the spec's own contract.
    fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let retry_after = deficit / self.refill_rate;
            Err(Duration::from_secs_f64(retry_after.max(0.0)))
        }
    }
}

/// Lazily creates one bucket per (key, category) and never destroys one
/// once created. Buckets for unknown keys are never created here — the
/// auth gate rejects before this component is ever consulted.
pub struct TokenBucketLimiter {
    metadata_capacity: f64,
    metadata_refill_rate: f64,
    download_capacity: f64,
    download_refill_rate: f64,
    buckets: Mutex<HashMap<(String, CategoryKey), TokenBucket>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CategoryKey {
    Metadata,
    Download,
}

impl From<Category> for CategoryKey {
    fn from(c: Category) -> Self {
        match c {
            Category::Metadata => CategoryKey::Metadata,
            Category::Download => CategoryKey::Download,
        }
    }
}

impl TokenBucketLimiter {
    pub fn new(burst_capacity: u32, metadata_rpm: u64, download_rpm: u64) -> Self {
        Self {
            metadata_capacity: burst_capacity as f64,
            metadata_refill_rate: metadata_rpm as f64 / 60.0,
            download_capacity: burst_capacity as f64,
            download_refill_rate: download_rpm as f64 / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one token for `(key, category)` if available; otherwise
    /// returns the duration the caller should wait before retrying.
    pub async fn admit(&self, key: &str, category: Category) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().await;
        let entry_key = (key.to_string(), category.into());
        let (capacity, refill_rate) = match category {
            Category::Metadata => (self.metadata_capacity, self.metadata_refill_rate),
            Category::Download => (self.download_capacity, self.download_refill_rate),
        };
        let bucket = buckets
            .entry(entry_key)
            .or_insert_with(|| TokenBucket::new(capacity, refill_rate));
        bucket.admit(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_burst_capacity_then_denies() {
        let limiter = TokenBucketLimiter::new(20, 100, 20);
        for _ in 0..20 {
            assert!(limiter.admit("key-a", Category::Metadata).await.is_ok());
        }
        let denial = limiter.admit("key-a", Category::Metadata).await;
        assert!(denial.is_err());
    }

    #[tokio::test]
    async fn categories_are_independent() {
        let limiter = TokenBucketLimiter::new(20, 100, 20);
        for _ in 0..20 {
            assert!(limiter.admit("key-a", Category::Metadata).await.is_ok());
        }
        assert!(limiter.admit("key-a", Category::Download).await.is_ok());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = TokenBucketLimiter::new(20, 100, 20);
        for _ in 0..20 {
            assert!(limiter.admit("key-a", Category::Metadata).await.is_ok());
        }
        assert!(limiter.admit("key-b", Category::Metadata).await.is_ok());
    }

    #[test]
    fn tokens_never_exceed_capacity_or_go_negative() {
        let mut bucket = TokenBucket::new(20.0, 1.0);
        let start = Instant::now();
        // Large elapsed time should clamp to capacity, not overflow it.
        bucket.last_refill = start - Duration::from_secs(10_000);
        let _ = bucket.admit(start);
        assert!(bucket.tokens >= 0.0 && bucket.tokens <= bucket.capacity);
    }
}
