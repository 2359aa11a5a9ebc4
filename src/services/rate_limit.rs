use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::error::{AppError, Result};

/// GCRA buckets keyed by user id
#[derive(Clone)]
pub struct UserRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl UserRateLimiter {
    /// `None` when `per_second` is zero. A zero burst falls back to the rate.
    pub fn new(config: &RateLimitConfig) -> Option<Self> {
        let per_second = NonZeroU32::new(config.per_second)?;
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Some(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        })
    }

    /// Spend one request from the user's allowance
    pub fn check(&self, user_id: &str) -> Result<()> {
        self.limiter.check_key(&user_id.to_string()).map_err(|_| {
            tracing::debug!(user_id, "Rate limit exceeded");
            AppError::TooManyRequests("Rate limit exceeded".to_string())
        })
    }

    /// Forget users whose buckets have refilled
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_users(&self) -> usize {
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_second: u32, burst: u32) -> Option<UserRateLimiter> {
        UserRateLimiter::new(&RateLimitConfig { per_second, burst })
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = limiter(2, 5).unwrap();
        for _ in 0..5 {
            limiter.check("alice").unwrap();
        }
        assert!(matches!(limiter.check("alice"), Err(AppError::TooManyRequests(_))));

        // Buckets are per user
        limiter.check("bob").unwrap();
        assert_eq!(limiter.tracked_users(), 2);
    }

    #[test]
    fn test_zero_rate_disables() {
        assert!(limiter(0, 5).is_none());
        // Zero burst still admits one request per period
        let limiter = limiter(3, 0).unwrap();
        for _ in 0..3 {
            limiter.check("alice").unwrap();
        }
        assert!(limiter.check("alice").is_err());
    }
}
