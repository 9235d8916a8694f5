//! Per-user token bucket for generation requests

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::UserId;

/// Rate limiter using token bucket algorithm
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens per user: user_id -> (tokens, last_refill)
    buckets: RwLock<HashMap<UserId, (f32, Instant)>>,
    /// Max tokens per bucket
    max_tokens: u32,
    /// Refill rate (tokens per second)
    refill_rate: f32,
}

impl RateLimiter {
    /// Allow `per_minute` requests per user per minute, bursting up to the same amount
    pub fn per_minute(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        Self {
            buckets: RwLock::new(HashMap::new()),
            max_tokens: per_minute,
            refill_rate: per_minute as f32 / 60.0,
        }
    }

    /// Consume a token (returns false if rate limited)
    pub async fn consume(&self, user_id: UserId) -> bool {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();

        let (tokens, last_refill) = buckets
            .entry(user_id)
            .or_insert((self.max_tokens as f32, now));

        let refilled = self.refilled(*tokens, *last_refill);
        *last_refill = now;

        if refilled >= 1.0 {
            *tokens = refilled - 1.0;
            true
        } else {
            *tokens = refilled;
            false
        }
    }

    fn refilled(&self, tokens: f32, last_refill: Instant) -> f32 {
        let elapsed = last_refill.elapsed().as_secs_f32();
        (tokens + elapsed * self.refill_rate).min(self.max_tokens as f32)
    }
}
