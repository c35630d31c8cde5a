//! 발신 프레임 rate limiting.
//!
//! Token Bucket 알고리즘으로 연결별 발신 프레임 속도를 제한합니다.
//! 토큰이 없으면 `acquire`가 다음 토큰이 채워질 때까지 대기합니다.

use feed_core::RateLimitConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Token Bucket 구조체.
#[derive(Debug)]
struct TokenBucket {
    /// 현재 토큰 수
    tokens: f64,
    /// 마지막 리필 시간
    last_refill: Instant,
    /// 최대 토큰 수 (버킷 용량)
    max_tokens: f64,
    /// 초당 리필되는 토큰 수
    refill_rate: f64,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        let refill_rate = config.requests_per_second as f64;
        let max_tokens = (config.burst_size as f64).max(1.0);

        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// 토큰 소비 시도.
    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 토큰 리필.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// 다음 토큰까지 대기 시간.
    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

/// 연결 하나의 발신 Rate Limiter.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// 새 Rate Limiter 생성.
    pub fn new(config: &RateLimitConfig) -> Self {
        let bucket = if config.is_unlimited() {
            None
        } else {
            Some(Mutex::new(TokenBucket::new(config)))
        };
        Self { bucket }
    }

    /// 제한 없는 Rate Limiter.
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// 토큰을 하나 얻을 때까지 대기합니다.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                if bucket.try_acquire() {
                    return;
                }
                bucket.time_until_next_token()
            };
            trace!(wait_ms = wait.as_millis() as u64, "발신 한도 초과, 대기");
            tokio::time::sleep(wait).await;
        }
    }

    /// 대기 없이 토큰 획득을 시도합니다.
    pub async fn try_acquire(&self) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.lock().await.try_acquire(),
            None => true,
        }
    }
}
