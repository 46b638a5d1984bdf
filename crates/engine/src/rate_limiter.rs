// Copyright 2025 egafetch contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A shared token bucket gating aggregate bandwidth across every chunk
//! worker of every file in the run. There's no off-the-shelf crate for
//! this in the dependency stack already in use, so it's a small
//! first-principles implementation behind the same `Arc<Mutex<..>>` shape
//! the rest of the engine uses for shared mutable state.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

struct Bucket {
    tokens:      f64,
    last_refill: Instant,
}

/// Caps aggregate throughput to a fixed bytes-per-second rate with a
/// one-second burst allowance.
pub struct RateLimiter {
    rate:  f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec as f64;
        Self {
            rate,
            state: Mutex::new(Bucket {
                tokens:      rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks until `bytes` worth of budget has been drawn from the
    /// bucket, or returns `Err(EngineError::Cancelled)` if `cancel` fires
    /// first.
    pub async fn acquire(&self, bytes: u64, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut remaining = bytes as f64;
        while remaining > 0.0 {
            let wait = {
                let mut bucket = self.state.lock().await;
                bucket.refill(self.rate);
                if bucket.tokens >= remaining {
                    bucket.tokens -= remaining;
                    remaining = 0.0;
                    None
                } else {
                    let take = bucket.tokens;
                    bucket.tokens = 0.0;
                    remaining -= take;
                    Some(Duration::from_secs_f64(remaining / self.rate))
                }
            };
            let Some(delay) = wait else { break };
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
        Ok(())
    }
}

impl Bucket {
    fn refill(&mut self, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * rate).min(rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_capacity_does_not_block() {
        let limiter = RateLimiter::new(1_000_000);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.acquire(500_000, &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn exceeding_burst_waits_for_refill() {
        let limiter = RateLimiter::new(1_000_000);
        let cancel = CancellationToken::new();
        limiter.acquire(1_000_000, &cancel).await.unwrap();
        let start = Instant::now();
        limiter.acquire(250_000, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_wait() {
        let limiter = RateLimiter::new(100);
        let cancel = CancellationToken::new();
        limiter.acquire(100, &cancel).await.unwrap();

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = limiter.acquire(1_000, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
