use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Evenly spaces calls across a per-minute budget rather than a bursty
/// token bucket: if the budget is 60/minute, calls are at least one second
/// apart. Simpler to reason about and matches the "rate limiting" contract's
/// description of smoothing outbound request bursts.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(calls_per_minute: f64) -> Self {
        let min_interval = if calls_per_minute <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / calls_per_minute)
        };
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let sleep_for = {
            let mut guard = self.last_call.lock().unwrap();
            let now = Instant::now();
            let sleep_for = match *guard {
                Some(last) => {
                    let elapsed = now.duration_since(last);
                    self.min_interval.saturating_sub(elapsed)
                }
                None => Duration::ZERO,
            };
            *guard = Some(now + sleep_for);
            sleep_for
        };
        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_at_least_min_interval_apart() {
        let limiter = RateLimiter::per_minute(60.0);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_rate_never_blocks() {
        let limiter = RateLimiter::per_minute(0.0);
        limiter.wait().await;
        limiter.wait().await;
    }
}
