use std::sync::Mutex;
use std::time::Instant;

/// Client-side token-bucket rate limiter, one per endpoint, to protect
/// against provider quota exhaustion (order-of-magnitude 10 req/s).
pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            rate_per_sec,
            capacity: rate_per_sec,
            state: Mutex::new((rate_per_sec, Instant::now())),
        }
    }

    /// Blocks until a token is available, refilling the bucket based on
    /// elapsed wall-clock time.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let (tokens, last) = *state;
                let elapsed = last.elapsed().as_secs_f64();
                let refilled = (tokens + elapsed * self.rate_per_sec).min(self.capacity);
                if refilled >= 1.0 {
                    *state = (refilled - 1.0, Instant::now());
                    None
                } else {
                    *state = (refilled, Instant::now());
                    let remaining = 1.0 - refilled;
                    Some(std::time::Duration::from_secs_f64(remaining / self.rate_per_sec))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(10.0);
        for _ in 0..10 {
            limiter.acquire().await;
        }
    }
}
