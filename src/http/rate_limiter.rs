//! A single shared token bucket enforcing `rate_limit_rps` requests per
//! second across every call made by one `Transport`, per spec.md §4.1 and
//! the single-shared-rate-limiter discipline in spec.md §5. Simpler than
//! the teacher's adaptive per-domain `RateLimiter`
//! (`scrapers/rate_limiter/mod.rs`) on purpose: the spec calls for one
//! process-wide budget, not per-domain backoff bookkeeping (see DESIGN.md).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug)]
struct Bucket {
    interval: Duration,
    next_slot: Instant,
}

/// Cloneable handle to one shared token bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(rate_limit_rps: f64) -> Self {
        let rps = if rate_limit_rps <= 0.0 { 1.0 } else { rate_limit_rps };
        let interval = Duration::from_secs_f64(1.0 / rps);
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                interval,
                next_slot: Instant::now(),
            })),
        }
    }

    /// Block until the next slot is available, then reserve it.
    pub async fn acquire(&self) {
        let wait = {
            let mut bucket = self.inner.lock().await;
            let now = Instant::now();
            let wait = bucket.next_slot.saturating_duration_since(now);
            bucket.next_slot = (bucket.next_slot.max(now)) + bucket.interval;
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
