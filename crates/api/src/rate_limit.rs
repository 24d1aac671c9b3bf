use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Idle clients are swept once this many keys are tracked.
const SWEEP_THRESHOLD: usize = 4096;

/// Sliding-window limiter keyed by client address.
#[derive(Debug, Clone)]
pub struct IpRateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl IpRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    /// Records a hit for `client` unless its window is already full.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock();

        if hits.len() >= SWEEP_THRESHOLD && !hits.contains_key(client) {
            hits.retain(|_, queue| {
                queue
                    .back()
                    .is_some_and(|last| now.duration_since(*last) <= self.window)
            });
        }

        let queue = hits.entry(client.to_string()).or_default();
        while queue
            .front()
            .is_some_and(|first| now.duration_since(*first) > self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.max_requests {
            return false;
        }
        queue.push_back(now);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.hits.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clients_have_independent_windows() {
        let limiter = IpRateLimiter::new(Duration::from_secs(60), 2);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn expired_hits_free_the_window() {
        let limiter = IpRateLimiter::new(Duration::from_millis(20), 1);

        assert!(limiter.allow("local"));
        assert!(!limiter.allow("local"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow("local"));
    }
}
