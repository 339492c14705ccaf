//! Per-client sliding-window admission control.
//!
//! Each client owns two timestamp windows (one minute, one hour). Every
//! call prunes expired timestamps for all clients and drops clients whose
//! windows are both empty, so memory tracks only recently active clients.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use clyrdia_core::Clock;
use clyrdia_core::config::RateLimitSettings;
use tracing::debug;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct Windows {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.minute, now, MINUTE);
        prune_window(&mut self.hour, now, HOUR);
    }

    fn is_empty(&self) -> bool {
        self.minute.is_empty() && self.hour.is_empty()
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, horizon: Duration) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= horizon {
            window.pop_front();
        } else {
            break;
        }
    }
}

pub struct RateLimiter {
    per_minute: usize,
    per_hour: usize,
    clock: Arc<dyn Clock>,
    clients: Mutex<HashMap<String, Windows>>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            per_minute: settings.per_minute,
            per_hour: settings.per_hour,
            clock,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Record and admit a request from `client`, or reject it without recording.
    pub fn admit(&self, client: &str) -> bool {
        let now = self.clock.now();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        clients.retain(|_, windows| {
            windows.prune(now);
            !windows.is_empty()
        });

        let windows = clients.entry(client.to_string()).or_default();
        if windows.minute.len() >= self.per_minute || windows.hour.len() >= self.per_hour {
            debug!(client, minute = windows.minute.len(), hour = windows.hour.len(), "rate limited");
            return false;
        }
        windows.minute.push_back(now);
        windows.hour.push_back(now);
        true
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use clyrdia_core::ManualClock;

    use super::*;

    fn limiter(per_minute: usize, per_hour: usize) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(
            &RateLimitSettings {
                per_minute,
                per_hour,
            },
            clock.clone(),
        );
        (clock, limiter)
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let (_, limiter) = limiter(5, 100);
        for _ in 0..5 {
            assert!(limiter.admit("10.0.0.1"));
        }
        assert!(!limiter.admit("10.0.0.1"));
    }

    #[test]
    fn clients_are_independent() {
        let (_, limiter) = limiter(1, 100);
        assert!(limiter.admit("a"));
        assert!(!limiter.admit("a"));
        assert!(limiter.admit("b"));
    }

    #[test]
    fn minute_window_slides() {
        let (clock, limiter) = limiter(2, 100);
        assert!(limiter.admit("c"));
        clock.advance(Duration::from_secs(30));
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("c"));
        clock.advance(Duration::from_secs(31));
        // First request is now older than 60s.
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("c"));
    }

    #[test]
    fn rejected_requests_are_not_recorded() {
        let (clock, limiter) = limiter(1, 100);
        assert!(limiter.admit("c"));
        for _ in 0..10 {
            assert!(!limiter.admit("c"));
        }
        clock.advance(MINUTE);
        assert!(limiter.admit("c"));
    }

    #[test]
    fn hour_window_catches_sustained_use() {
        let (clock, limiter) = limiter(10, 3);
        for _ in 0..3 {
            assert!(limiter.admit("c"));
            clock.advance(Duration::from_secs(61));
        }
        assert!(!limiter.admit("c"));
        clock.advance(HOUR);
        assert!(limiter.admit("c"));
    }

    #[test]
    fn idle_clients_are_purged_by_any_call() {
        let (clock, limiter) = limiter(10, 100);
        assert!(limiter.admit("idle"));
        assert!(limiter.admit("active"));
        assert_eq!(limiter.tracked_clients(), 2);

        clock.advance(HOUR + Duration::from_secs(1));
        assert!(limiter.admit("active"));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn concurrent_admission_never_exceeds_limit() {
        let (_, limiter) = limiter(50, 1000);
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.admit("shared")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
