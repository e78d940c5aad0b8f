use std::collections::VecDeque;
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::debug;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        sleep(duration);
    }
}

/// Rolling-window limiter: at most `limit` requests in any trailing
/// [`RATE_LIMIT_WINDOW`]. A limit of zero disables throttling.
#[derive(Debug)]
pub struct RateLimiter<C: Clock = SystemClock> {
    limit: usize,
    window: Duration,
    requests: VecDeque<Instant>,
    clock: C,
}

impl RateLimiter<SystemClock> {
    pub fn new(limit: usize) -> Self {
        Self::with_clock(limit, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(limit: usize, clock: C) -> Self {
        Self {
            limit,
            window: RATE_LIMIT_WINDOW,
            requests: VecDeque::with_capacity(limit),
            clock,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Block until one more request fits in the window, then record it.
    pub fn acquire(&mut self) {
        if self.limit == 0 {
            return;
        }
        let mut now = self.clock.now();
        self.prune(now);

        if self.requests.len() >= self.limit
            && let Some(oldest) = self.requests.front().copied()
        {
            let wait = (oldest + self.window).saturating_duration_since(now);
            if !wait.is_zero() {
                debug!(
                    "rate limit of {} requests per {}s reached, waiting {:.1}s",
                    self.limit,
                    self.window.as_secs(),
                    wait.as_secs_f64()
                );
                self.clock.sleep(wait);
            }
            now = self.clock.now();
            self.prune(now);
        }

        self.requests.push_back(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.requests.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}
