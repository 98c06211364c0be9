//! Crash restart policy for managed servers

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Delays before successive restarts: immediate, 1s, 5s, 15s, 30s
const BACKOFF: [Duration; 5] = [
    Duration::from_secs(0),
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
];

/// Exponential backoff with a cap on restarts per time window
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    restarts: VecDeque<Instant>,
    max_restarts: usize,
    window: Duration,
    step: usize,
}

impl RestartPolicy {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            restarts: VecDeque::new(),
            max_restarts,
            window,
            step: 0,
        }
    }

    /// Delay before the next restart at `now`, or `None` to give up
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        while let Some(oldest) = self.restarts.front()
            && now.saturating_duration_since(*oldest) >= self.window
        {
            self.restarts.pop_front();
        }
        if self.restarts.len() >= self.max_restarts {
            return None;
        }

        let delay = BACKOFF[self.step.min(BACKOFF.len() - 1)];
        self.step += 1;
        self.restarts.push_back(now);
        Some(delay)
    }

    /// Forget past crashes once the server is healthy again
    pub fn reset(&mut self) {
        self.restarts.clear();
        self.step = 0;
    }

    pub fn recent_restarts(&self) -> usize {
        self.restarts.len()
    }
}

impl Default for RestartPolicy {
    /// Five restarts per minute
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}
