//! Session clocks.
//!
//! The session only ever asks "how long since start". Live sessions use the
//! monotonic wall clock; the simulated participant drives a manual clock so a
//! ten minute session runs instantly and deterministically.

use std::cell::Cell;
use std::rc::Rc;

pub use std::time::{Duration, Instant};

pub trait Clock {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Shared virtual clock. Clones observe the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }
}

/// Countdown against any clock; remaining time saturates at zero.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    started_at: Duration,
    budget: Duration,
}

impl Countdown {
    pub fn start(clock: &impl Clock, budget: Duration) -> Self {
        Self {
            started_at: clock.elapsed(),
            budget,
        }
    }

    pub fn elapsed(&self, clock: &impl Clock) -> Duration {
        clock.elapsed().saturating_sub(self.started_at)
    }

    pub fn remaining(&self, clock: &impl Clock) -> Duration {
        self.budget.saturating_sub(self.elapsed(clock))
    }

    pub fn expired(&self, clock: &impl Clock) -> bool {
        self.remaining(clock).is_zero()
    }
}
