//! Time source for the retry loops.

use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The real monotonic clock and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only advances when slept on.
#[cfg(test)]
#[derive(Debug)]
pub struct FakeClock {
    start: Instant,
    elapsed: std::cell::Cell<Duration>,
    sleeps: std::cell::Cell<u32>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: std::cell::Cell::new(Duration::ZERO),
            sleeps: std::cell::Cell::new(0),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}
