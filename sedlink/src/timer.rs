//! One-shot timers driven by the event loop.
//!
//! Each time-driven component owns one [`Timer`]. The platform arranges to
//! call the owner's `poll(now)` at (or after) the armed instant; the timer
//! itself only remembers when it should fire and disarms on expiry.

use crate::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    fire_time: Option<Instant>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { fire_time: None }
    }

    /// Arm the timer to fire `after` the given point in time.
    pub fn start(&mut self, now: Instant, after: Duration) {
        self.fire_time = Some(now + after);
    }

    /// Arm the timer to fire at an absolute point in time.
    pub fn fire_at(&mut self, at: Instant) {
        self.fire_time = Some(at);
    }

    pub fn stop(&mut self) {
        self.fire_time = None;
    }

    pub fn is_running(&self) -> bool {
        self.fire_time.is_some()
    }

    /// The armed fire time, if running.
    pub fn fire_time(&self) -> Option<Instant> {
        self.fire_time
    }

    /// Returns `true` exactly once when the armed time has been reached,
    /// disarming the timer.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.fire_time {
            Some(at) if at <= now => {
                self.fire_time = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_and_disarms() {
        let mut timer = Timer::new();
        timer.start(Instant::from_us(0), Duration::from_ms(10));
        assert!(timer.is_running());
        assert_eq!(timer.fire_time(), Some(Instant::from_ms(10)));

        assert!(!timer.poll(Instant::from_us(9_999)));
        assert!(timer.poll(Instant::from_us(10_000)));
        assert!(!timer.poll(Instant::from_us(20_000)));
        assert!(!timer.is_running());
    }

    #[test]
    fn stop_disarms() {
        let mut timer = Timer::new();
        timer.fire_at(Instant::from_us(5));
        timer.stop();
        assert!(!timer.poll(Instant::from_us(10)));
    }
}
