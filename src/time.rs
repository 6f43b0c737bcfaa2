use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub use std::time::Instant;

/// Source of the `time` uniform pushed with every model draw.
pub trait Clock: Send {
    fn elapsed_seconds(&self) -> f32;
}

/// Seconds since the clock was created.
#[derive(Clone, Copy, Debug)]
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
    fn elapsed_seconds(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct FixedClock {
    bits: Arc<AtomicU32>,
}

impl FixedClock {
    pub fn new(seconds: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(seconds.to_bits())),
        }
    }

    pub fn set(&self, seconds: f32) {
        self.bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: f32) {
        self.set(self.elapsed_seconds() + seconds);
    }
}

impl Clock for FixedClock {
    fn elapsed_seconds(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_clones_share_time() {
        let clock = FixedClock::new(1.5);
        let view = clock.clone();
        clock.advance(0.5);
        assert_eq!(view.elapsed_seconds(), 2.0);
    }

    #[test]
    fn system_clock_starts_near_zero() {
        assert!(SystemClock::new().elapsed_seconds() < 1.0);
    }
}
