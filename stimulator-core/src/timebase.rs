//! Wrapping tick arithmetic shared by the pulse engine and its collaborators.
//!
//! The stimulator counts time in a free-running 16-bit tick counter that rolls
//! over roughly every 65 seconds. Every wait in the engine is expressed as the
//! forward distance between a captured reference and the current tick, so the
//! rollover never produces a spurious timeout or an endless wait.

/// Raw value of the free-running tick counter.
pub type Tick = u16;

/// Largest value the tick counter reaches before rolling over to zero.
pub const MAX_TICK: Tick = Tick::MAX;

/// Length of one tick in microseconds.
pub const TICK_PERIOD_MICROS: u32 = 1_000;

/// Forward distance from `reference` to `current` on the wrapping tick clock.
///
/// `current == reference` yields zero and a reference captured just before
/// rollover still measures the true number of ticks that passed.
#[must_use]
pub const fn ticks_between(reference: Tick, current: Tick) -> Tick {
    current.wrapping_sub(reference)
}

/// Monotonic tick source read by the pulse engine.
pub trait TimeBase {
    /// Reads the current tick counter.
    fn now(&mut self) -> Tick;

    /// Ticks that passed since `reference` was captured.
    fn elapsed(&mut self, reference: Tick) -> Tick {
        ticks_between(reference, self.now())
    }
}

impl<T: TimeBase + ?Sized> TimeBase for &mut T {
    fn now(&mut self) -> Tick {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Tick);

    impl TimeBase for FixedClock {
        fn now(&mut self) -> Tick {
            self.0
        }
    }

    #[test]
    fn equal_ticks_measure_zero() {
        assert_eq!(ticks_between(0, 0), 0);
        assert_eq!(ticks_between(1234, 1234), 0);
        assert_eq!(ticks_between(MAX_TICK, MAX_TICK), 0);
    }

    #[test]
    fn rollover_counts_the_wrapped_tick() {
        assert_eq!(ticks_between(MAX_TICK, 0), 1);
        assert_eq!(ticks_between(MAX_TICK - 9, 10), 20);
        assert_eq!(ticks_between(1, 0), MAX_TICK);
    }

    #[test]
    fn forward_distance_holds_for_every_reference() {
        for reference in 0..=MAX_TICK {
            for step in [0u16, 1, 7, 999, 32_768, MAX_TICK] {
                let current = reference.wrapping_add(step);
                assert_eq!(ticks_between(reference, current), step);
            }
        }
    }

    #[test]
    fn clock_elapsed_uses_current_tick() {
        let mut clock = FixedClock(5);
        assert_eq!(clock.elapsed(65_530), 11);
        assert_eq!(clock.elapsed(5), 0);
    }
}
