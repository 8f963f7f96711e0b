//! RFC 6206 Trickle timer state machine.
//!
//! Pure state; no clocks or tasks. The online verifier drives it: each
//! interval it reports how many consistent observations (qualifying
//! inbound packets) were seen, asks whether the re-verification probe
//! is suppressed, and advances the interval.

use rand::Rng;
use std::time::Duration;

/// Trickle state: interval `I` in `[Imin, Imin * 2^max_doublings]`,
/// consistency counter `c`, redundancy constant `k`.
#[derive(Debug, Clone)]
pub struct Trickle {
    imin: Duration,
    imax: Duration,
    k: u32,
    interval: Duration,
    counter: u32,
}

impl Trickle {
    /// Creates a timer with interval bounds `[imin, imin << max_doublings]`.
    ///
    /// # Panics
    ///
    /// Panics if `imin` is zero.
    pub fn new(imin: Duration, max_doublings: u32, k: u32) -> Self {
        assert!(!imin.is_zero(), "Imin must be nonzero");
        let imax = imin.saturating_mul(1u32 << max_doublings.min(20));
        Trickle {
            imin,
            imax,
            k,
            interval: imin,
            counter: 0,
        }
    }

    /// Starts (or restarts) the algorithm at the minimum interval.
    pub fn begin(&mut self) {
        self.interval = self.imin;
        self.counter = 0;
    }

    /// Current interval length `I`.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records `n` consistent observations in the current interval.
    pub fn observe(&mut self, n: u32) {
        self.counter = self.counter.saturating_add(n);
    }

    /// True if the redundancy constant suppresses transmission at `t`
    /// (enough consistent traffic was already seen this interval).
    pub fn suppressed(&self) -> bool {
        self.counter >= self.k
    }

    /// Reports an inconsistency. Resets the interval to `Imin` and
    /// returns true if it was already at the minimum, i.e. this is a
    /// repeated inconsistency the caller should act on.
    pub fn inconsistent(&mut self) -> bool {
        let already_min = self.interval <= self.imin;
        self.interval = self.imin;
        self.counter = 0;
        already_min
    }

    /// Ends the current interval: doubles `I` up to `Imax` and clears
    /// the consistency counter.
    pub fn expire(&mut self) {
        self.interval = self.interval.saturating_mul(2).min(self.imax);
        self.counter = 0;
    }

    /// Picks the transmission point `t` uniformly in `[I/2, I)`.
    pub fn pick_t<R: Rng>(&self, rng: &mut R) -> Duration {
        let half = self.interval / 2;
        if half.is_zero() {
            return self.interval;
        }
        half + rng.gen_range(Duration::ZERO..half)
    }
}
