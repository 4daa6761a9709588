//! Flight retransmission backoff.
//!
//! RFC 6347 §4.2.4.1: the first retransmission waits the base timeout, and
//! every further expiry doubles the wait. A flight carries a `tries`
//! counter; once it has been retransmitted `max_retransmissions` times, the
//! next expiry fails the handshake. The delay is derived from the counter
//! rather than kept as mutable state, so a reset is just zeroing `tries`.
//! A few milliseconds of jitter keep two endpoints started in lockstep from
//! firing at the same instant.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;

// Jitter bounds in milliseconds, resampled on every expiry.
const JITTER_MS: i64 = 50;

// Doubling stops here; DTLS never legitimately gets this far.
const MAX_DOUBLINGS: u32 = 16;

#[derive(Debug)]
pub struct RetransmitBackoff {
    base: Duration,
    max_retransmissions: usize,
    /// Retransmissions of the current flight so far.
    tries: usize,
    jitter_ms: i64,
}

impl RetransmitBackoff {
    pub fn new(base: Duration, max_retransmissions: usize, rng: &mut StdRng) -> Self {
        RetransmitBackoff {
            base,
            max_retransmissions,
            tries: 0,
            jitter_ms: sample_jitter(rng),
        }
    }

    /// A new flight starts over at the base timeout.
    pub fn reset(&mut self, rng: &mut StdRng) {
        self.tries = 0;
        self.jitter_ms = sample_jitter(rng);
    }

    /// Delay until the next expiry: base · 2^tries, jittered, with a small
    /// floor so a zero-ish base cannot spin the timer.
    pub fn delay(&self) -> Duration {
        let doublings = (self.tries as u32).min(MAX_DOUBLINGS);
        let scaled = self.base.saturating_mul(1u32 << doublings);

        let jittered = if self.jitter_ms < 0 {
            scaled.saturating_sub(Duration::from_millis(self.jitter_ms.unsigned_abs()))
        } else {
            scaled + Duration::from_millis(self.jitter_ms as u64)
        };

        jittered.max(Duration::from_millis(10))
    }

    /// Whether the flight has already been retransmitted the configured
    /// number of times. The expiry after that fails the handshake.
    pub fn exhausted(&self) -> bool {
        self.tries >= self.max_retransmissions
    }

    /// Count one retransmission and resample the jitter.
    pub fn record_expiry(&mut self, rng: &mut StdRng) {
        self.tries += 1;
        self.jitter_ms = sample_jitter(rng);
    }
}

fn sample_jitter(rng: &mut StdRng) -> i64 {
    rng.random_range(-JITTER_MS..=JITTER_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn delay_doubles_per_recorded_expiry() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut backoff = RetransmitBackoff::new(Duration::from_millis(400), 2, &mut rng);

        let d0 = backoff.delay();
        assert!(d0 >= Duration::from_millis(350) && d0 <= Duration::from_millis(450));
        assert!(!backoff.exhausted());

        backoff.record_expiry(&mut rng);
        let d1 = backoff.delay();
        assert!(d1 >= Duration::from_millis(750) && d1 <= Duration::from_millis(850));
        assert!(!backoff.exhausted());

        backoff.record_expiry(&mut rng);
        let d2 = backoff.delay();
        assert!(d2 >= Duration::from_millis(1550) && d2 <= Duration::from_millis(1650));
        // Two retransmissions done: the next expiry is the failure.
        assert!(backoff.exhausted());
    }

    #[test]
    fn reset_starts_the_series_over() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = RetransmitBackoff::new(Duration::from_millis(400), 2, &mut rng);
        backoff.record_expiry(&mut rng);
        backoff.record_expiry(&mut rng);
        assert!(backoff.exhausted());

        backoff.reset(&mut rng);
        assert!(!backoff.exhausted());
        assert!(backoff.delay() <= Duration::from_millis(450));
    }

    #[test]
    fn tiny_base_is_floored() {
        let mut rng = StdRng::seed_from_u64(1);
        let backoff = RetransmitBackoff::new(Duration::from_millis(1), 2, &mut rng);
        assert!(backoff.delay() >= Duration::from_millis(10));
    }
}
