//! Anti-replay window for record sequence numbers.
//!
//! Keeps the highest accepted 48-bit sequence number of the current read
//! epoch and a 64-bit bitmap of recently seen numbers below it. Duplicates
//! and records older than the window are rejected. The window is reset when
//! the read epoch advances, since sequence numbers restart per epoch.

#[derive(Debug, Default)]
pub struct ReplayWindow {
    max_seq: u64,
    window: u64,
    any: bool,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all state. Used when the read epoch changes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Check whether `seqno` would be accepted, without marking it seen.
    ///
    /// Used before AEAD verification; only an authenticated record may
    /// slide the window.
    pub fn is_fresh(&self, seqno: u64) -> bool {
        if !self.any {
            return true;
        }
        if seqno > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seqno;
        if offset >= 64 {
            return false;
        }
        (self.window & (1u64 << offset)) == 0
    }

    /// Check whether `seqno` is fresh and mark it seen.
    ///
    /// Returns false for duplicates and for records older than the window.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.any {
            self.any = true;
            self.max_seq = seqno;
            self.window = 1;
            return true;
        }

        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            if delta > 63 {
                // Jump past the whole window: only the newest is seen.
                self.window = 1;
            } else {
                self.window <<= delta;
                self.window |= 1;
            }
            self.max_seq = seqno;
            true
        } else {
            let offset = self.max_seq - seqno;
            if offset >= 64 {
                return false; // too old
            }
            let mask = 1u64 << offset;
            if (self.window & mask) != 0 {
                return false; // duplicate
            }
            self.window |= mask;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_zero_as_first_sequence() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(!w.check_and_update(0));
        assert!(w.check_and_update(1));
    }

    #[test]
    fn accepts_out_of_order_within_window() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(8));
        assert!(!w.check_and_update(8));
        assert!(w.check_and_update(9));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(100));
        // offset = 64 -> outside the window
        assert!(!w.check_and_update(36));
        // offset = 63 -> allowed once
        assert!(w.check_and_update(37));
    }

    #[test]
    fn large_jump_clears_stale_bits() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(w.check_and_update(200));
        // offset = 63 from the new max, never seen
        assert!(w.check_and_update(137));
        assert!(!w.check_and_update(15));
    }

    #[test]
    fn is_fresh_does_not_mark() {
        let mut w = ReplayWindow::new();
        assert!(w.is_fresh(3));
        assert!(w.is_fresh(3));
        assert!(w.check_and_update(3));
        assert!(!w.is_fresh(3));
        assert!(w.is_fresh(4));
    }

    #[test]
    fn reset_forgets_everything() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(5));
        w.reset();
        assert!(w.check_and_update(0));
        assert!(w.check_and_update(5));
    }
}
