//! A small, fast, non-cryptographic PRNG used by demo clients to pick
//! between request kinds, and by tests to jitter simulated message
//! delays. Not used anywhere in the consensus-critical path.

use rand_core::{OsRng, RngCore};

/// A xorshift128+ generator, seeded from the OS CSPRNG.
pub struct State {
    s: [u64; 2],
}

impl State {
    /// Creates a new, OS-seeded generator.
    pub fn new() -> Self {
        let mut seed = [0u8; 16];
        OsRng.fill_bytes(&mut seed);
        let s0 = u64::from_le_bytes(seed[..8].try_into().unwrap());
        let s1 = u64::from_le_bytes(seed[8..].try_into().unwrap()) | 1;
        State { s: [s0, s1] }
    }

    /// Returns the next pseudo-random `u64`.
    pub fn next_state(&mut self) -> u64 {
        let mut x = self.s[0];
        let y = self.s[1];
        self.s[0] = y;
        x ^= x << 23;
        x ^= x >> 17;
        x ^= y ^ (y >> 26);
        self.s[1] = x;
        x.wrapping_add(y)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
