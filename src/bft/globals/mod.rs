//! A tiny atomic flag, used to guard one-time global initialization
//! (see `bft::init`).

use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean flag that can be tested and set/unset from any thread.
pub struct Flag(AtomicBool);

impl Flag {
    /// Creates a new, unset `Flag`.
    pub const fn new() -> Self {
        Flag(AtomicBool::new(false))
    }

    /// Returns whether the flag is currently set.
    pub fn test(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sets the flag.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Unsets the flag.
    pub fn unset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
