//! View-change bookkeeping (spec §9 "Declared extension points": "a
//! view-change subprotocol is out of scope, but the `View` numbering
//! rule and a stub entry point for it must exist").
//!
//! This crate's consensus engine never triggers a view change itself;
//! `Synchronizer` exists so the wiring for one is in place without
//! committing to the full VIEW-CHANGE/NEW-VIEW message exchange, which
//! has no scenario in this specification driving it (no simulated
//! primary crash-detection timeout feeds back into a view bump).

use crate::bft::communication::NodeId;
use crate::bft::ordering::View;

/// Tracks the view a replica currently believes is active.
pub struct Synchronizer {
    current: View,
    n: usize,
}

impl Synchronizer {
    pub fn new(n: usize) -> Self {
        Self {
            current: View::INITIAL,
            n,
        }
    }

    /// The view this replica currently considers active.
    pub fn view(&self) -> View {
        self.current
    }

    /// The primary of the current view.
    pub fn leader(&self) -> NodeId {
        self.current.primary(self.n)
    }

    /// Begins a view change to the next view.
    ///
    /// Declared extension point only: callers in this crate never
    /// invoke it, since no failure-detector timeout is wired up to
    /// trigger a view change (spec §9). A full implementation would
    /// broadcast `VIEW-CHANGE` here and wait for `NEW-VIEW` from the
    /// next primary before calling `install_view`.
    pub fn begin_view_change(&mut self) {
        self.current = self.current.next();
    }

    /// Installs `view` as the current view, e.g. once a `NEW-VIEW`
    /// quorum has been observed by a full view-change implementation.
    pub fn install_view(&mut self, view: View) {
        self.current = view;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_view_change_advances_and_rotates_leader() {
        let mut sync = Synchronizer::new(4);
        assert_eq!(sync.leader(), NodeId::from(0u32));
        sync.begin_view_change();
        assert_eq!(sync.view(), View::from(1));
        assert_eq!(sync.leader(), NodeId::from(1u32));
    }
}
