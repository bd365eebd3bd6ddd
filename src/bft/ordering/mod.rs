//! Sequence numbers and view numbers, the two axes the replica log is
//! indexed by (spec §3 "View", "Sequence number").

use std::cmp::Ordering;

use either::{Either, Left, Right};

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

use crate::bft::communication::NodeId;
use crate::bft::log;

/// Types which have an associated sequence number, e.g. a consensus
/// message, or a logged decision.
pub trait Orderable {
    /// Returns the sequence number of this item.
    fn sequence_number(&self) -> SeqNo;
}

/// Represents a sequence number attributed to a client request
/// during a consensus instance (spec §3 `seq`).
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Ord, Eq, PartialEq, Hash)]
pub struct SeqNo(i32);

pub(crate) enum InvalidSeqNo {
    Small,
    Big,
}

impl From<u32> for SeqNo {
    #[inline]
    fn from(sequence_number: u32) -> SeqNo {
        SeqNo(sequence_number as i32)
    }
}

impl From<SeqNo> for u32 {
    #[inline]
    fn from(sequence_number: SeqNo) -> u32 {
        sequence_number.0 as u32
    }
}

impl PartialOrd for SeqNo {
    fn partial_cmp(&self, other: &SeqNo) -> Option<Ordering> {
        match self.index(*other) {
            Right(0) => Some(Ordering::Equal),
            Left(InvalidSeqNo::Small) => Some(Ordering::Less),
            _ => Some(Ordering::Greater),
        }
    }
}

impl SeqNo {
    /// The initial sequence number of a fresh log (spec §3 "Lifecycle":
    /// `seq_cursor=0`).
    pub const ZERO: SeqNo = SeqNo(0);

    /// Returns the following sequence number.
    #[inline]
    pub fn next(self) -> SeqNo {
        let (next, overflow) = (self.0).overflowing_add(1);
        SeqNo(if overflow { 0 } else { next })
    }

    /// Return an appropriate value to index a time-buffered queue keyed
    /// relative to `other`.
    #[inline]
    pub(crate) fn index(self, other: SeqNo) -> Either<InvalidSeqNo, usize> {
        const OVERFLOW_THRES_POS: i32 = 10_000;
        const OVERFLOW_THRES_NEG: i32 = -OVERFLOW_THRES_POS;
        const DROP_SEQNO_THRES: i32 = (log::PERIOD + (log::PERIOD >> 1)) as i32;

        let index = {
            let index = (self.0).wrapping_sub(other.0);
            if index < OVERFLOW_THRES_NEG || index > OVERFLOW_THRES_POS {
                i32::MAX.wrapping_add(index).wrapping_add(1)
            } else {
                index
            }
        };

        if index < 0 || index > DROP_SEQNO_THRES {
            Left(if index < 0 {
                InvalidSeqNo::Small
            } else {
                InvalidSeqNo::Big
            })
        } else {
            Right(index as usize)
        }
    }
}

/// Represents a view number (spec §3 "View"): a non-negative integer `v`
/// identifying the current primary, `primary(v) = v mod n`.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Ord, Eq, PartialEq, PartialOrd, Hash)]
pub struct View(u32);

impl View {
    /// The initial view of a fresh cluster (spec §3 "Initial view is 0").
    pub const INITIAL: View = View(0);

    /// Returns the view following this one (used when a view change
    /// completes; spec §9 declares the full subprotocol an extension
    /// point, but the numbering rule itself is pinned down by §3).
    pub fn next(self) -> View {
        View(self.0 + 1)
    }

    /// Computes the id of the primary of this view, given the total
    /// replica count `n`.
    pub fn primary(self, n: usize) -> NodeId {
        NodeId::from(self.0 % (n as u32))
    }

    /// Whether `id` is the primary of this view among `n` replicas.
    pub fn is_primary(self, id: NodeId, n: usize) -> bool {
        self.primary(n) == id
    }
}

impl From<u32> for View {
    #[inline]
    fn from(v: u32) -> View {
        View(v)
    }
}

impl From<View> for u32 {
    #[inline]
    fn from(v: View) -> u32 {
        v.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_wraps_around_n() {
        let n = 4;
        assert_eq!(View::from(0).primary(n), NodeId::from(0u32));
        assert_eq!(View::from(1).primary(n), NodeId::from(1u32));
        assert_eq!(View::from(4).primary(n), NodeId::from(0u32));
        assert_eq!(View::from(5).primary(n), NodeId::from(1u32));
    }

    #[test]
    fn is_primary_matches_primary() {
        assert!(View::from(2).is_primary(NodeId::from(2u32), 4));
        assert!(!View::from(2).is_primary(NodeId::from(1u32), 4));
    }

    #[test]
    fn seqno_next_is_monotonic() {
        let a = SeqNo::ZERO;
        let b = a.next();
        assert!(b > a);
    }
}
